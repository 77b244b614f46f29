//! Cohort - study-group chat client
//!
//! Terminal client for one group chat: live messages, history, pins,
//! reactions, replies, and polls.

use std::path::PathBuf;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod session;

use config::Config;
use session::{ChatSession, SessionUpdate, Viewer};

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    tracing::info!("Starting Cohort");

    let mut args = std::env::args().skip(1);
    let config_path: Option<PathBuf> = args.next().map(PathBuf::from);
    let group_arg: Option<i64> = args.next().and_then(|a| a.parse().ok());

    let config = match Config::load(config_path.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    let group_id = match group_arg.or(config.group_id) {
        Some(id) => id,
        None => {
            tracing::error!("No group selected; pass a group id or set one in the config");
            std::process::exit(1);
        }
    };

    let viewer = Viewer {
        id: config.user_id,
        name: config.user_name.clone(),
    };
    let mut session = match ChatSession::open(
        &config.rest_url,
        &config.ws_url,
        &config.token,
        group_id,
        Some(viewer),
    ) {
        Ok(session) => session,
        Err(e) => {
            tracing::error!("Failed to open session: {}", e);
            std::process::exit(1);
        }
    };

    println!("Joining group {} as {}...", group_id, config.user_name);
    println!("Commands: /reply <id>, /react <id> <emoji>, /pin <id>, /pins, /del <id>, /vote <poll> <option>, /poll <question> | <opt> | <opt>, /quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            update = session.next_update() => {
                match update {
                    Some(update) => render_update(&session, update),
                    None => break,
                }
            }
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        if !handle_line(&mut session, line.trim()).await {
                            break;
                        }
                    }
                    Ok(None) | Err(_) => {
                        session.close().await;
                        break;
                    }
                }
            }
        }
    }

    println!("Session closed.");
}

fn render_update(session: &ChatSession, update: SessionUpdate) {
    match update {
        SessionUpdate::Connected => {
            println!("Connected. {} messages in history.", session.store().len());
            let mut day = String::new();
            for message in session.store().messages() {
                let label = message.date_label();
                if label != day {
                    println!("--- {} ---", label);
                    day = label;
                }
                render_message(message);
            }
        }
        SessionUpdate::Message(message) => render_message(&message),
        SessionUpdate::VoteUpdated { poll_id, .. } => {
            if let Some(message) = session.store().find_poll(&poll_id) {
                render_message(message);
            }
        }
        SessionUpdate::Reconnecting { attempt } => {
            println!("Connection lost; reconnecting (attempt {})...", attempt);
        }
        SessionUpdate::Closed => println!("Disconnected."),
    }
}

fn render_message(message: &cohort_core::Message) {
    if let Some(reply) = &message.reply_to {
        println!("    > {}: {}", reply.sender_name, reply.snippet);
    }
    println!(
        "[{}] <{}> {}: {}",
        message.format_timestamp(),
        message.id,
        message.sender_name,
        message.content
    );
    if let Some(poll) = &message.poll {
        println!(
            "    Poll {}: {} ({} votes)",
            poll.poll_id,
            poll.question,
            poll.total_votes()
        );
        for option in &poll.options {
            println!(
                "      [{}] {} ({} votes)",
                option.option_id, option.text, option.vote_count
            );
        }
    }
    for (emoji, reactors) in &message.reactions {
        println!("    {} x{}", emoji, reactors.len());
    }
}

/// Dispatch one input line. Returns `false` when the session should end.
async fn handle_line(session: &mut ChatSession, line: &str) -> bool {
    if line.is_empty() {
        return true;
    }

    let (command, rest) = match line.split_once(' ') {
        Some((c, r)) => (c, r.trim()),
        None => (line, ""),
    };

    let result = match command {
        "/quit" => {
            session.close().await;
            return false;
        }
        "/pins" => {
            for message in session.store().pinned_messages() {
                println!("pinned <{}> {}: {}", message.id, message.sender_name, message.snippet());
            }
            Ok(())
        }
        "/pin" => session.toggle_pin(rest).await.map(|pinned| {
            println!("{} is now {}", rest, if pinned { "pinned" } else { "unpinned" });
        }),
        "/del" => session.delete_message(rest).await,
        "/react" => match rest.split_once(' ') {
            Some((id, emoji)) => session.toggle_reaction(id, emoji.trim()).await.map(|_| ()),
            None => {
                println!("usage: /react <id> <emoji>");
                Ok(())
            }
        },
        "/reply" => {
            if rest.is_empty() {
                session.set_reply_target(None).map(|_| println!("Reply cancelled"))
            } else {
                session.set_reply_target(Some(rest)).map(|_| println!("Replying to {}", rest))
            }
        }
        "/vote" => match rest.split_once(' ') {
            Some((poll_id, option_id)) => session.cast_vote(poll_id, option_id.trim()).await,
            None => {
                println!("usage: /vote <poll> <option>");
                Ok(())
            }
        },
        "/poll" => {
            let mut parts = rest.split('|').map(|p| p.trim().to_string());
            let question = parts.next().unwrap_or_default();
            let options: Vec<String> = parts.filter(|p| !p.is_empty()).collect();
            session.create_poll(&question, options).await
        }
        _ => session.send_text(line).await,
    };

    if let Err(e) = result {
        println!("error: {}", e);
    }
    true
}
