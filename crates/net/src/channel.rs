//! Realtime channel for a group's broadcast topic
//!
//! Owns the WebSocket/STOMP lifecycle for one open chat session:
//! connect, handshake, subscribe, detect failure, reconnect. At most one
//! live transport per channel handle. Frames are delivered to the caller
//! in arrival order; ordering across a reconnect gap is healed by the
//! history reload, not by the channel.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::backoff::ReconnectPolicy;
use crate::error::{Error, Result};
use crate::protocol::group_topic;
use crate::stomp::{Command, Frame};

/// Give up on a handshake that produces no CONNECTED frame in time
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Disconnected,
    Connecting,
    Connected,
}

/// Event delivered to the channel's consumer
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    /// Handshake completed and the group topic is subscribed
    Subscribed,
    /// One inbound broadcast frame body, in arrival order
    Frame(serde_json::Value),
    /// The transport dropped; a reconnect attempt is scheduled
    Reconnecting { attempt: u32 },
    /// The channel is torn down and will emit nothing further
    Closed,
}

enum ChannelCommand {
    Publish(Frame),
    Disconnect,
}

/// Handle for one group's realtime channel
pub struct ChatChannel {
    state: Arc<RwLock<ChannelState>>,
    event_rx: mpsc::Receiver<ChannelEvent>,
    cmd_tx: mpsc::Sender<ChannelCommand>,
}

impl ChatChannel {
    /// Open a channel to a group's topic.
    ///
    /// Returns immediately; connection progress is reported through
    /// [`ChannelEvent`]s. The credential is attached at connect time as
    /// a protocol header. Retries with delays from `policy` until
    /// [`disconnect`](Self::disconnect) is called.
    pub fn connect(
        ws_url: impl Into<String>,
        group_id: i64,
        token: impl Into<String>,
        policy: Box<dyn ReconnectPolicy>,
    ) -> Self {
        let state = Arc::new(RwLock::new(ChannelState::Connecting));
        let (event_tx, event_rx) = mpsc::channel(64);
        let (cmd_tx, cmd_rx) = mpsc::channel(64);

        let state_clone = state.clone();
        tokio::spawn(channel_task(
            ws_url.into(),
            group_id,
            token.into(),
            policy,
            state_clone,
            event_tx,
            cmd_rx,
        ));

        Self {
            state,
            event_rx,
            cmd_tx,
        }
    }

    /// Get the next channel event
    pub async fn next_event(&mut self) -> Option<ChannelEvent> {
        self.event_rx.recv().await
    }

    /// Publish a JSON payload to a destination.
    ///
    /// Fails fast when no transport is currently established; nothing is
    /// queued. The caller owns optimistic reflection and error surfacing.
    pub async fn publish(&self, destination: &str, body: String) -> Result<()> {
        if *self.state.read().await != ChannelState::Connected {
            return Err(Error::NotConnected);
        }
        self.cmd_tx
            .send(ChannelCommand::Publish(Frame::send(destination, body)))
            .await
            .map_err(|_| Error::NotConnected)
    }

    /// Tear down the channel.
    ///
    /// Releases the transport and cancels any pending reconnect timer;
    /// safe to call while a connect attempt is in flight.
    pub async fn disconnect(&self) {
        let _ = self.cmd_tx.send(ChannelCommand::Disconnect).await;
    }

    /// Current connection state
    pub async fn state(&self) -> ChannelState {
        *self.state.read().await
    }
}

enum SessionEnd {
    Lost,
    Teardown,
}

/// Main channel task: connect, run, reconnect until torn down
async fn channel_task(
    ws_url: String,
    group_id: i64,
    token: String,
    policy: Box<dyn ReconnectPolicy>,
    state: Arc<RwLock<ChannelState>>,
    event_tx: mpsc::Sender<ChannelEvent>,
    mut cmd_rx: mpsc::Receiver<ChannelCommand>,
) {
    let topic = group_topic(group_id);
    let mut attempt: u32 = 0;

    loop {
        *state.write().await = ChannelState::Connecting;

        match open_session(&ws_url, &topic, &token).await {
            Ok(ws) => {
                attempt = 0;
                *state.write().await = ChannelState::Connected;
                info!(group_id, topic = %topic, "Subscribed to group topic");
                let _ = event_tx.send(ChannelEvent::Subscribed).await;

                let end = run_session(ws, &event_tx, &mut cmd_rx).await;
                *state.write().await = ChannelState::Disconnected;
                if matches!(end, SessionEnd::Teardown) {
                    break;
                }
            }
            Err(e) => {
                warn!(error = %e, "Handshake failed");
            }
        }

        attempt += 1;
        let delay = policy.delay(attempt);
        let _ = event_tx.send(ChannelEvent::Reconnecting { attempt }).await;
        debug!(attempt, delay_ms = delay.as_millis() as u64, "Reconnect backoff");

        // The wait stays cancellable so teardown never leaves a zombie
        // reconnect timer behind.
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(ChannelCommand::Disconnect) | None => break,
                    Some(ChannelCommand::Publish(_)) => {
                        warn!("Dropping publish while disconnected");
                    }
                }
            }
        }
    }

    *state.write().await = ChannelState::Disconnected;
    let _ = event_tx.send(ChannelEvent::Closed).await;
    info!("Channel closed");
}

/// One connect attempt: transport, STOMP handshake, topic subscription
async fn open_session(ws_url: &str, topic: &str, token: &str) -> Result<WsStream> {
    let (mut ws, _) = connect_async(ws_url).await?;

    let connect = Frame::connect(&host_of(ws_url), token);
    ws.send(WsMessage::Text(connect.encode())).await?;

    tokio::time::timeout(HANDSHAKE_TIMEOUT, wait_connected(&mut ws))
        .await
        .map_err(|_| Error::Protocol("Handshake timed out".to_string()))??;

    ws.send(WsMessage::Text(Frame::subscribe("sub-0", topic).encode()))
        .await?;
    Ok(ws)
}

async fn wait_connected(ws: &mut WsStream) -> Result<()> {
    while let Some(msg) = ws.next().await {
        match msg? {
            WsMessage::Text(text) => {
                if text.trim().is_empty() {
                    continue; // heartbeat
                }
                let frame = Frame::parse(&text)?;
                return match frame.command {
                    Command::Connected => Ok(()),
                    Command::Error => Err(Error::Rejected(
                        frame.header("message").unwrap_or("connect refused").to_string(),
                    )),
                    other => Err(Error::Protocol(format!(
                        "Unexpected {:?} before CONNECTED",
                        other
                    ))),
                };
            }
            WsMessage::Close(_) => return Err(Error::ConnectionClosed),
            _ => {}
        }
    }
    Err(Error::ConnectionClosed)
}

/// Pump one established session until it drops or is torn down
async fn run_session(
    ws: WsStream,
    event_tx: &mpsc::Sender<ChannelEvent>,
    cmd_rx: &mut mpsc::Receiver<ChannelCommand>,
) -> SessionEnd {
    let (mut sink, mut stream) = ws.split();

    loop {
        tokio::select! {
            // Inbound broadcast
            inbound = stream.next() => {
                match inbound {
                    Some(Ok(WsMessage::Text(text))) => {
                        if text.trim().is_empty() {
                            continue;
                        }
                        handle_text(&text, event_tx).await;
                    }
                    Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_))) => {}
                    Some(Ok(WsMessage::Close(_))) | None => {
                        debug!("Server closed connection");
                        return SessionEnd::Lost;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "Read error");
                        return SessionEnd::Lost;
                    }
                }
            }

            // Outgoing command
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(ChannelCommand::Publish(frame)) => {
                        if let Err(e) = sink.send(WsMessage::Text(frame.encode())).await {
                            warn!(error = %e, "Write error");
                            return SessionEnd::Lost;
                        }
                    }
                    Some(ChannelCommand::Disconnect) | None => {
                        let _ = sink.send(WsMessage::Text(Frame::disconnect().encode())).await;
                        let _ = sink.close().await;
                        debug!("Disconnect requested");
                        return SessionEnd::Teardown;
                    }
                }
            }
        }
    }
}

/// Parse errors drop the frame; they are never fatal to the channel
async fn handle_text(text: &str, event_tx: &mpsc::Sender<ChannelEvent>) {
    match Frame::parse(text) {
        Ok(frame) => match frame.command {
            Command::Message => match serde_json::from_str(&frame.body) {
                Ok(value) => {
                    let _ = event_tx.send(ChannelEvent::Frame(value)).await;
                }
                Err(e) => {
                    warn!(error = %e, "Dropping frame with invalid JSON body");
                }
            },
            Command::Error => {
                warn!(
                    message = frame.header("message").unwrap_or(""),
                    "Broker error frame"
                );
            }
            Command::Receipt => {}
            other => {
                debug!(command = ?other, "Ignoring frame");
            }
        },
        Err(e) => {
            warn!(error = %e, "Dropping unparseable frame");
        }
    }
}

/// Host portion of a ws:// or wss:// URL, for the STOMP host header
fn host_of(ws_url: &str) -> String {
    let rest = ws_url.split("://").nth(1).unwrap_or(ws_url);
    let authority = rest.split('/').next().unwrap_or(rest);
    authority
        .split(':')
        .next()
        .unwrap_or(authority)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoff::ConstantBackoff;
    use serde_json::json;
    use tokio::net::TcpListener;

    type ServerWs = WebSocketStream<TcpStream>;

    #[test]
    fn test_host_of() {
        assert_eq!(host_of("ws://localhost:8145/ws"), "localhost");
        assert_eq!(host_of("wss://chat.example.com/ws"), "chat.example.com");
    }

    async fn recv_frame(ws: &mut ServerWs) -> Frame {
        loop {
            match ws.next().await.expect("client hung up").unwrap() {
                WsMessage::Text(text) if !text.trim().is_empty() => {
                    return Frame::parse(&text).unwrap();
                }
                _ => {}
            }
        }
    }

    /// Accept one client and run the STOMP handshake + subscription
    async fn accept_session(listener: &TcpListener) -> ServerWs {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

        let connect = recv_frame(&mut ws).await;
        assert_eq!(connect.command, Command::Connect);
        assert!(connect
            .header("Authorization")
            .unwrap()
            .starts_with("Bearer "));

        ws.send(WsMessage::Text("CONNECTED\nversion:1.2\n\n\0".to_string()))
            .await
            .unwrap();

        let subscribe = recv_frame(&mut ws).await;
        assert_eq!(subscribe.command, Command::Subscribe);
        assert_eq!(subscribe.header("destination"), Some("/topic/group/7"));

        ws
    }

    fn broadcast_frame(body: &serde_json::Value) -> WsMessage {
        let frame = Frame::new(Command::Message)
            .with_header("destination", "/topic/group/7")
            .with_body(body.to_string());
        WsMessage::Text(frame.encode())
    }

    #[tokio::test]
    async fn test_subscribe_and_receive() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let mut ws = accept_session(&listener).await;
            ws.send(broadcast_frame(&json!({"id": "m1", "content": "hi", "senderId": 1})))
                .await
                .unwrap();
            // Keep the connection open until the client is done
            let _ = ws.next().await;
        });

        let mut channel = ChatChannel::connect(
            format!("ws://{}", addr),
            7,
            "tok",
            Box::new(ConstantBackoff::default()),
        );

        assert!(matches!(
            channel.next_event().await,
            Some(ChannelEvent::Subscribed)
        ));
        match channel.next_event().await {
            Some(ChannelEvent::Frame(value)) => {
                assert_eq!(value["id"], "m1");
                assert_eq!(value["content"], "hi");
            }
            other => panic!("expected frame, got {:?}", other),
        }
        assert_eq!(channel.state().await, ChannelState::Connected);

        channel.disconnect().await;
        loop {
            match channel.next_event().await {
                Some(ChannelEvent::Closed) | None => break,
                _ => {}
            }
        }
        server.abort();
    }

    #[tokio::test]
    async fn test_publish_reaches_destination() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let mut ws = accept_session(&listener).await;
            let sent = recv_frame(&mut ws).await;
            assert_eq!(sent.command, Command::Send);
            assert_eq!(sent.header("destination"), Some("/app/chat.sendMessage/7"));
            let body: serde_json::Value = serde_json::from_str(&sent.body).unwrap();
            assert_eq!(body["content"], "hello");
        });

        let mut channel = ChatChannel::connect(
            format!("ws://{}", addr),
            7,
            "tok",
            Box::new(ConstantBackoff::default()),
        );
        assert!(matches!(
            channel.next_event().await,
            Some(ChannelEvent::Subscribed)
        ));

        channel
            .publish(
                "/app/chat.sendMessage/7",
                json!({"content": "hello"}).to_string(),
            )
            .await
            .unwrap();

        server.await.unwrap();
        channel.disconnect().await;
    }

    #[tokio::test]
    async fn test_publish_fails_fast_when_disconnected() {
        // Bound but never accepted, so the handshake cannot complete
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let channel = ChatChannel::connect(
            format!("ws://{}", addr),
            7,
            "tok",
            Box::new(ConstantBackoff::default()),
        );

        let err = channel
            .publish("/app/chat.sendMessage/7", "{}".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotConnected));

        channel.disconnect().await;
    }

    #[tokio::test]
    async fn test_reconnect_resumes_delivery() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            // First session: handshake, then drop the transport
            let ws = accept_session(&listener).await;
            drop(ws);

            // Second session after the client's backoff
            let mut ws = accept_session(&listener).await;
            ws.send(broadcast_frame(&json!({"id": "m2", "content": "back"})))
                .await
                .unwrap();
            let _ = ws.next().await;
        });

        let mut channel = ChatChannel::connect(
            format!("ws://{}", addr),
            7,
            "tok",
            Box::new(ConstantBackoff::new(Duration::from_millis(50))),
        );

        assert!(matches!(
            channel.next_event().await,
            Some(ChannelEvent::Subscribed)
        ));
        assert!(matches!(
            channel.next_event().await,
            Some(ChannelEvent::Reconnecting { attempt: 1 })
        ));
        assert!(matches!(
            channel.next_event().await,
            Some(ChannelEvent::Subscribed)
        ));
        match channel.next_event().await {
            Some(ChannelEvent::Frame(value)) => assert_eq!(value["id"], "m2"),
            other => panic!("expected frame after reconnect, got {:?}", other),
        }

        channel.disconnect().await;
        server.abort();
    }
}
