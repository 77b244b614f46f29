//! STOMP frame encoding/decoding
//!
//! Wire format: COMMAND line, `name:value` header lines, blank line,
//! body, NUL terminator. Implements the client subset the broker needs:
//! CONNECT/SUBSCRIBE/SEND/DISCONNECT out, CONNECTED/MESSAGE/ERROR/RECEIPT
//! in. Heartbeat frames (a bare newline) are filtered before parsing.

use crate::error::{Error, Result};

/// STOMP frame commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Connect,
    Connected,
    Subscribe,
    Send,
    Message,
    Error,
    Receipt,
    Disconnect,
}

impl Command {
    fn as_str(self) -> &'static str {
        match self {
            Command::Connect => "CONNECT",
            Command::Connected => "CONNECTED",
            Command::Subscribe => "SUBSCRIBE",
            Command::Send => "SEND",
            Command::Message => "MESSAGE",
            Command::Error => "ERROR",
            Command::Receipt => "RECEIPT",
            Command::Disconnect => "DISCONNECT",
        }
    }

    fn parse(input: &str) -> Result<Self> {
        match input {
            "CONNECT" => Ok(Command::Connect),
            "CONNECTED" => Ok(Command::Connected),
            "SUBSCRIBE" => Ok(Command::Subscribe),
            "SEND" => Ok(Command::Send),
            "MESSAGE" => Ok(Command::Message),
            "ERROR" => Ok(Command::Error),
            "RECEIPT" => Ok(Command::Receipt),
            "DISCONNECT" => Ok(Command::Disconnect),
            other => Err(Error::Protocol(format!("Unknown STOMP command: {}", other))),
        }
    }
}

/// One STOMP frame
#[derive(Debug, Clone)]
pub struct Frame {
    pub command: Command,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl Frame {
    pub fn new(command: Command) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn with_body(mut self, body: String) -> Self {
        self.body = body;
        self
    }

    /// First header with the given name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// CONNECT with the bearer credential as a protocol header
    pub fn connect(host: &str, token: &str) -> Self {
        Frame::new(Command::Connect)
            .with_header("accept-version", "1.1,1.2")
            .with_header("host", host)
            .with_header("heart-beat", "0,0")
            .with_header("Authorization", &format!("Bearer {}", token))
    }

    pub fn subscribe(id: &str, destination: &str) -> Self {
        Frame::new(Command::Subscribe)
            .with_header("id", id)
            .with_header("destination", destination)
    }

    pub fn send(destination: &str, body: String) -> Self {
        Frame::new(Command::Send)
            .with_header("destination", destination)
            .with_header("content-type", "application/json")
            .with_body(body)
    }

    pub fn disconnect() -> Self {
        Frame::new(Command::Disconnect)
    }

    /// Serialize to the wire representation
    pub fn encode(&self) -> String {
        let mut out = String::new();
        out.push_str(self.command.as_str());
        out.push('\n');
        for (name, value) in &self.headers {
            out.push_str(name);
            out.push(':');
            out.push_str(value);
            out.push('\n');
        }
        if !self.body.is_empty() {
            out.push_str(&format!("content-length:{}\n", self.body.len()));
        }
        out.push('\n');
        out.push_str(&self.body);
        out.push('\0');
        out
    }

    /// Parse one frame from its wire representation
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim_start_matches(['\r', '\n']);
        if input.is_empty() {
            return Err(Error::Protocol("Empty frame".to_string()));
        }

        let (head, body) = match input.split_once("\r\n\r\n") {
            Some(parts) => parts,
            None => input
                .split_once("\n\n")
                .ok_or_else(|| Error::Protocol("Frame without header terminator".to_string()))?,
        };

        let mut lines = head.lines();
        let command = Command::parse(
            lines
                .next()
                .ok_or_else(|| Error::Protocol("Frame without command".to_string()))?
                .trim_end_matches('\r'),
        )?;

        let mut headers = Vec::new();
        for line in lines {
            let line = line.trim_end_matches('\r');
            if line.is_empty() {
                continue;
            }
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| Error::Protocol(format!("Malformed header: {}", line)))?;
            headers.push((name.to_string(), value.to_string()));
        }

        Ok(Self {
            command,
            headers,
            body: body.trim_end_matches('\0').to_string(),
        })
    }
}
