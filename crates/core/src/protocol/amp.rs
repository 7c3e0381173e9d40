//! AMP, the lightweight session-control protocol spoken by clients.
//!
//! One message per UDP datagram, in a header-framed text format:
//!
//! ```text
//! AMP/1.0 START_SESSION\r\n
//! Seq: 7\r\n
//! Receiver-Host: 127.0.0.1\r\n
//! Port: 6000\r\n
//! Media: movie.ts\r\n
//! \r\n
//! ```
//!
//! Replies use the same framing with code `OK` or `ERROR`; an error reply
//! carries a `Reason` header. The optional `Seq` header of a request is
//! echoed in its reply.
//!
//! | Code | Headers | Reply |
//! |------|---------|-------|
//! | `START_SESSION` | `Receiver-Host`, `Port`, `Media` | `OK` / `ERROR` |
//! | `STOP_SESSION` | `Receiver-Host`, `Port` | `OK` / `ERROR` |
//! | `LOAD` | `Seq-No` | none |

use std::fmt;

use crate::error::{ParseErrorKind, ProxyError, Result};

pub const VERSION: &str = "AMP/1.0";

/// AMP command or reply code.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Code {
    StartSession,
    StopSession,
    Load,
    Ok,
    Error,
    /// Any code this implementation does not know.
    Other(String),
}

impl Code {
    pub fn as_str(&self) -> &str {
        match self {
            Self::StartSession => "START_SESSION",
            Self::StopSession => "STOP_SESSION",
            Self::Load => "LOAD",
            Self::Ok => "OK",
            Self::Error => "ERROR",
            Self::Other(code) => code,
        }
    }

    pub fn parse(token: &str) -> Self {
        match token {
            "START_SESSION" => Self::StartSession,
            "STOP_SESSION" => Self::StopSession,
            "LOAD" => Self::Load,
            "OK" => Self::Ok,
            "ERROR" => Self::Error,
            other => Self::Other(other.to_string()),
        }
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded AMP message: a code plus ordered headers.
///
/// Header lookup is case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub code: Code,
    pub headers: Vec<(String, String)>,
}

impl Packet {
    pub fn new(code: Code) -> Self {
        Self {
            code,
            headers: Vec::new(),
        }
    }

    /// Success reply.
    pub fn ok() -> Self {
        Self::new(Code::Ok)
    }

    /// Error reply carrying a human-readable cause.
    pub fn error(reason: &str) -> Self {
        // Header values are single-line.
        let reason = reason.replace(['\r', '\n'], " ");
        Self::new(Code::Error).add_header("Reason", &reason)
    }

    /// Reply for a handler outcome: `OK`, or `ERROR` with the error text.
    pub fn reply_check(result: &Result<()>) -> Self {
        match result {
            Ok(()) => Self::ok(),
            Err(e) => Self::error(&e.to_string()),
        }
    }

    pub fn add_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Request sequence number, echoed in replies.
    pub fn seq(&self) -> Option<&str> {
        self.get_header("Seq")
    }

    /// `Reason` header of an error reply.
    pub fn reason(&self) -> Option<&str> {
        self.get_header("Reason")
    }

    pub fn is_ok(&self) -> bool {
        self.code == Code::Ok
    }

    /// Parse a datagram. The version token is checked loosely; a mismatch is
    /// logged but not rejected.
    pub fn parse(raw: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(raw)
            .map_err(|_| ProxyError::parse(ParseErrorKind::InvalidStartLine))?;
        let mut lines = text.lines();

        let start_line = lines
            .next()
            .filter(|l| !l.trim().is_empty())
            .ok_or(ProxyError::parse(ParseErrorKind::EmptyMessage))?;

        let parts: Vec<&str> = start_line.split_whitespace().collect();
        if parts.len() != 2 {
            return Err(ProxyError::parse(ParseErrorKind::InvalidStartLine));
        }
        if parts[0] != VERSION {
            tracing::warn!(version = parts[0], "peer sent non-AMP/1.0 version");
        }

        let mut headers = Vec::new();
        for line in lines {
            if line.is_empty() {
                break;
            }
            let colon = line
                .find(':')
                .ok_or(ProxyError::parse(ParseErrorKind::InvalidHeader))?;
            headers.push((
                line[..colon].trim().to_string(),
                line[colon + 1..].trim().to_string(),
            ));
        }

        Ok(Self {
            code: Code::parse(parts[1]),
            headers,
        })
    }

    pub fn serialize(&self) -> String {
        let mut out = format!("{} {}\r\n", VERSION, self.code);
        for (name, value) in &self.headers {
            out.push_str(&format!("{}: {}\r\n", name, value));
        }
        out.push_str("\r\n");
        out
    }

    /// Short single-line rendering for log and error messages.
    pub fn describe(&self) -> String {
        let headers: Vec<String> = self
            .headers
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        format!("{} {{{}}}", self.code, headers.join(", "))
    }
}

/// Payload of a `START_SESSION` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartSession {
    /// Host that will receive the relayed RTP/RTCP.
    pub receiver_host: String,
    /// Client RTP port; RTCP goes to `port + 1`.
    pub port: u16,
    /// Media identifier, resolved against the backend base URL.
    pub media_file: String,
}

impl StartSession {
    /// Decode from a packet, or `None` when a header is missing or invalid.
    pub fn from_packet(packet: &Packet) -> Option<Self> {
        if packet.code != Code::StartSession {
            return None;
        }
        let receiver_host = non_empty(packet.get_header("Receiver-Host")?)?;
        let port = packet.get_header("Port")?.parse().ok()?;
        let media_file = non_empty(packet.get_header("Media")?)?;
        Some(Self {
            receiver_host,
            port,
            media_file,
        })
    }

    pub fn to_packet(&self) -> Packet {
        Packet::new(Code::StartSession)
            .add_header("Receiver-Host", &self.receiver_host)
            .add_header("Port", &self.port.to_string())
            .add_header("Media", &self.media_file)
    }
}

/// Payload of a `STOP_SESSION` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopSession {
    pub receiver_host: String,
    pub port: u16,
}

impl StopSession {
    pub fn from_packet(packet: &Packet) -> Option<Self> {
        if packet.code != Code::StopSession {
            return None;
        }
        let receiver_host = non_empty(packet.get_header("Receiver-Host")?)?;
        let port = packet.get_header("Port")?.parse().ok()?;
        Some(Self {
            receiver_host,
            port,
        })
    }

    pub fn to_packet(&self) -> Packet {
        Packet::new(Code::StopSession)
            .add_header("Receiver-Host", &self.receiver_host)
            .add_header("Port", &self.port.to_string())
    }
}

/// Payload of a `LOAD` packet (synthetic traffic with a sequence number).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Load {
    pub seq: u64,
}

impl Load {
    pub fn from_packet(packet: &Packet) -> Option<Self> {
        if packet.code != Code::Load {
            return None;
        }
        let seq = packet.get_header("Seq-No")?.parse().ok()?;
        Some(Self { seq })
    }

    pub fn to_packet(&self) -> Packet {
        Packet::new(Code::Load).add_header("Seq-No", &self.seq.to_string())
    }
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}
