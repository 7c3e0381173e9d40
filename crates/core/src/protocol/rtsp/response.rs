use std::io::BufRead;

use crate::error::{ParseErrorKind, ProxyError, Result};

/// A parsed RTSP response (RFC 2326 §7).
///
/// ```text
/// RTSP-Version SP Status-Code SP Reason-Phrase CRLF
/// *(Header: Value CRLF)
/// CRLF
/// [body of Content-Length bytes]
/// ```
///
/// Header lookup is case-insensitive per RFC 2326 §4.2.
#[derive(Debug, Clone)]
pub struct RtspResponse {
    pub version: String,
    pub status_code: u16,
    pub status_text: String,
    /// Headers as ordered (name, value) pairs, names as received.
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

/// Session timeout assumed when the server does not announce one (RFC 2326 §12.37).
pub const DEFAULT_SESSION_TIMEOUT_SECS: u64 = 60;

impl RtspResponse {
    /// Read one complete response from `reader`.
    ///
    /// Returns `Ok(None)` on a clean end of stream before any byte of a new
    /// response was read.
    pub fn read_from<R: BufRead>(reader: &mut R) -> Result<Option<Self>> {
        let mut head = String::new();
        loop {
            let mut line = String::new();
            if reader.read_line(&mut line)? == 0 {
                if head.trim().is_empty() {
                    return Ok(None);
                }
                return Err(ProxyError::parse(ParseErrorKind::Truncated));
            }
            if (line == "\r\n" || line == "\n") && head.trim().is_empty() {
                // Stray blank line between messages.
                head.clear();
                continue;
            }
            head.push_str(&line);
            if line == "\r\n" || line == "\n" {
                break;
            }
        }

        let mut response = Self::parse_head(&head)?;

        if let Some(len) = response
            .get_header("Content-Length")
            .and_then(|v| v.parse::<usize>().ok())
            && len > 0
        {
            let mut body = vec![0u8; len];
            reader
                .read_exact(&mut body)
                .map_err(|_| ProxyError::parse(ParseErrorKind::Truncated))?;
            response.body = Some(String::from_utf8_lossy(&body).into_owned());
        }

        Ok(Some(response))
    }

    /// Parse the status line and headers.
    pub fn parse_head(raw: &str) -> Result<Self> {
        let mut lines = raw.lines();

        let status_line = lines
            .next()
            .ok_or(ProxyError::parse(ParseErrorKind::EmptyMessage))?;

        let mut parts = status_line.splitn(3, ' ');
        let version = parts.next().unwrap_or_default().to_string();
        let status_code = parts
            .next()
            .and_then(|code| code.parse::<u16>().ok())
            .ok_or(ProxyError::parse(ParseErrorKind::InvalidStartLine))?;
        let status_text = parts.next().unwrap_or_default().trim().to_string();

        if !version.starts_with("RTSP/") {
            return Err(ProxyError::parse(ParseErrorKind::InvalidStartLine));
        }

        let mut headers = Vec::new();
        for line in lines {
            if line.is_empty() {
                break;
            }

            let colon_pos = line
                .find(':')
                .ok_or(ProxyError::parse(ParseErrorKind::InvalidHeader))?;

            let name = line[..colon_pos].trim().to_string();
            let value = line[colon_pos + 1..].trim().to_string();

            headers.push((name, value));
        }

        Ok(RtspResponse {
            version,
            status_code,
            status_text,
            headers,
            body: None,
        })
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }

    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn cseq(&self) -> Option<u32> {
        self.get_header("CSeq").and_then(|v| v.parse().ok())
    }

    /// Session ID from the `Session` header, without the timeout suffix:
    /// `"SESSIONID;timeout=60"` -> `"SESSIONID"`.
    pub fn session_id(&self) -> Option<&str> {
        self.get_header("Session")
            .map(|s| s.split(';').next().unwrap_or(s).trim())
            .filter(|s| !s.is_empty())
    }

    /// Session timeout announced in the `Session` header, in seconds.
    pub fn session_timeout(&self) -> Option<u64> {
        self.get_header("Session")?
            .split(';')
            .skip(1)
            .find_map(|param| param.trim().strip_prefix("timeout="))
            .and_then(|v| v.trim().parse().ok())
    }

    /// Short rendering of the status line for logs and transcripts.
    pub fn status_line(&self) -> String {
        format!("{} {} {}", self.version, self.status_code, self.status_text)
    }
}
