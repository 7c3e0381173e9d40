/// An outgoing RTSP request (RFC 2326 §6).
///
/// Serializes to the standard text format:
///
/// ```text
/// SETUP rtsp://server/movie.ts RTSP/1.0\r\n
/// CSeq: 3\r\n
/// User-Agent: amp-proxy/0.1\r\n
/// Transport: RTP/AVP;unicast;client_port=20000-20001\r\n
/// \r\n
/// ```
///
/// Uses a builder pattern: chain [`add_header`](Self::add_header), then
/// call [`serialize`](Self::serialize). `CSeq` and `User-Agent` are always
/// emitted first.
#[must_use]
#[derive(Debug, Clone)]
pub struct RtspRequest {
    /// RTSP method (DESCRIBE, SETUP, PLAY, GET_PARAMETER, TEARDOWN).
    pub method: String,
    /// Request-URI (e.g. `rtsp://host:554/movie.ts`).
    pub uri: String,
    /// Sequence number echoed by the server (RFC 2326 §12.17).
    pub cseq: u32,
    /// Additional headers as ordered (name, value) pairs.
    pub headers: Vec<(String, String)>,
}

/// Client identification string sent with every request (RFC 2326 §12.41).
pub const USER_AGENT: &str = "amp-proxy/0.1";

impl RtspRequest {
    pub fn new(method: &str, uri: &str, cseq: u32) -> Self {
        RtspRequest {
            method: method.to_string(),
            uri: uri.to_string(),
            cseq,
            headers: Vec::new(),
        }
    }

    pub fn add_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Attach the `Session` header when a session id is known.
    pub fn with_session(self, session_id: Option<&str>) -> Self {
        match session_id {
            Some(id) => self.add_header("Session", id),
            None => self,
        }
    }

    /// Serialize to the RTSP text wire format.
    pub fn serialize(&self) -> String {
        let mut request = format!("{} {} RTSP/1.0\r\n", self.method, self.uri);
        request.push_str(&format!("CSeq: {}\r\n", self.cseq));
        request.push_str(&format!("User-Agent: {}\r\n", USER_AGENT));

        for (name, value) in &self.headers {
            request.push_str(&format!("{}: {}\r\n", name, value));
        }

        request.push_str("\r\n");
        request
    }
}
