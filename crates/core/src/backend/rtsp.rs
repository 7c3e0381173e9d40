//! RTSP backend client.
//!
//! Drives one backend session over a dedicated TCP connection:
//!
//! ```text
//! connect -> DESCRIBE -> SETUP (client_port=rtp-rtcp) -> PLAY
//!         -> [reader thread]    consumes responses until EOF or error
//!         -> [keepalive thread] GET_PARAMETER every timeout/2
//! stop()  -> TEARDOWN, socket shutdown, keepalive stopped
//! ```
//!
//! The session counts as finished when the reader thread exits, which
//! happens both when the server hangs up and after [`stop`](RtspClient::stop)
//! shuts the socket down.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::net::{Shutdown, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use parking_lot::Mutex;
use url::Url;

use super::{Backend, Connector};
use crate::error::{ProxyError, Result};
use crate::observe::{Finished, Observee, Tracker};
use crate::protocol::rtsp::response::DEFAULT_SESSION_TIMEOUT_SECS;
use crate::protocol::rtsp::{RtspRequest, RtspResponse, TransportHeader};
use crate::relay::{join_host_port, resolve};

/// Well-known RTSP port (RFC 2326 §3.2).
pub const DEFAULT_RTSP_PORT: u16 = 554;

/// Opens [`RtspClient`] sessions.
#[derive(Debug, Clone)]
pub struct RtspConnector {
    /// Limit for establishing the TCP connection.
    pub connect_timeout: Duration,
    /// Limit for each handshake response.
    pub response_timeout: Duration,
}

impl Default for RtspConnector {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            response_timeout: Duration::from_secs(5),
        }
    }
}

impl Connector for RtspConnector {
    type Client = RtspClient;

    fn start(
        &self,
        media_url: &Url,
        rtp_port: u16,
        log_file: Option<PathBuf>,
    ) -> Result<Arc<RtspClient>> {
        RtspClient::start(self, media_url, rtp_port, log_file)
    }
}

/// Append-only record of the control exchange.
struct Transcript {
    file: Mutex<File>,
}

impl Transcript {
    fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }

    fn record(&self, direction: &str, text: &str) {
        let mut file = self.file.lock();
        let _ = writeln!(file, "{} {}", direction, text.trim_end());
    }
}

/// One backend RTSP session.
pub struct RtspClient {
    media_url: String,
    rtp_port: u16,
    session_id: Mutex<Option<String>>,
    writer: Mutex<TcpStream>,
    cseq: AtomicU32,
    stopped: AtomicBool,
    keepalive: Mutex<Option<Sender<()>>>,
    finished: Finished,
    transcript: Option<Transcript>,
}

impl RtspClient {
    /// Connect and run DESCRIBE/SETUP/PLAY. Fails if any step does not get
    /// a 2xx reply.
    pub fn start(
        connector: &RtspConnector,
        media_url: &Url,
        rtp_port: u16,
        log_file: Option<PathBuf>,
    ) -> Result<Arc<Self>> {
        let host = media_url.host_str().ok_or_else(|| ProxyError::InvalidUrl {
            url: media_url.to_string(),
            reason: "missing host".to_string(),
        })?;
        let port = media_url.port().unwrap_or(DEFAULT_RTSP_PORT);
        let addr = resolve(&join_host_port(host, port))?;

        let stream = TcpStream::connect_timeout(&addr, connector.connect_timeout)?;
        stream.set_read_timeout(Some(connector.response_timeout))?;
        stream.set_nodelay(true)?;
        let mut reader = BufReader::new(stream.try_clone()?);

        let transcript = log_file.and_then(|path| match Transcript::open(&path) {
            Ok(t) => Some(t),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "cannot open RTSP transcript");
                None
            }
        });

        let client = Arc::new(RtspClient {
            media_url: media_url.to_string(),
            rtp_port,
            session_id: Mutex::new(None),
            writer: Mutex::new(stream),
            cseq: AtomicU32::new(1),
            stopped: AtomicBool::new(false),
            keepalive: Mutex::new(None),
            finished: Finished::new(),
            transcript,
        });

        let url = client.media_url.clone();

        let describe = RtspRequest::new("DESCRIBE", &url, client.next_cseq())
            .add_header("Accept", "application/sdp");
        client.exchange(&mut reader, describe)?;

        let setup = RtspRequest::new("SETUP", &url, client.next_cseq()).add_header(
            "Transport",
            &TransportHeader::unicast(rtp_port).to_header_value(),
        );
        let setup = client.exchange(&mut reader, setup)?;
        let timeout = setup
            .session_timeout()
            .unwrap_or(DEFAULT_SESSION_TIMEOUT_SECS);
        *client.session_id.lock() = setup.session_id().map(str::to_string);
        if let Some(transport) = setup.get_header("Transport").and_then(TransportHeader::parse) {
            tracing::debug!(url = %url, server_ports = ?transport.server_ports, "backend transport negotiated");
        }

        let session = client.session_id.lock().clone();
        let play = RtspRequest::new("PLAY", &url, client.next_cseq())
            .with_session(session.as_deref())
            .add_header("Range", "npt=0.000-");
        client.exchange(&mut reader, play)?;

        // Responses from now on arrive whenever; block indefinitely.
        reader.get_ref().set_read_timeout(None)?;

        let (stop_tx, stop_rx) = bounded(1);
        *client.keepalive.lock() = Some(stop_tx);

        let interval = Duration::from_secs((timeout / 2).max(1));
        let keepalive = client.clone();
        thread::spawn(move || keepalive.keepalive_loop(stop_rx, interval));

        let monitor = client.clone();
        thread::spawn(move || monitor.read_loop(reader));

        tracing::info!(url = %url, rtp_port, session = ?session, "RTSP session playing");
        Ok(client)
    }

    /// Backend session id from SETUP, if the server sent one.
    pub fn session_id(&self) -> Option<String> {
        self.session_id.lock().clone()
    }

    pub fn is_finished(&self) -> bool {
        self.finished.is_finished()
    }

    /// Send TEARDOWN and close the connection. Idempotent.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }

        let session = self.session_id();
        let teardown = RtspRequest::new("TEARDOWN", &self.media_url, self.next_cseq())
            .with_session(session.as_deref());
        if let Err(e) = self.send(&teardown) {
            tracing::debug!(url = %self.media_url, error = %e, "TEARDOWN not delivered");
        }

        self.stop_keepalive();
        let _ = self.writer.lock().shutdown(Shutdown::Both);
        tracing::debug!(url = %self.media_url, "RTSP session stop requested");
    }

    fn next_cseq(&self) -> u32 {
        self.cseq.fetch_add(1, Ordering::Relaxed)
    }

    fn send(&self, request: &RtspRequest) -> Result<()> {
        let text = request.serialize();
        if let Some(t) = &self.transcript {
            t.record(">>>", &text);
        }
        self.writer.lock().write_all(text.as_bytes())?;
        Ok(())
    }

    fn exchange<R: BufRead>(&self, reader: &mut R, request: RtspRequest) -> Result<RtspResponse> {
        self.send(&request)?;
        tracing::debug!(method = %request.method, uri = %request.uri, cseq = request.cseq, "RTSP request");

        let response = RtspResponse::read_from(reader)?.ok_or_else(|| {
            ProxyError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed by server",
            ))
        })?;
        self.record_response(&response);

        if !response.is_success() {
            return Err(ProxyError::RtspStatus {
                method: request.method,
                status: response.status_code,
                reason: response.status_text,
            });
        }
        Ok(response)
    }

    fn record_response(&self, response: &RtspResponse) {
        if let Some(t) = &self.transcript {
            t.record("<<<", &response.status_line());
        }
    }

    fn stop_keepalive(&self) {
        // Dropping the sender wakes the keepalive thread.
        self.keepalive.lock().take();
    }

    fn keepalive_loop(&self, stop: Receiver<()>, interval: Duration) {
        loop {
            match stop.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) => {
                    if self.stopped.load(Ordering::Acquire) {
                        break;
                    }
                    let session = self.session_id();
                    let request = RtspRequest::new("GET_PARAMETER", &self.media_url, self.next_cseq())
                        .with_session(session.as_deref());
                    tracing::trace!(url = %self.media_url, "GET_PARAMETER keepalive");
                    if let Err(e) = self.send(&request) {
                        tracing::debug!(url = %self.media_url, error = %e, "keepalive failed");
                        break;
                    }
                }
                _ => break,
            }
        }
    }

    fn read_loop(&self, mut reader: BufReader<TcpStream>) {
        let reason = loop {
            match RtspResponse::read_from(&mut reader) {
                Ok(Some(response)) => {
                    self.record_response(&response);
                    if response.is_success() {
                        tracing::trace!(url = %self.media_url, cseq = ?response.cseq(), "RTSP response");
                    } else {
                        tracing::warn!(
                            url = %self.media_url,
                            status = response.status_code,
                            reason = %response.status_text,
                            "backend rejected request"
                        );
                    }
                }
                Ok(None) => break "connection closed",
                Err(e) => {
                    if !self.stopped.load(Ordering::Acquire) {
                        tracing::debug!(url = %self.media_url, error = %e, "RTSP read error");
                    }
                    break "read error";
                }
            }
        };

        self.stop_keepalive();
        let stopped = self.stopped.load(Ordering::Acquire);
        tracing::info!(url = %self.media_url, rtp_port = self.rtp_port, reason, stopped, "RTSP session ended");
        self.finished.finish();
    }
}

impl Observee for RtspClient {
    fn stop(&self) {
        RtspClient::stop(self);
    }

    fn observe(&self, tracker: &Tracker) -> Receiver<()> {
        self.finished.observe(tracker)
    }
}

impl Backend for RtspClient {
    fn media_url(&self) -> &str {
        &self.media_url
    }

    fn rtp_port(&self) -> u16 {
        self.rtp_port
    }
}

impl fmt::Display for RtspClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RTSP {} -> rtp port {}", self.media_url, self.rtp_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread::JoinHandle;

    #[derive(Clone, Copy, PartialEq)]
    enum Behavior {
        Normal,
        RejectSetup,
        HangUpAfterPlay,
    }

    struct FakeServer {
        url: Url,
        requests: Arc<Mutex<Vec<String>>>,
        handle: JoinHandle<()>,
    }

    fn read_request<R: BufRead>(reader: &mut R) -> Option<String> {
        let mut request = String::new();
        loop {
            let mut line = String::new();
            match reader.read_line(&mut line) {
                Ok(0) | Err(_) => return None,
                Ok(_) => {
                    request.push_str(&line);
                    if line == "\r\n" {
                        return Some(request);
                    }
                }
            }
        }
    }

    fn spawn_server(behavior: Behavior) -> FakeServer {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = Url::parse(&format!("rtsp://{}/movie.ts", listener.local_addr().unwrap())).unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let seen = requests.clone();

        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            while let Some(request) = read_request(&mut reader) {
                let method = request.split_whitespace().next().unwrap_or("").to_string();
                let cseq = request
                    .lines()
                    .find_map(|l| l.strip_prefix("CSeq: "))
                    .unwrap_or("0")
                    .to_string();
                seen.lock().push(request);

                let reply = match method.as_str() {
                    "DESCRIBE" => format!(
                        "RTSP/1.0 200 OK\r\nCSeq: {cseq}\r\nContent-Length: 5\r\n\r\nv=0\r\n"
                    ),
                    "SETUP" if behavior == Behavior::RejectSetup => {
                        format!("RTSP/1.0 404 Not Found\r\nCSeq: {cseq}\r\n\r\n")
                    }
                    "SETUP" => format!(
                        "RTSP/1.0 200 OK\r\nCSeq: {cseq}\r\nSession: CAFE;timeout=60\r\n\r\n"
                    ),
                    _ => format!("RTSP/1.0 200 OK\r\nCSeq: {cseq}\r\n\r\n"),
                };
                let _ = stream.write_all(reply.as_bytes());

                if method == "TEARDOWN" || (method == "PLAY" && behavior == Behavior::HangUpAfterPlay) {
                    break;
                }
            }
        });

        FakeServer {
            url,
            requests,
            handle,
        }
    }

    fn methods(server: &FakeServer) -> Vec<String> {
        server
            .requests
            .lock()
            .iter()
            .map(|r| r.split_whitespace().next().unwrap_or("").to_string())
            .collect()
    }

    #[test]
    fn handshake_then_teardown_on_stop() {
        let server = spawn_server(Behavior::Normal);
        let client = RtspConnector::default().start(&server.url, 20000, None).unwrap();

        assert_eq!(client.session_id().as_deref(), Some("CAFE"));
        assert_eq!(methods(&server), vec!["DESCRIBE", "SETUP", "PLAY"]);
        let setup = server.requests.lock()[1].clone();
        assert!(setup.contains("Transport: RTP/AVP;unicast;client_port=20000-20001\r\n"));
        let play = server.requests.lock()[2].clone();
        assert!(play.contains("Session: CAFE\r\n"));

        let tracker = Tracker::new();
        let signal = client.observe(&tracker);
        client.stop();
        client.stop();
        assert!(signal.recv_timeout(Duration::from_secs(2)).is_ok());
        assert!(client.is_finished());

        let requests = server.requests.clone();
        server.handle.join().unwrap();
        let last = requests.lock().last().cloned().unwrap();
        assert!(last.starts_with("TEARDOWN "));
    }

    #[test]
    fn server_hangup_finishes_session() {
        let server = spawn_server(Behavior::HangUpAfterPlay);
        let client = RtspConnector::default().start(&server.url, 20010, None).unwrap();

        assert!(client.finished.wait_timeout(Duration::from_secs(2)));
        server.handle.join().unwrap();
        // Stopping after the peer left is harmless.
        client.stop();
    }

    #[test]
    fn rejected_setup_fails_start() {
        let server = spawn_server(Behavior::RejectSetup);
        let err = RtspConnector::default()
            .start(&server.url, 20020, None)
            .err()
            .unwrap();
        match err {
            ProxyError::RtspStatus { method, status, .. } => {
                assert_eq!(method, "SETUP");
                assert_eq!(status, 404);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn unreachable_backend_fails_start() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let url = Url::parse(&format!("rtsp://127.0.0.1:{port}/movie.ts")).unwrap();
        let err = RtspConnector::default().start(&url, 20030, None).err().unwrap();
        assert!(matches!(err, ProxyError::Io(_)));
    }

    #[test]
    fn transcript_records_exchange() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.log");
        let server = spawn_server(Behavior::Normal);

        let client = RtspConnector::default()
            .start(&server.url, 20040, Some(path.clone()))
            .unwrap();
        client.stop();
        assert!(client.finished.wait_timeout(Duration::from_secs(2)));
        server.handle.join().unwrap();

        let log = std::fs::read_to_string(&path).unwrap();
        assert!(log.contains(">>> DESCRIBE"));
        assert!(log.contains(">>> TEARDOWN"));
        assert!(log.contains("<<< RTSP/1.0 200 OK"));
    }

    #[test]
    fn display_names_url_and_port() {
        let server = spawn_server(Behavior::HangUpAfterPlay);
        let client = RtspConnector::default().start(&server.url, 20050, None).unwrap();
        assert_eq!(
            client.to_string(),
            format!("RTSP {} -> rtp port 20050", server.url)
        );
        assert_eq!(client.rtp_port(), 20050);
        client.stop();
        server.handle.join().unwrap();
    }
}
