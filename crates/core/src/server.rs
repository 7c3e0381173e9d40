use std::collections::HashMap;
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};

use crate::error::{ProxyError, Result};
use crate::protocol::{Code, Packet};

/// Largest control datagram accepted.
const MAX_DATAGRAM: usize = 4096;

/// How often the receive loop re-checks the running flag.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Handles one request. `None` means no reply is sent.
pub type Handler = Arc<dyn Fn(&Packet) -> Option<Packet> + Send + Sync>;

/// Handlers keyed by the request code they serve.
pub type HandlerMap = HashMap<Code, Handler>;

/// UDP control endpoint for the AMP protocol.
///
/// Receives one request per datagram, dispatches it by [`Code`] to a
/// registered [`Handler`] and sends the handler's reply back to the
/// sender, echoing the request's `Seq` header. Requests are handled one
/// at a time in arrival order.
pub struct ControlServer {
    socket: Arc<UdpSocket>,
    local_addr: SocketAddr,
    handlers: Arc<RwLock<HandlerMap>>,
    running: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ControlServer {
    /// Bind the control socket. Requests are not served until
    /// [`start`](Self::start).
    pub fn bind(addr: &str) -> Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_read_timeout(Some(POLL_INTERVAL))?;
        let local_addr = socket.local_addr()?;

        Ok(Self {
            socket: Arc::new(socket),
            local_addr,
            handlers: Arc::new(RwLock::new(HashMap::new())),
            running: Arc::new(AtomicBool::new(false)),
            worker: Mutex::new(None),
        })
    }

    /// Add handlers. Fails without registering anything if any code
    /// already has a handler.
    pub fn register_handlers(&self, handlers: HandlerMap) -> Result<()> {
        let mut registered = self.handlers.write();
        if let Some(code) = handlers.keys().find(|code| registered.contains_key(*code)) {
            return Err(ProxyError::HandlerExists(code.to_string()));
        }
        registered.extend(handlers);
        Ok(())
    }

    pub fn start(&self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(ProxyError::AlreadyRunning);
        }

        let socket = self.socket.clone();
        let handlers = self.handlers.clone();
        let running = self.running.clone();

        tracing::info!(addr = %self.local_addr, "AMP control server listening");

        let handle = thread::spawn(move || serve_loop(socket, handlers, running));
        *self.worker.lock() = Some(handle);
        Ok(())
    }

    /// Stop receiving requests and wait for the receive loop to exit.
    /// A request being handled is finished first.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let worker = self.worker.lock().take();
        if let Some(handle) = worker {
            let _ = handle.join();
            tracing::info!(addr = %self.local_addr, "AMP control server stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl Drop for ControlServer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Pause before the next receive after `error`. Read timeouts are the
/// normal poll tick and need none.
fn recv_backoff(error: &io::Error) -> Option<Duration> {
    match error.kind() {
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => None,
        _ => Some(POLL_INTERVAL),
    }
}

fn serve_loop(socket: Arc<UdpSocket>, handlers: Arc<RwLock<HandlerMap>>, running: Arc<AtomicBool>) {
    let mut buf = [0u8; MAX_DATAGRAM];

    while running.load(Ordering::SeqCst) {
        let (n, source) = match socket.recv_from(&mut buf) {
            Ok(received) => received,
            Err(e) => {
                if let Some(pause) = recv_backoff(&e) {
                    if running.load(Ordering::SeqCst) {
                        tracing::warn!(error = %e, "AMP receive error");
                    }
                    thread::sleep(pause);
                }
                continue;
            }
        };

        let request = match Packet::parse(&buf[..n]) {
            Ok(packet) => packet,
            Err(e) => {
                tracing::warn!(%source, error = %e, "dropping malformed AMP packet");
                continue;
            }
        };
        tracing::debug!(%source, request = %request.describe(), "AMP request");

        let handler = handlers.read().get(&request.code).cloned();
        let Some(handler) = handler else {
            tracing::warn!(%source, code = %request.code, "no handler for AMP request");
            continue;
        };

        let Some(mut reply) = handler(&request) else {
            continue;
        };
        if let Some(seq) = request.seq() {
            reply = reply.add_header("Seq", seq);
        }
        if let Err(e) = socket.send_to(reply.serialize().as_bytes(), source) {
            tracing::warn!(%source, error = %e, "failed to send AMP reply");
        }
    }
    tracing::debug!("AMP receive loop exited");
}
