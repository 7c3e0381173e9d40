//! One-way UDP relays for RTP and RTCP traffic.
//!
//! A [`UdpRelay`] owns two sockets: an inbound socket bound to a local
//! port, and an outbound socket connected to a single fixed target. Once
//! started, two threads move datagrams between them:
//!
//! ```text
//! inbound socket --recv--> [receiver] --bounded queue--> [forwarder] --send--> target
//! ```
//!
//! The queue holds up to [`QUEUE_PACKETS`] datagrams; when it is full the
//! receiver blocks, leaving further datagrams in the kernel buffer.
//!
//! Any socket error closes the relay and is kept as its terminal error.
//! Closing is idempotent and releases both sockets; datagrams still queued
//! at that point are dropped.

pub mod pair;

use std::fmt;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, bounded};
use parking_lot::{Mutex, Once};

use crate::error::{ProxyError, Result};
use crate::observe::{Finished, Observee, Tracker};
use crate::stats::Stats;

pub use pair::allocate_pair;

/// Largest datagram read from the inbound socket.
pub const BUFFER_SIZE: usize = 4096;

/// Capacity of the queue between receiver and forwarder.
pub const QUEUE_PACKETS: usize = 128;

/// How often a blocked receiver re-checks the closed flag.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Join a host and port, bracketing IPv6 literals (`[::1]:5000`).
pub fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

pub(crate) fn resolve(addr: &str) -> Result<SocketAddr> {
    let mut addrs = addr.to_socket_addrs().map_err(|e| ProxyError::Resolve {
        addr: addr.to_string(),
        reason: e.to_string(),
    })?;
    addrs.next().ok_or_else(|| ProxyError::Resolve {
        addr: addr.to_string(),
        reason: "no addresses found".to_string(),
    })
}

/// State shared between the relay handle and its two worker threads.
struct Shared {
    inbound: Mutex<Option<Arc<UdpSocket>>>,
    outbound: Mutex<Option<Arc<UdpSocket>>>,
    closed: AtomicBool,
    close_once: Once,
    error: Mutex<Option<Arc<io::Error>>>,
    stats: Stats,
    finished: Finished,
}

impl Shared {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Single-execution shutdown. `error` is `None` for caller-initiated closes.
    fn shutdown(&self, error: Option<io::Error>, label: &str) {
        self.close_once.call_once(|| {
            self.closed.store(true, Ordering::Release);
            self.inbound.lock().take();
            self.outbound.lock().take();

            match &error {
                Some(e) => tracing::error!(relay = %label, error = %e, "relay closed by I/O error"),
                None => tracing::debug!(relay = %label, "relay closed"),
            }
            *self.error.lock() = error.map(Arc::new);

            self.stats.stop();
            self.finished.finish();
        });
    }
}

/// A live UDP forwarding pipe.
pub struct UdpRelay {
    inbound_addr: SocketAddr,
    target_addr: SocketAddr,
    label: String,
    started: AtomicBool,
    workers: Mutex<Vec<JoinHandle<()>>>,
    shared: Arc<Shared>,
}

impl UdpRelay {
    /// Bind `inbound` and connect a fresh socket to `outbound`.
    ///
    /// Both addresses are `host:port` strings; the inbound host may be a
    /// wildcard. If connecting the outbound side fails, the inbound socket
    /// is released before the error is returned.
    pub fn open(inbound: &str, outbound: &str) -> Result<Self> {
        let inbound_addr = resolve(inbound)?;
        let target_addr = resolve(outbound)?;

        let inbound_socket = UdpSocket::bind(inbound_addr)?;
        inbound_socket.set_read_timeout(Some(POLL_INTERVAL))?;
        let inbound_addr = inbound_socket.local_addr()?;

        let unspecified: IpAddr = if target_addr.is_ipv4() {
            Ipv4Addr::UNSPECIFIED.into()
        } else {
            Ipv6Addr::UNSPECIFIED.into()
        };
        let outbound_socket = UdpSocket::bind(SocketAddr::new(unspecified, 0))?;
        outbound_socket
            .connect(target_addr)
            .map_err(|e| ProxyError::Connect {
                addr: target_addr.to_string(),
                reason: e.to_string(),
            })?;

        let label = format!("{} -> {}", inbound_addr, target_addr);
        tracing::debug!(relay = %label, "relay opened");

        Ok(Self {
            inbound_addr,
            target_addr,
            started: AtomicBool::new(false),
            workers: Mutex::new(Vec::new()),
            shared: Arc::new(Shared {
                inbound: Mutex::new(Some(Arc::new(inbound_socket))),
                outbound: Mutex::new(Some(Arc::new(outbound_socket))),
                closed: AtomicBool::new(false),
                close_once: Once::new(),
                error: Mutex::new(None),
                stats: Stats::new(format!("UDP relay {}", inbound_addr)),
                finished: Finished::new(),
            }),
            label,
        })
    }

    /// Launch the receiver and forwarder threads. Later calls are no-ops,
    /// as is starting a closed relay.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::AcqRel) {
            return;
        }
        let inbound = self.shared.inbound.lock().clone();
        let outbound = self.shared.outbound.lock().clone();
        let (Some(inbound), Some(outbound)) = (inbound, outbound) else {
            return;
        };

        let (tx, rx) = bounded(QUEUE_PACKETS);
        let mut workers = self.workers.lock();

        let shared = self.shared.clone();
        let label = self.label.clone();
        workers.push(thread::spawn(move || {
            receive_loop(&shared, &inbound, tx, &label);
        }));

        let shared = self.shared.clone();
        let label = self.label.clone();
        workers.push(thread::spawn(move || {
            forward_loop(&shared, &outbound, rx, &label);
        }));

        tracing::debug!(relay = %self.label, "relay started");
    }

    /// Close both sockets and stop forwarding. Idempotent and thread-safe.
    ///
    /// Returns once both worker threads have exited, so the inbound port is
    /// free to bind again.
    pub fn close(&self) {
        self.shared.shutdown(None, &self.label);
        let workers: Vec<_> = self.workers.lock().drain(..).collect();
        for worker in workers {
            let _ = worker.join();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// The error that closed the relay, or `None` if it is open or was
    /// closed by a caller.
    pub fn error(&self) -> Option<Arc<io::Error>> {
        self.shared.error.lock().clone()
    }

    /// Block up to `timeout` for the relay to close. Returns `true` if closed.
    pub fn wait_closed(&self, timeout: Duration) -> bool {
        self.shared.finished.wait_timeout(timeout)
    }

    /// Local address the relay receives on.
    pub fn inbound_addr(&self) -> SocketAddr {
        self.inbound_addr
    }

    pub fn inbound_port(&self) -> u16 {
        self.inbound_addr.port()
    }

    /// Address every datagram is forwarded to.
    pub fn target_addr(&self) -> SocketAddr {
        self.target_addr
    }

    /// Throughput counter (bytes successfully forwarded).
    pub fn stats(&self) -> &Stats {
        &self.shared.stats
    }
}

impl Observee for UdpRelay {
    fn stop(&self) {
        self.close();
    }

    fn observe(&self, tracker: &Tracker) -> Receiver<()> {
        self.shared.finished.observe(tracker)
    }
}

impl Drop for UdpRelay {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Display for UdpRelay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label)
    }
}

impl fmt::Debug for UdpRelay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UdpRelay")
            .field("inbound", &self.inbound_addr)
            .field("target", &self.target_addr)
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn receive_loop(shared: &Shared, socket: &UdpSocket, queue: Sender<Vec<u8>>, label: &str) {
    let mut buf = [0u8; BUFFER_SIZE];
    while !shared.is_closed() {
        match socket.recv_from(&mut buf) {
            Ok((n, _)) => {
                if shared.is_closed() {
                    break;
                }
                if queue.send(buf[..n].to_vec()).is_err() {
                    break;
                }
            }
            Err(ref e)
                if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut => {}
            Err(e) => {
                shared.shutdown(Some(e), label);
                break;
            }
        }
    }
    tracing::trace!(relay = %label, "receiver exited");
}

fn forward_loop(shared: &Shared, socket: &UdpSocket, queue: Receiver<Vec<u8>>, label: &str) {
    for datagram in queue.iter() {
        if shared.is_closed() {
            break;
        }
        match socket.send(&datagram) {
            Ok(sent) => shared.stats.record_now(sent as u64),
            Err(e) => {
                shared.shutdown(Some(e), label);
                break;
            }
        }
    }
    tracing::trace!(relay = %label, "forwarder exited");
}
