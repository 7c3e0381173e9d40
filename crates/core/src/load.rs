//! Synthetic load accounting.
//!
//! Load generators send `LOAD` packets with increasing sequence numbers to
//! the control port. Each packet counts as received; a forward jump in the
//! sequence counts the skipped numbers as missed. No reply is ever sent.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{ProxyError, Result};
use crate::protocol::amp::Load;
use crate::protocol::{Code, Packet};
use crate::server::{ControlServer, Handler};
use crate::stats::Stats;

/// Nominal size of one load packet, used as the unit of both counters.
pub const LOAD_PACKET_SIZE: u64 = 1;

/// Received and missed counters for one control server.
#[derive(Debug)]
pub struct LoadStats {
    received: Stats,
    missed: Stats,
    next_seq: Mutex<u64>,
}

impl LoadStats {
    fn new() -> Self {
        Self {
            received: Stats::new("Received"),
            missed: Stats::new("Missed"),
            next_seq: Mutex::new(0),
        }
    }

    /// Attach a `LOAD` handler to `server`.
    pub fn register(server: &ControlServer) -> Result<Arc<LoadStats>> {
        let stats = Arc::new(Self::new());
        let handler_stats = stats.clone();
        let handler: Handler = Arc::new(move |packet: &Packet| {
            handler_stats.handle(packet);
            None
        });

        let mut handlers = HashMap::new();
        handlers.insert(Code::Load, handler);
        server.register_handlers(handlers)?;
        Ok(stats)
    }

    fn handle(&self, packet: &Packet) {
        match Load::from_packet(packet) {
            Some(load) => self.add(load.seq),
            None => {
                let err = ProxyError::IllegalValue {
                    code: packet.code.to_string(),
                    value: packet.describe(),
                };
                tracing::warn!(error = %err, "ignoring load packet");
            }
        }
    }

    fn add(&self, seq: u64) {
        self.received.record_now(LOAD_PACKET_SIZE);

        let mut next = self.next_seq.lock();
        if seq > *next {
            self.missed.record_now((seq - *next) * LOAD_PACKET_SIZE);
        } else if seq < *next {
            tracing::warn!(expected = *next, got = seq, "load sequence jumped backwards");
        }
        *next = seq.saturating_add(1);
    }

    pub fn received(&self) -> &Stats {
        &self.received
    }

    pub fn missed(&self) -> &Stats {
        &self.missed
    }

    /// Freeze both counters.
    pub fn stop(&self) {
        self.received.stop();
        self.missed.stop();
    }
}
