//! Exactly-once shutdown coordinator.
//!
//! A [`StopGate`] guards a cleanup routine. The first caller of
//! [`fire`](StopGate::fire) moves the gate from armed to firing with a
//! compare-and-swap and runs the routine; every other caller blocks until
//! the routine has returned and then observes the same outcome.
//!
//! ```text
//! Armed --CAS--> Firing --body returns--> Fired
//! ```

use std::sync::atomic::{AtomicU8, Ordering};

use parking_lot::{Condvar, Mutex};

const ARMED: u8 = 0;
const FIRING: u8 = 1;
const FIRED: u8 = 2;

/// Outcome recorded when the cleanup routine panics.
pub const PANICKED: &str = "cleanup panicked";

/// Result of a call to [`StopGate::fire`]. Both variants carry the error
/// captured by the cleanup routine, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Firing {
    /// This call ran the cleanup routine.
    Executed(Option<String>),
    /// Another call ran it first.
    AlreadyFired(Option<String>),
}

impl Firing {
    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Executed(e) | Self::AlreadyFired(e) => e.as_deref(),
        }
    }
}

#[derive(Debug)]
pub struct StopGate {
    state: AtomicU8,
    outcome: Mutex<Option<Option<String>>>,
    fired: Condvar,
}

impl StopGate {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(ARMED),
            outcome: Mutex::new(None),
            fired: Condvar::new(),
        }
    }

    /// Run `body` unless some caller already did. The body's return value is
    /// the captured cleanup error and is immutable afterwards.
    pub fn fire<F>(&self, body: F) -> Firing
    where
        F: FnOnce() -> Option<String>,
    {
        if self
            .state
            .compare_exchange(ARMED, FIRING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Firing::AlreadyFired(self.wait());
        }

        let guard = Unwind(self);
        let error = body();
        std::mem::forget(guard);

        self.publish(error.clone());
        Firing::Executed(error)
    }

    fn publish(&self, error: Option<String>) {
        let mut outcome = self.outcome.lock();
        *outcome = Some(error);
        self.state.store(FIRED, Ordering::Release);
        self.fired.notify_all();
    }

    /// Whether some caller has started firing the gate.
    pub fn is_triggered(&self) -> bool {
        self.state.load(Ordering::Acquire) != ARMED
    }

    /// Whether the cleanup routine has completed.
    pub fn is_fired(&self) -> bool {
        self.state.load(Ordering::Acquire) == FIRED
    }

    /// Block until the gate has fired and return the captured error.
    pub fn wait(&self) -> Option<String> {
        let mut outcome = self.outcome.lock();
        while outcome.is_none() {
            self.fired.wait(&mut outcome);
        }
        outcome.clone().flatten()
    }

    /// Captured error, or `None` if the gate has not fired or cleanup succeeded.
    pub fn error(&self) -> Option<String> {
        self.outcome.lock().clone().flatten()
    }
}

/// Publishes [`PANICKED`] if the cleanup routine unwinds, so waiters wake.
struct Unwind<'a>(&'a StopGate);

impl Drop for Unwind<'_> {
    fn drop(&mut self) {
        self.0.publish(Some(PANICKED.to_string()));
    }
}

impl Default for StopGate {
    fn default() -> Self {
        Self::new()
    }
}
