//! Completion tracking for long-running workers.
//!
//! An [`Observee`] is anything that can be asked to stop and that reports
//! when it has actually finished. Observers hand it a shared [`Tracker`]:
//! the tracker counts every observee registered with it and
//! [`Tracker::wait`] blocks until all of them are done. Registration also
//! yields a one-shot signal per observee so a watcher can wake up as soon as
//! *any* of them finishes ([`wait_any`]).
//!
//! Implementors normally embed a [`Finished`] latch and delegate
//! [`Observee::observe`] to it.

use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, Select, Sender, bounded};
use parking_lot::{Condvar, Mutex};

/// Counts outstanding observees, like a wait group.
#[derive(Debug, Clone, Default)]
pub struct Tracker {
    inner: Arc<TrackerInner>,
}

#[derive(Debug, Default)]
struct TrackerInner {
    pending: Mutex<usize>,
    idle: Condvar,
}

impl Tracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self) {
        *self.inner.pending.lock() += 1;
    }

    pub fn done(&self) {
        let mut pending = self.inner.pending.lock();
        *pending = pending.saturating_sub(1);
        if *pending == 0 {
            self.inner.idle.notify_all();
        }
    }

    /// Number of registered observees that have not finished yet.
    pub fn pending(&self) -> usize {
        *self.inner.pending.lock()
    }

    /// Block until every registered observee has finished.
    pub fn wait(&self) {
        let mut pending = self.inner.pending.lock();
        while *pending > 0 {
            self.inner.idle.wait(&mut pending);
        }
    }

    /// Like [`wait`](Self::wait), bounded by `timeout`. Returns `true` if idle.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut pending = self.inner.pending.lock();
        if *pending > 0 {
            self.inner
                .idle
                .wait_while_for(&mut pending, |p| *p > 0, timeout);
        }
        *pending == 0
    }
}

/// A unit of work whose completion can be awaited and which can be asked to stop.
pub trait Observee: Send + Sync {
    /// Request the observee to stop. Must be idempotent. Completion is
    /// reported through [`observe`](Self::observe), not by returning.
    fn stop(&self);

    /// Register with `tracker` and return a signal that fires once this
    /// observee has finished. Registering after completion fires immediately.
    fn observe(&self, tracker: &Tracker) -> Receiver<()>;
}

/// One-shot completion latch.
#[derive(Debug, Default)]
pub struct Finished {
    state: Mutex<FinishedState>,
    changed: Condvar,
}

#[derive(Debug, Default)]
struct FinishedState {
    done: bool,
    trackers: Vec<Tracker>,
    signals: Vec<Sender<()>>,
}

impl Finished {
    pub fn new() -> Self {
        Self::default()
    }

    /// See [`Observee::observe`].
    pub fn observe(&self, tracker: &Tracker) -> Receiver<()> {
        let (tx, rx) = bounded(1);
        tracker.add();

        let mut state = self.state.lock();
        if state.done {
            drop(state);
            tracker.done();
            let _ = tx.send(());
        } else {
            state.trackers.push(tracker.clone());
            state.signals.push(tx);
        }
        rx
    }

    /// Mark as finished, notifying every tracker and signal registered so
    /// far. Returns `false` if it was already finished.
    pub fn finish(&self) -> bool {
        let (trackers, signals) = {
            let mut state = self.state.lock();
            if state.done {
                return false;
            }
            state.done = true;
            self.changed.notify_all();
            (
                std::mem::take(&mut state.trackers),
                std::mem::take(&mut state.signals),
            )
        };

        for tracker in trackers {
            tracker.done();
        }
        for signal in signals {
            let _ = signal.send(());
        }
        true
    }

    pub fn is_finished(&self) -> bool {
        self.state.lock().done
    }

    /// Block up to `timeout` for completion. Returns `true` if finished.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut state = self.state.lock();
        if !state.done {
            self.changed
                .wait_while_for(&mut state, |s| !s.done, timeout);
        }
        state.done
    }
}

/// Register every observee with `tracker`, returning their completion signals
/// in the same order.
pub fn observe_all(tracker: &Tracker, observees: &[Arc<dyn Observee>]) -> Vec<Receiver<()>> {
    observees.iter().map(|o| o.observe(tracker)).collect()
}

/// Block until any of `signals` fires (or its observee is dropped).
/// Returns the index of the signal that fired, or `None` when empty.
pub fn wait_any(signals: &[Receiver<()>]) -> Option<usize> {
    if signals.is_empty() {
        return None;
    }
    let mut select = Select::new();
    for signal in signals {
        select.recv(signal);
    }
    let op = select.select();
    let index = op.index();
    // Disconnection counts as completion too.
    let _ = op.recv(&signals[index]);
    Some(index)
}

/// [`observe_all`] followed by [`wait_any`].
pub fn wait_for_any(tracker: &Tracker, observees: &[Arc<dyn Observee>]) -> Option<usize> {
    wait_any(&observe_all(tracker, observees))
}
