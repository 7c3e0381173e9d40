//! Keyed registry of long-lived sessions.
//!
//! Each entry couples a user-supplied [`Session`] with bookkeeping:
//!
//! - a [`Tracker`] shared with every observee the session declares,
//! - a [`StopGate`] that runs the shutdown sequence exactly once,
//! - the cleanup error captured when the gate fired.
//!
//! ## Entry lifecycle
//!
//! ```text
//! register   -> observees registered, session started, watcher spawned
//! observee finishes -> watcher fires the gate (entry stays until stop_one)
//! stop_one   -> gate fired (or "stopped prematurely"), entry removed
//! stop_all   -> every gate fired, every entry removed
//! ```
//!
//! Firing the gate stops every observee, waits on the tracker until all of
//! them have finished, then runs [`Session::cleanup`].

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::thread;

use crate::error::{ProxyError, Result};
use crate::gate::{Firing, StopGate};
use crate::observe::{Observee, Tracker, observe_all, wait_any};

/// Capability contract for anything managed by a [`SessionRegistry`].
pub trait Session: Send + Sync + 'static {
    /// Called once, right after the session is registered.
    fn start(&self);

    /// Workers whose completion ends the session. May be empty.
    fn observees(&self) -> Vec<Arc<dyn Observee>>;

    /// Release the session's resources. Runs exactly once, after every
    /// observee has finished.
    fn cleanup(&self) -> Result<()>;
}

/// Registry record for one session.
pub struct SessionEntry<S> {
    session: Arc<S>,
    tracker: Tracker,
    gate: StopGate,
}

impl<S: Session> SessionEntry<S> {
    fn new(session: Arc<S>) -> Self {
        Self {
            session,
            tracker: Tracker::new(),
            gate: StopGate::new(),
        }
    }

    pub fn session(&self) -> &Arc<S> {
        &self.session
    }

    /// Whether the stop gate has been triggered.
    pub fn is_stopped(&self) -> bool {
        self.gate.is_triggered()
    }

    /// Error captured by cleanup, if the gate fired and cleanup failed.
    pub fn cleanup_error(&self) -> Option<String> {
        self.gate.error()
    }

    /// Fire the stop gate. Safe to call from any number of threads.
    pub fn stop(&self) -> Firing {
        self.gate.fire(|| {
            for observee in self.session.observees() {
                observee.stop();
            }
            self.tracker.wait();
            self.session.cleanup().err().map(|e| e.to_string())
        })
    }
}

/// Thread-safe map from key to [`SessionEntry`].
///
/// Cloning is cheap and yields a handle to the same map.
pub struct SessionRegistry<K, S> {
    entries: Arc<Mutex<HashMap<K, Arc<SessionEntry<S>>>>>,
}

impl<K, S> Clone for SessionRegistry<K, S> {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
        }
    }
}

impl<K, S> SessionRegistry<K, S>
where
    K: Eq + Hash + Clone + fmt::Display + Send + Sync + 'static,
    S: Session,
{
    pub fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Register and start `session` under `key`.
    ///
    /// Fails with [`ProxyError::SessionExists`] if the key is taken; the
    /// existing entry is left untouched and `session` is not started.
    pub fn register(&self, key: K, session: Arc<S>) -> Result<Arc<S>> {
        let entry = Arc::new(SessionEntry::new(session.clone()));
        {
            let mut entries = self.entries.lock();
            if entries.contains_key(&key) {
                return Err(ProxyError::SessionExists(key.to_string()));
            }
            entries.insert(key.clone(), entry.clone());
        }

        // Observees are registered before the session starts so a stop that
        // races the watcher still waits for all of them.
        let signals = observe_all(&entry.tracker, &session.observees());
        session.start();

        if !signals.is_empty() {
            let watched = entry.clone();
            let name = key.to_string();
            thread::spawn(move || {
                if let Some(index) = wait_any(&signals) {
                    tracing::debug!(session = %name, observee = index, "observee finished, stopping session");
                }
                watched.stop();
            });
        }

        tracing::debug!(session = %key, total_sessions = self.len(), "session registered");
        Ok(session)
    }

    /// Look up a session by key.
    pub fn lookup(&self, key: &K) -> Option<Arc<S>> {
        self.entries.lock().get(key).map(|e| e.session.clone())
    }

    /// Look up the full registry record by key.
    pub fn entry(&self, key: &K) -> Option<Arc<SessionEntry<S>>> {
        self.entries.lock().get(key).cloned()
    }

    /// Stop the session under `key` and remove it.
    ///
    /// If the session already stopped on its own, returns
    /// [`ProxyError::StoppedPrematurely`] carrying the captured cleanup
    /// error instead of running cleanup again.
    pub fn stop_one(&self, key: &K) -> Result<()> {
        let entry = self
            .entry(key)
            .ok_or_else(|| ProxyError::SessionNotFound(key.to_string()))?;

        let result = if entry.is_stopped() {
            Err(premature(entry.gate.wait()))
        } else {
            match entry.stop() {
                Firing::Executed(None) => Ok(()),
                Firing::Executed(Some(e)) => Err(ProxyError::Cleanup(e)),
                Firing::AlreadyFired(e) => Err(premature(e)),
            }
        };

        self.remove_entry(key, &entry);

        match &result {
            Ok(()) => tracing::debug!(session = %key, "session stopped"),
            Err(e) => tracing::warn!(session = %key, error = %e, "session stop reported an error"),
        }
        result
    }

    /// Fire every entry's stop gate, then remove the stopped entries.
    /// Returns the number of entries stopped.
    pub fn stop_all(&self) -> usize {
        let entries: Vec<(K, Arc<SessionEntry<S>>)> = self
            .entries
            .lock()
            .iter()
            .map(|(k, e)| (k.clone(), e.clone()))
            .collect();

        for (_, entry) in &entries {
            entry.stop();
        }
        for (key, entry) in &entries {
            self.remove_entry(key, entry);
        }

        if !entries.is_empty() {
            tracing::debug!(stopped = entries.len(), remaining = self.len(), "batch session stop");
        }
        entries.len()
    }

    /// Drop the entry for `key` without stopping it, but only if it still
    /// holds `session`. Used by sessions removing themselves during cleanup.
    pub fn forget(&self, key: &K, session: &S) -> bool {
        let mut entries = self.entries.lock();
        let owned = entries
            .get(key)
            .is_some_and(|e| std::ptr::eq(Arc::as_ptr(&e.session), session));
        if owned {
            entries.remove(key);
        }
        owned
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn keys(&self) -> Vec<K> {
        self.entries.lock().keys().cloned().collect()
    }

    fn remove_entry(&self, key: &K, entry: &Arc<SessionEntry<S>>) {
        let mut entries = self.entries.lock();
        if entries.get(key).is_some_and(|e| Arc::ptr_eq(e, entry)) {
            entries.remove(key);
        }
    }
}

impl<K, S> Default for SessionRegistry<K, S>
where
    K: Eq + Hash + Clone + fmt::Display + Send + Sync + 'static,
    S: Session,
{
    fn default() -> Self {
        Self::new()
    }
}

fn premature(error: Option<String>) -> ProxyError {
    ProxyError::StoppedPrematurely(error.unwrap_or_else(|| "(no error)".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observe::Finished;
    use crossbeam_channel::Receiver;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct Worker {
        finished: Finished,
        stops: AtomicUsize,
    }

    impl Observee for Worker {
        fn stop(&self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
            self.finished.finish();
        }

        fn observe(&self, tracker: &Tracker) -> Receiver<()> {
            self.finished.observe(tracker)
        }
    }

    #[derive(Default)]
    struct TestSession {
        workers: Vec<Arc<Worker>>,
        started: AtomicBool,
        cleanups: AtomicUsize,
        fail_cleanup: bool,
    }

    impl TestSession {
        fn with_workers(n: usize) -> Arc<Self> {
            Arc::new(Self {
                workers: (0..n).map(|_| Arc::new(Worker::default())).collect(),
                ..Default::default()
            })
        }
    }

    impl Session for TestSession {
        fn start(&self) {
            self.started.store(true, Ordering::SeqCst);
        }

        fn observees(&self) -> Vec<Arc<dyn Observee>> {
            self.workers
                .iter()
                .map(|w| w.clone() as Arc<dyn Observee>)
                .collect()
        }

        fn cleanup(&self) -> Result<()> {
            self.cleanups.fetch_add(1, Ordering::SeqCst);
            assert!(self.workers.iter().all(|w| w.finished.is_finished()));
            if self.fail_cleanup {
                Err(ProxyError::Cleanup("relay still busy".to_string()))
            } else {
                Ok(())
            }
        }
    }

    fn wait_until(mut cond: impl FnMut() -> bool) {
        for _ in 0..200 {
            if cond() {
                return;
            }
            thread::sleep(Duration::from_millis(5));
        }
        panic!("condition not reached");
    }

    #[test]
    fn register_starts_and_lookup_finds() {
        let registry = SessionRegistry::new();
        let session = TestSession::with_workers(1);
        registry.register("a".to_string(), session.clone()).unwrap();

        assert!(session.started.load(Ordering::SeqCst));
        assert!(registry.lookup(&"a".to_string()).is_some());
        assert!(registry.lookup(&"b".to_string()).is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn register_rejects_duplicate_key() {
        let registry = SessionRegistry::new();
        let first = TestSession::with_workers(0);
        let second = TestSession::with_workers(0);
        registry.register("a".to_string(), first.clone()).unwrap();

        let err = registry
            .register("a".to_string(), second.clone())
            .err()
            .unwrap();
        assert!(matches!(err, ProxyError::SessionExists(_)));
        assert!(!second.started.load(Ordering::SeqCst));
        let kept = registry.lookup(&"a".to_string()).unwrap();
        assert!(Arc::ptr_eq(&kept, &first));
    }

    #[test]
    fn stop_one_runs_cleanup_and_removes() {
        let registry = SessionRegistry::new();
        let session = TestSession::with_workers(2);
        registry.register("a".to_string(), session.clone()).unwrap();

        registry.stop_one(&"a".to_string()).unwrap();
        assert_eq!(session.cleanups.load(Ordering::SeqCst), 1);
        assert!(session.workers.iter().all(|w| w.stops.load(Ordering::SeqCst) == 1));
        assert!(registry.is_empty());

        let err = registry.stop_one(&"a".to_string()).unwrap_err();
        assert!(matches!(err, ProxyError::SessionNotFound(_)));
    }

    #[test]
    fn stop_one_surfaces_cleanup_error() {
        let registry = SessionRegistry::new();
        let session = Arc::new(TestSession {
            fail_cleanup: true,
            ..Default::default()
        });
        registry.register("a".to_string(), session).unwrap();

        let err = registry.stop_one(&"a".to_string()).unwrap_err();
        assert!(matches!(err, ProxyError::Cleanup(_)));
        assert!(registry.is_empty());
    }

    #[test]
    fn self_terminated_session_reports_premature_stop() {
        let registry = SessionRegistry::new();
        let session = TestSession::with_workers(2);
        registry.register("a".to_string(), session.clone()).unwrap();

        session.workers[0].finished.finish();
        wait_until(|| session.cleanups.load(Ordering::SeqCst) == 1);

        // The other worker was asked to stop by the gate.
        assert_eq!(session.workers[1].stops.load(Ordering::SeqCst), 1);
        assert_eq!(registry.len(), 1);

        let err = registry.stop_one(&"a".to_string()).unwrap_err();
        match err {
            ProxyError::StoppedPrematurely(cause) => assert_eq!(cause, "(no error)"),
            other => panic!("unexpected error: {other}"),
        }
        assert!(registry.is_empty());
        assert_eq!(session.cleanups.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn racing_stop_and_self_termination_cleans_up_once() {
        for _ in 0..20 {
            let registry = SessionRegistry::new();
            let session = TestSession::with_workers(1);
            registry.register("a".to_string(), session.clone()).unwrap();

            let worker = session.workers[0].clone();
            let finisher = thread::spawn(move || {
                worker.finished.finish();
            });
            let stoppers: Vec<_> = (0..4)
                .map(|_| {
                    let registry = registry.clone();
                    thread::spawn(move || registry.stop_one(&"a".to_string()))
                })
                .collect();

            finisher.join().unwrap();
            let results: Vec<_> = stoppers.into_iter().map(|h| h.join().unwrap()).collect();

            wait_until(|| session.cleanups.load(Ordering::SeqCst) == 1);
            thread::sleep(Duration::from_millis(10));
            assert_eq!(session.cleanups.load(Ordering::SeqCst), 1);
            assert!(results.iter().filter(|r| r.is_ok()).count() <= 1);
            assert!(results.iter().all(|r| match r {
                Ok(()) => true,
                Err(ProxyError::StoppedPrematurely(_)) | Err(ProxyError::SessionNotFound(_)) => true,
                Err(_) => false,
            }));
            assert!(registry.is_empty());
        }
    }

    #[test]
    fn stop_all_fires_every_gate_and_clears() {
        let registry = SessionRegistry::new();
        let sessions: Vec<_> = (0..3).map(|_| TestSession::with_workers(1)).collect();
        for (i, s) in sessions.iter().enumerate() {
            registry.register(format!("s{i}"), s.clone()).unwrap();
        }

        assert_eq!(registry.stop_all(), 3);
        assert!(registry.is_empty());
        assert!(sessions.iter().all(|s| s.cleanups.load(Ordering::SeqCst) == 1));
    }

    #[test]
    fn forget_only_removes_matching_session() {
        let registry = SessionRegistry::new();
        let registered = TestSession::with_workers(0);
        let stranger = TestSession::with_workers(0);
        registry.register("a".to_string(), registered.clone()).unwrap();

        assert!(!registry.forget(&"a".to_string(), &stranger));
        assert_eq!(registry.len(), 1);
        assert!(registry.forget(&"a".to_string(), &registered));
        assert!(registry.is_empty());
    }

    #[test]
    fn entry_count_tracks_starts_minus_stops() {
        let registry = SessionRegistry::new();
        for i in 0..6 {
            registry
                .register(format!("k{i}"), TestSession::with_workers(1))
                .unwrap();
        }
        for i in [1, 3, 4] {
            registry.stop_one(&format!("k{i}")).unwrap();
        }
        assert_eq!(registry.len(), 3);
        let mut keys = registry.keys();
        keys.sort();
        assert_eq!(keys, vec!["k0", "k2", "k5"]);
    }
}
