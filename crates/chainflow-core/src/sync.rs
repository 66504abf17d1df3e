//! Coarse-grained cross-thread signaling
//!
//! Each signal kind owns its own mutex/condvar pair so waiters on one event
//! are never woken by another. None of these are used for sample data.

use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// A latched boolean event
///
/// `raise` sets the flag and wakes every waiter; the flag stays set until
/// `clear` is called, so a waiter arriving late still sees the event.
#[derive(Debug, Default)]
pub struct Signal {
    raised: Mutex<bool>,
    cond: Condvar,
}

impl Signal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        let mut raised = self.raised.lock();
        *raised = true;
        self.cond.notify_all();
    }

    pub fn clear(&self) {
        *self.raised.lock() = false;
    }

    pub fn is_raised(&self) -> bool {
        *self.raised.lock()
    }

    /// Block until raised or `timeout` elapses
    ///
    /// Returns `true` if the signal was raised.
    pub fn wait(&self, timeout: Duration) -> bool {
        let mut raised = self.raised.lock();
        if !*raised {
            self.cond
                .wait_while_for(&mut raised, |raised| !*raised, timeout);
        }
        *raised
    }
}

/// An edge-triggered wakeup for predicate-based waits
///
/// The waker changes shared (atomic) state first and then calls
/// [`notify`](Notifier::notify); the waiter re-checks its predicate under the
/// notifier's mutex, so a notification can't slip between check and sleep.
#[derive(Debug, Default)]
pub struct Notifier {
    lock: Mutex<()>,
    cond: Condvar,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notify(&self) {
        let _guard = self.lock.lock();
        self.cond.notify_all();
    }

    /// Block while `blocked()` holds, at most `timeout`
    ///
    /// Returns `true` if the predicate cleared before the timeout.
    pub fn wait_while<F>(&self, mut blocked: F, timeout: Duration) -> bool
    where
        F: FnMut() -> bool,
    {
        let mut guard = self.lock.lock();
        if !blocked() {
            return true;
        }
        let result = self.cond.wait_while_for(&mut guard, |_| blocked(), timeout);
        !result.timed_out() || !blocked()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_signal_latches() {
        let signal = Signal::new();
        signal.raise();
        assert!(signal.wait(Duration::from_millis(1)));
        signal.clear();
        assert!(!signal.is_raised());
    }

    #[test]
    fn test_signal_times_out() {
        let signal = Signal::new();
        let started = Instant::now();
        assert!(!signal.wait(Duration::from_millis(20)));
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_signal_wakes_waiter() {
        let signal = Arc::new(Signal::new());
        let remote = Arc::clone(&signal);
        let handle = thread::spawn(move || remote.wait(Duration::from_secs(5)));
        thread::sleep(Duration::from_millis(10));
        signal.raise();
        assert!(handle.join().unwrap());
    }

    #[test]
    fn test_notifier_predicate() {
        let notifier = Arc::new(Notifier::new());
        let ready = Arc::new(AtomicBool::new(false));

        let (n, r) = (Arc::clone(&notifier), Arc::clone(&ready));
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            r.store(true, Ordering::Release);
            n.notify();
        });

        let woke = notifier.wait_while(|| !ready.load(Ordering::Acquire), Duration::from_secs(5));
        handle.join().unwrap();
        assert!(woke);
    }
}
