//! Single-thread gate
//!
//! Normally open: every worker proceeds freely. After a serious error a
//! worker closes the gate and becomes its holder; from then on each worker
//! must hold the gate for the whole of one unit of work, so the crawl runs
//! one item at a time until the gate is opened again.
//!
//! Holding is not counted: acquiring twice from the holder is a no-op and
//! one release frees the gate.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, ThreadId};
use std::time::Duration;

/// How often a blocked acquirer re-checks whether it should give up
const ABANDON_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Default)]
pub struct ContinueGate {
    closed: AtomicBool,
    holder: Mutex<Option<ThreadId>>,
    released: Condvar,
}

impl ContinueGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// True while single-thread mode is in effect
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// The thread currently allowed to work, if the gate is held
    pub fn holder(&self) -> Option<ThreadId> {
        *self.holder.lock()
    }

    /// Enters single-thread mode with the calling thread as holder
    ///
    /// Waits for the current holder, if another thread, to release first.
    pub fn close(&self) {
        let me = thread::current().id();
        let mut holder = self.holder.lock();
        self.closed.store(true, Ordering::Release);
        loop {
            match *holder {
                Some(h) if h == me => return,
                Some(_) => self.released.wait(&mut holder),
                None => {
                    *holder = Some(me);
                    self.closed.store(true, Ordering::Release);
                    return;
                }
            }
        }
    }

    /// Gets permission to continue working
    ///
    /// Returns at once while the gate is open or already held by the
    /// caller. Otherwise blocks until the gate is free or opened, or until
    /// `abandon` returns true.
    ///
    /// # Returns
    ///
    /// * `true` - The caller may proceed
    /// * `false` - The caller gave up waiting
    pub fn acquire<F>(&self, abandon: F) -> bool
    where
        F: Fn() -> bool,
    {
        if !self.is_closed() {
            return true;
        }
        let me = thread::current().id();
        let mut holder = self.holder.lock();
        loop {
            if !self.is_closed() {
                return true;
            }
            match *holder {
                None => {
                    *holder = Some(me);
                    return true;
                }
                Some(h) if h == me => return true,
                Some(_) => {
                    if abandon() {
                        return false;
                    }
                    self.released.wait_for(&mut holder, ABANDON_POLL);
                }
            }
        }
    }

    /// Gives up the gate if the calling thread holds it
    pub fn release(&self) {
        let me = thread::current().id();
        let mut holder = self.holder.lock();
        if *holder == Some(me) {
            *holder = None;
            self.released.notify_all();
        }
    }

    /// Leaves single-thread mode, whoever holds the gate
    pub fn open(&self) {
        let mut holder = self.holder.lock();
        self.closed.store(false, Ordering::Release);
        *holder = None;
        self.released.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn test_open_gate_never_blocks() {
        let gate = ContinueGate::new();
        assert!(gate.acquire(|| false));
        assert!(gate.holder().is_none());
        gate.release();
    }

    #[test]
    fn test_close_makes_caller_holder() {
        let gate = ContinueGate::new();
        gate.close();
        assert!(gate.is_closed());
        assert_eq!(gate.holder(), Some(thread::current().id()));
        assert!(gate.acquire(|| false));
        gate.release();
        assert!(gate.holder().is_none());
        assert!(gate.is_closed());
    }

    #[test]
    fn test_waiter_gives_up_when_abandoned() {
        let gate = Arc::new(ContinueGate::new());
        gate.close();
        let other = Arc::clone(&gate);
        let acquired = thread::spawn(move || other.acquire(|| true)).join().unwrap();
        assert!(!acquired);
    }

    #[test]
    fn test_open_releases_waiters() {
        let gate = Arc::new(ContinueGate::new());
        gate.close();
        let other = Arc::clone(&gate);
        let waiter = thread::spawn(move || other.acquire(|| false));
        thread::sleep(Duration::from_millis(50));
        gate.open();
        assert!(waiter.join().unwrap());
        assert!(!gate.is_closed());
    }

    #[test]
    fn test_closed_gate_serializes_workers() {
        let gate = Arc::new(ContinueGate::new());
        gate.close();
        gate.release();

        let inside = Arc::new(AtomicUsize::new(0));
        let overlap = Arc::new(AtomicBool::new(false));
        let workers: Vec<_> = (0..4)
            .map(|_| {
                let gate = Arc::clone(&gate);
                let inside = Arc::clone(&inside);
                let overlap = Arc::clone(&overlap);
                thread::spawn(move || {
                    for _ in 0..20 {
                        assert!(gate.acquire(|| false));
                        if inside.fetch_add(1, Ordering::SeqCst) > 0 {
                            overlap.store(true, Ordering::SeqCst);
                        }
                        thread::sleep(Duration::from_micros(200));
                        inside.fetch_sub(1, Ordering::SeqCst);
                        gate.release();
                    }
                })
            })
            .collect();
        for w in workers {
            w.join().unwrap();
        }
        assert!(!overlap.load(Ordering::SeqCst));
    }
}
