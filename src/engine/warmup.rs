//! Warmup barrier gating the medium and slow tiers.
//!
//! CPU utilization is a delta against the previous `/proc/stat` read, so the
//! first fast-tier samples are primers with meaningless values. Downstream
//! tiers wait here until the fast thread has taken its primer samples.

use parking_lot::{Condvar, Mutex};

#[derive(Debug, Default)]
struct State {
    warmed: bool,
    cancelled: bool,
}

/// Flag + condvar barrier. Waiters are released either by the fast thread
/// completing its primer pass or by `stop` cancelling the run, so a fast
/// thread that exits before priming can never strand the other tiers.
#[derive(Debug, Default)]
pub struct WarmupBarrier {
    state: Mutex<State>,
    cvar: Condvar,
}

impl WarmupBarrier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks warmup complete and wakes every waiter.
    ///
    /// The flag flips under the mutex before notification, so a waiter that
    /// checked the flag just before cannot miss the wake-up.
    pub fn mark_warmed(&self) {
        let mut state = self.state.lock();
        state.warmed = true;
        self.cvar.notify_all();
    }

    /// Releases all current and future waiters without marking warmup done.
    pub fn cancel(&self) {
        let mut state = self.state.lock();
        state.cancelled = true;
        self.cvar.notify_all();
    }

    /// Blocks until the barrier is released. Idempotent; callable from any
    /// thread, any number of times.
    pub fn wait(&self) {
        let mut state = self.state.lock();
        while !state.warmed && !state.cancelled {
            self.cvar.wait(&mut state);
        }
    }

    /// True once warmup completed (not merely cancelled).
    pub fn is_warmed(&self) -> bool {
        self.state.lock().warmed
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_wait_returns_after_mark_warmed() {
        let barrier = Arc::new(WarmupBarrier::new());
        let waiter = {
            let barrier = Arc::clone(&barrier);
            std::thread::spawn(move || barrier.wait())
        };

        std::thread::sleep(Duration::from_millis(20));
        barrier.mark_warmed();
        waiter.join().expect("waiter exits");
        assert!(barrier.is_warmed());
    }

    #[test]
    fn test_cancel_releases_without_warming() {
        let barrier = Arc::new(WarmupBarrier::new());
        let waiter = {
            let barrier = Arc::clone(&barrier);
            std::thread::spawn(move || barrier.wait())
        };

        std::thread::sleep(Duration::from_millis(20));
        barrier.cancel();
        waiter.join().expect("waiter exits");
        assert!(!barrier.is_warmed());
    }

    #[test]
    fn test_wait_after_release_is_immediate() {
        let barrier = WarmupBarrier::new();
        barrier.mark_warmed();
        barrier.wait();
        barrier.wait();
    }

    #[test]
    fn test_many_waiters_all_released() {
        let barrier = Arc::new(WarmupBarrier::new());
        let waiters: Vec<_> = (0..8)
            .map(|_| {
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || barrier.wait())
            })
            .collect();

        std::thread::sleep(Duration::from_millis(10));
        barrier.mark_warmed();
        for w in waiters {
            w.join().expect("waiter exits");
        }
    }
}
