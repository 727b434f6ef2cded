//! Lightweight semaphore: a user-space counter with bounded spin before
//! falling back to the platform [`Sema`](crate::Sema).
//!
//! Based on Jeff Preshing's "lightweight semaphore"
//! (<https://github.com/preshing/cpp11-on-multicore/blob/master/common/sema.h>),
//! the same design the upstream channel implementation this crate follows
//! is built on.

use core::sync::atomic::{AtomicIsize, Ordering};
use core::time::Duration;

use crate::{Sem, Sema};

/// Upper bound on how many times `wait` spins on a CAS before falling back
/// to blocking on the inner [`Sema`](crate::Sema).
///
/// Chosen the same way upstream picked 10_000: observed contention between
/// a few threads racing to wait/signal typically resolves in a few thousand
/// loop iterations, well under this bound.
const MAX_SPINS: u32 = 10_000;

/// A counting semaphore that spins briefly before blocking.
///
/// The counter is signed: a negative value means `-count` threads are
/// parked waiting on the inner platform semaphore. This convention is what
/// lets [`LSema::signal`] release exactly as many waiters as arrived since
/// the last signal, no more.
pub struct LSema {
    count: AtomicIsize,
    sema: Sem,
}

impl LSema {
    /// Creates a new lightweight semaphore initialized to `initcount`.
    ///
    /// Returns `None` if the underlying platform semaphore failed to
    /// initialize.
    pub fn new(initcount: u32) -> Option<Self> {
        Some(Self {
            count: AtomicIsize::new(initcount as isize),
            sema: Sem::new(initcount)?,
        })
    }

    /// Decrements self, blocking the calling thread if necessary.
    pub fn wait(&self) {
        if !self.try_wait() {
            self.wait_partial_spin(None);
        }
    }

    /// Attempts to decrement self without blocking.
    pub fn try_wait(&self) -> bool {
        let mut old = self.count.load(Ordering::Relaxed);
        while old > 0 {
            match self.count.compare_exchange_weak(
                old,
                old - 1,
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(current) => old = current,
            }
        }
        false
    }

    /// Attempts to decrement self, blocking for at most `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        self.try_wait() || self.wait_partial_spin(Some(timeout))
    }

    /// Spins on a CAS decrement up to [`MAX_SPINS`] times, then falls back
    /// to an unconditional `fetch_sub` and blocks on the inner `Sema` if a
    /// signal hasn't arrived in the meantime.
    fn wait_partial_spin(&self, timeout: Option<Duration>) -> bool {
        for _ in 0..MAX_SPINS {
            let old = self.count.load(Ordering::Relaxed);
            if old > 0
                && self
                    .count
                    .compare_exchange_weak(old, old - 1, Ordering::Acquire, Ordering::Relaxed)
                    .is_ok()
            {
                return true;
            }
            core::hint::spin_loop();
        }

        let old = self.count.fetch_sub(1, Ordering::Acquire);
        if old > 0 {
            return true;
        }

        let signaled = match timeout {
            None => {
                self.sema.wait();
                true
            }
            Some(timeout) => self.sema.wait_timeout(timeout),
        };
        if signaled {
            return true;
        }

        // Timed out. The count is still decremented as if we were still
        // waiting; undo that, unless a signal raced us and a post is
        // already pending on the inner Sema, in which case take it instead.
        loop {
            let old = self.count.load(Ordering::Acquire);
            if old >= 0 && self.sema.try_wait() {
                return true;
            }
            if old < 0
                && self
                    .count
                    .compare_exchange(old, old + 1, Ordering::AcqRel, Ordering::Relaxed)
                    .is_ok()
            {
                return false;
            }
        }
    }

    /// Increments self by `n`, releasing the inner `Sema` for exactly as
    /// many threads as are parked on it (never more).
    pub fn signal(&self, n: u32) {
        debug_assert!(n > 0);
        let old = self.count.fetch_add(n as isize, Ordering::Release);
        let to_release = core::cmp::min(n as isize, -old).max(0);
        if to_release > 0 {
            self.sema.signal(to_release as u32);
        }
    }

    /// Returns a non-authoritative snapshot of the available count, clamped
    /// to zero.
    pub fn approx_avail(&self) -> usize {
        self.count.load(Ordering::Relaxed).max(0) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::LSema;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn signal_then_wait() {
        let s = LSema::new(0).unwrap();
        s.signal(1);
        assert!(s.wait_timeout(Duration::from_millis(100)));
    }

    #[test]
    fn try_wait_fails_when_empty() {
        let s = LSema::new(0).unwrap();
        assert!(!s.try_wait());
    }

    #[test]
    fn every_signal_wakes_exactly_one_waiter() {
        let sema = Arc::new(LSema::new(0).unwrap());
        let nthreads = 8u32;
        let nsignals = 8u32;

        let handles: Vec<_> = (0..nthreads)
            .map(|_| {
                let sema = Arc::clone(&sema);
                thread::spawn(move || {
                    for _ in 0..nsignals {
                        thread::sleep(Duration::from_micros(1));
                        sema.signal(1);
                    }
                })
            })
            .collect();

        for _ in 0..(nthreads * nsignals) {
            assert!(
                sema.wait_timeout(Duration::from_millis(200)),
                "timed out waiting for signal"
            );
        }
        assert!(!sema.try_wait(), "received an unexpected extra signal");

        for h in handles {
            h.join().unwrap();
        }
    }
}
