//! One-shot initializer: a race-safe "run exactly once" coordinator.
//!
//! Used to lazily initialize per-thread channel state on first use.

use core::sync::atomic::{AtomicU8, Ordering};

use crate::mutex::HybridMutex;

const UNINIT: u8 = 0;
const INITIALIZING: u8 = 1;
const RUNNING: u8 = 2;
const DONE: u8 = 3;

/// A synchronization primitive that runs a closure exactly once, even when
/// raced by many threads.
///
/// One thread becomes the "winner" and runs the closure; every other thread
/// ("losers") blocks on an embedded mutex until the winner finishes.
pub struct Once {
    state: AtomicU8,
    mutex: HybridMutex<()>,
}

impl Once {
    /// Creates a new, un-run `Once`.
    ///
    /// Returns `None` if the embedded mutex's platform semaphore failed to
    /// initialize.
    pub fn new() -> Option<Self> {
        Some(Self {
            state: AtomicU8::new(UNINIT),
            mutex: HybridMutex::new(())?,
        })
    }

    /// Runs `f` exactly once across all callers of this `Once`, blocking
    /// every other caller until it completes.
    pub fn call_once<F: FnOnce()>(&self, f: F) {
        if self.state.load(Ordering::Acquire) == DONE {
            return;
        }

        match self.state.compare_exchange(
            UNINIT,
            INITIALIZING,
            Ordering::Acquire,
            Ordering::Acquire,
        ) {
            Ok(_) => {
                let guard = self.mutex.lock();
                self.state.store(RUNNING, Ordering::Release);
                f();
                self.state.store(DONE, Ordering::Release);
                drop(guard);
            }
            Err(_) => {
                while self.state.load(Ordering::Acquire) < RUNNING {
                    core::hint::spin_loop();
                }
                if self.state.load(Ordering::Acquire) != DONE {
                    // Winner is mid-initialization (or has just finished
                    // and is about to unlock); wait for it by taking and
                    // immediately releasing the same mutex.
                    drop(self.mutex.lock());
                }
            }
        }
    }

    /// Returns whether `call_once` has already completed.
    pub fn is_completed(&self) -> bool {
        self.state.load(Ordering::Acquire) == DONE
    }
}
