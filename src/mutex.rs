//! Hybrid mutex: a lock that spins briefly, then blocks on a semaphore when
//! contended.

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::{Sem, Sema};

/// The value of `SPIN_TRIES` is cargo-culted from TCMalloc, the Windows
/// critical section default, WebKit, etc: a bound at which a spinning
/// thread gives up and yields the CPU back to the OS scheduler.
const SPIN_TRIES: u32 = 1000;

/// A mutex that spins briefly under light contention, then parks the
/// calling thread on an embedded semaphore when the spin bound is
/// exceeded. Offers no fairness guarantee beyond "eventually every waiter
/// is woken".
pub struct HybridMutex<T> {
    flag: AtomicBool,
    nwait: AtomicUsize,
    sema: Sem,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for HybridMutex<T> {}
unsafe impl<T: Send> Sync for HybridMutex<T> {}

impl<T> HybridMutex<T> {
    /// Creates a new, unlocked mutex guarding `data`.
    ///
    /// Returns `None` if the inner platform semaphore failed to initialize.
    pub fn new(data: T) -> Option<Self> {
        Some(Self {
            flag: AtomicBool::new(false),
            nwait: AtomicUsize::new(0),
            sema: Sem::new(0)?,
            data: UnsafeCell::new(data),
        })
    }

    /// Acquires the lock, blocking the calling thread if necessary, and
    /// returns a guard that releases it on drop.
    pub fn lock(&self) -> HybridMutexGuard<'_, T> {
        if self.flag.swap(true, Ordering::Acquire) {
            self.lock_slow();
        }
        HybridMutexGuard { mutex: self }
    }

    #[cold]
    fn lock_slow(&self) {
        loop {
            let mut n = SPIN_TRIES;
            while self.flag.load(Ordering::Relaxed) {
                n -= 1;
                if n == 0 {
                    self.nwait.fetch_add(1, Ordering::Relaxed);
                    while self.flag.load(Ordering::Relaxed) {
                        self.sema.wait();
                    }
                    self.nwait.fetch_sub(1, Ordering::Relaxed);
                } else {
                    core::hint::spin_loop();
                }
            }
            if !self.flag.swap(true, Ordering::Acquire) {
                return;
            }
        }
    }

    fn unlock(&self) {
        self.flag.store(false, Ordering::Release);
        if self.nwait.load(Ordering::Relaxed) > 0 {
            self.sema.signal(1);
        }
    }
}

/// RAII guard returned by [`HybridMutex::lock`]. Releases the lock when
/// dropped.
pub struct HybridMutexGuard<'a, T> {
    mutex: &'a HybridMutex<T>,
}

impl<T> Deref for HybridMutexGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.mutex.data.get() }
    }
}

impl<T> DerefMut for HybridMutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<T> Drop for HybridMutexGuard<'_, T> {
    fn drop(&mut self) {
        self.mutex.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::HybridMutex;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn mutual_exclusion_under_contention() {
        let lock = Arc::new(HybridMutex::new(0usize).unwrap());
        let nthreads = 10;
        let nlocks_per_thread = 100;

        let handles: Vec<_> = (0..nthreads)
            .map(|_| {
                let lock = Arc::clone(&lock);
                thread::spawn(move || {
                    for _ in 0..nlocks_per_thread {
                        *lock.lock() += 1;
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(*lock.lock(), nthreads * nlocks_per_thread);
    }
}
