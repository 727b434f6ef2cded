use core::cell::UnsafeCell;
#[allow(unused)]
use core::convert::TryFrom;
use core::mem;
use core::time::Duration;

use error_code::PosixError;

/// POSIX implementation of [`Sema`](crate::Sema), backed by `sem_t`.
///
/// Note: `wait_timeout` returns `false` on interrupt by a signal, same as
/// the underlying `sem_timedwait` without `EINTR` retry (interrupts are
/// retried up to the point of `wait`/`try_wait`, but a timed wait that is
/// interrupted near its deadline is treated as a timeout).
pub struct Sem {
    handle: UnsafeCell<libc::sem_t>,
}

impl super::Sema for Sem {
    fn new(init: u32) -> Option<Self> {
        let mut handle = mem::MaybeUninit::uninit();

        let res = unsafe { libc::sem_init(handle.as_mut_ptr(), 0, init as libc::c_uint) };

        match res {
            0 => Some(Self {
                handle: UnsafeCell::new(unsafe { handle.assume_init() }),
            }),
            _ => None,
        }
    }

    fn wait(&self) {
        loop {
            let res = unsafe { libc::sem_wait(self.handle.get()) };

            if res == -1 {
                let errno = PosixError::last();
                debug_assert_eq!(errno.raw_code(), libc::EINTR, "Unexpected error");
                continue;
            }

            break;
        }
    }

    fn try_wait(&self) -> bool {
        loop {
            let res = unsafe { libc::sem_trywait(self.handle.get()) };

            if res == -1 {
                let errno = PosixError::last();
                if errno.is_would_block() {
                    break false;
                }

                debug_assert_eq!(errno.raw_code(), libc::EINTR, "Unexpected error");
                continue;
            }

            break true;
        }
    }

    fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut ts = libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        unsafe {
            libc::clock_gettime(libc::CLOCK_REALTIME, &mut ts);
        }
        ts.tv_sec += timeout.as_secs() as libc::time_t;
        ts.tv_nsec += timeout.subsec_nanos() as i64;
        if ts.tv_nsec >= 1_000_000_000 {
            ts.tv_nsec -= 1_000_000_000;
            ts.tv_sec += 1;
        }

        loop {
            let res = unsafe { libc::sem_timedwait(self.handle.get(), &ts) };

            if res == -1 {
                let errno = PosixError::last();
                if errno.is_would_block() || errno.raw_code() == libc::ETIMEDOUT {
                    break false;
                }

                debug_assert_eq!(errno.raw_code(), libc::EINTR, "Unexpected error");
                continue;
            }

            break true;
        }
    }

    fn signal(&self, n: u32) {
        for _ in 0..n {
            let res = unsafe { libc::sem_post(self.handle.get()) };
            debug_assert_eq!(res, 0);
        }
    }
}

impl Drop for Sem {
    fn drop(&mut self) {
        unsafe {
            libc::sem_destroy(self.handle.get());
        }
    }
}

unsafe impl Send for Sem {}
unsafe impl Sync for Sem {}
