use core::ffi::c_void;
use core::sync::atomic::{AtomicPtr, Ordering};
use core::{mem, ptr};

#[repr(C)]
struct TimeSpec {
    tv_sec: libc::c_uint,
    tv_nsec: libc::c_int,
}

impl From<core::time::Duration> for TimeSpec {
    fn from(d: core::time::Duration) -> TimeSpec {
        use core::convert::TryFrom;

        TimeSpec {
            tv_sec: libc::c_uint::try_from(d.as_secs()).unwrap_or(libc::c_uint::max_value()),
            tv_nsec: libc::c_int::try_from(d.subsec_nanos()).unwrap_or(libc::c_int::max_value()),
        }
    }
}

const KERN_OPERATION_TIMED_OUT: libc::c_int = 49;
const SYNC_POLICY_FIFO: libc::c_int = 0;

extern "C" {
    static mach_task_self_: libc::c_uint;

    fn semaphore_create(
        task: libc::c_uint,
        semaphore: *mut *mut c_void,
        policy: libc::c_int,
        value: libc::c_int,
    ) -> libc::c_int;
    fn semaphore_signal(semaphore: *mut c_void) -> libc::c_int;
    fn semaphore_wait(semaphore: *mut c_void) -> libc::c_int;
    fn semaphore_timedwait(semaphore: *mut c_void, timeout: TimeSpec) -> libc::c_int;
    fn semaphore_destroy(task: libc::c_uint, semaphore: *mut c_void) -> libc::c_int;
}

/// MacOS semaphore based on the mach API.
///
/// `sem_init`-based POSIX semaphores are intentionally avoided on Darwin:
/// their `sem_timedwait` has a history of platform-specific flakiness, which
/// is why this implementation talks to `semaphore_*` directly.
pub struct Sem {
    handle: AtomicPtr<c_void>,
}

impl Sem {
    /// Creates new uninit instance.
    ///
    /// It is UB to use it until `init` is called.
    pub const unsafe fn new_uninit() -> Self {
        Self {
            handle: AtomicPtr::new(ptr::null_mut()),
        }
    }

    #[must_use]
    /// Initializes semaphore with provided `init` as initial value.
    ///
    /// Returns `true` on success.
    ///
    /// Returns `false` if semaphore is already initialized or initialization failed.
    pub fn init(&self, init: u32) -> bool {
        if !self.handle.load(Ordering::Acquire).is_null() {
            return false;
        }

        let mut handle = mem::MaybeUninit::uninit();

        let res = unsafe {
            semaphore_create(
                mach_task_self_,
                handle.as_mut_ptr(),
                SYNC_POLICY_FIFO,
                init as libc::c_int,
            )
        };

        match res {
            0 => unsafe {
                let handle = handle.assume_init();
                match self.handle.compare_exchange(
                    ptr::null_mut(),
                    handle,
                    Ordering::SeqCst,
                    Ordering::Acquire,
                ) {
                    Ok(_) => true,
                    Err(_) => {
                        semaphore_destroy(mach_task_self_, handle);
                        false
                    }
                }
            },
            _ => false,
        }
    }
}

impl super::Sema for Sem {
    /// Creates new instance, initializing it with `init`.
    fn new(init: u32) -> Option<Self> {
        let result = unsafe { Self::new_uninit() };

        if result.init(init) {
            Some(result)
        } else {
            None
        }
    }

    /// Decrements self, returning immediately if it was signaled.
    ///
    /// Otherwise awaits for signal.
    fn wait(&self) {
        let result = unsafe { semaphore_wait(self.handle.load(Ordering::Acquire)) };

        debug_assert_eq!(result, 0, "semaphore_wait() failed");
    }

    #[inline]
    fn try_wait(&self) -> bool {
        self.wait_timeout(core::time::Duration::from_secs(0))
    }

    fn wait_timeout(&self, timeout: core::time::Duration) -> bool {
        let result =
            unsafe { semaphore_timedwait(self.handle.load(Ordering::Acquire), timeout.into()) };

        debug_assert!(
            result == 0 || result == KERN_OPERATION_TIMED_OUT,
            "semaphore_timedwait() failed"
        );
        result == 0
    }

    /// Increments self by `n`, waking up to `n` awaiting threads as a result.
    fn signal(&self, n: u32) {
        let handle = self.handle.load(Ordering::Acquire);
        for _ in 0..n {
            let res = unsafe { semaphore_signal(handle) };
            debug_assert_eq!(res, 0, "semaphore_signal() failed");
        }
    }
}

impl Drop for Sem {
    fn drop(&mut self) {
        let handle = self.handle.swap(ptr::null_mut(), Ordering::AcqRel);
        if !handle.is_null() {
            unsafe {
                semaphore_destroy(mach_task_self_, handle);
            }
        }
    }
}

unsafe impl Send for Sem {}
unsafe impl Sync for Sem {}
