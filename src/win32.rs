use core::ffi::c_void;
use core::ptr;
use core::sync::atomic::{AtomicPtr, Ordering};

const WAIT_OBJECT_0: u32 = 0;
const WAIT_TIMEOUT: u32 = 0x0000_0102;
const INFINITE: u32 = 0xFFFF_FFFF;

extern "system" {
    fn CloseHandle(handle: *mut c_void) -> i32;
    fn CreateSemaphoreW(
        attrs: *mut c_void,
        initial: i32,
        max: i32,
        name: *const u16,
    ) -> *mut c_void;
    fn WaitForSingleObject(handle: *mut c_void, timeout_ms: u32) -> u32;
    fn ReleaseSemaphore(handle: *mut c_void, increment: i32, previous_increment: *mut i32) -> i32;
}

/// Windows implementation of [`Sema`](crate::Sema), using `CreateSemaphoreW`.
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

        let handle = unsafe {
            CreateSemaphoreW(ptr::null_mut(), init as i32, i32::max_value(), ptr::null())
        };

        match self.handle.compare_exchange(
            ptr::null_mut(),
            handle,
            Ordering::SeqCst,
            Ordering::Acquire,
        ) {
            Ok(_) => !handle.is_null(),
            Err(_) => {
                unsafe {
                    CloseHandle(handle);
                }
                false
            }
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
        let result = unsafe { WaitForSingleObject(self.handle.load(Ordering::Acquire), INFINITE) };

        match result {
            WAIT_OBJECT_0 => (),
            other => panic!("Unexpected result: {}", other),
        }
    }

    #[inline]
    fn try_wait(&self) -> bool {
        self.wait_timeout(core::time::Duration::from_secs(0))
    }

    fn wait_timeout(&self, timeout: core::time::Duration) -> bool {
        use core::convert::TryInto;

        let result = unsafe {
            WaitForSingleObject(
                self.handle.load(Ordering::Acquire),
                timeout.as_millis().try_into().unwrap_or(u32::max_value()),
            )
        };

        match result {
            WAIT_OBJECT_0 => true,
            WAIT_TIMEOUT => false,
            other => panic!("Unexpected result: {}", other),
        }
    }

    /// Increments self by `n`, waking up to `n` awaiting threads as a result.
    fn signal(&self, n: u32) {
        let res = unsafe {
            ReleaseSemaphore(
                self.handle.load(Ordering::Acquire),
                n as i32,
                ptr::null_mut(),
            )
        };
        debug_assert_ne!(res, 0);
    }
}

impl Drop for Sem {
    fn drop(&mut self) {
        let handle = self.handle.swap(ptr::null_mut(), Ordering::AcqRel);
        if !handle.is_null() {
            unsafe {
                CloseHandle(handle);
            }
        }
    }
}

unsafe impl Send for Sem {}
unsafe impl Sync for Sem {}
