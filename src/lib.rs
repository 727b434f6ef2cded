//! A CSP-style message channel for native OS threads, modeled on the Go
//! runtime's channel implementation.
//!
//! ## Layout
//!
//! - [`Sema`] - thin wrapper over the platform semaphore.
//! - [`lsema`] - a lightweight, user-space counting semaphore built on top
//!   of [`Sema`] that avoids a syscall when a signal is already available.
//! - [`mutex`] - a hybrid spin-then-block mutex built on [`lsema::LSema`].
//! - [`once`] - a race-safe one-shot initializer.
//! - [`chan`] - the channel itself.
//!
//! ## Platform implementation of [`Sema`]
//!
//! #### POSIX
//!
//! All POSIX-compliant systems use `sem_init`. Relies on
//! [libc](https://github.com/rust-lang/libc). This includes all `unix`
//! targets and `fuchsia`.
//!
//! #### Mac
//!
//! Uses the `mach` API rather than POSIX semaphores, since `sem_timedwait`
//! has a history of platform-specific flakiness on Darwin.
//!
//! #### Windows
//!
//! Uses `CreateSemaphoreW`.

#![warn(missing_docs)]

#[cfg(any(
    all(unix, not(any(target_os = "macos", target_os = "ios"))),
    target_os = "fuchsia"
))]
mod posix;
#[cfg(any(
    all(unix, not(any(target_os = "macos", target_os = "ios"))),
    target_os = "fuchsia"
))]
pub use posix::Sem;

#[cfg(windows)]
mod win32;
#[cfg(windows)]
pub use win32::Sem;

#[cfg(any(target_os = "macos", target_os = "ios"))]
mod mac;
#[cfg(any(target_os = "macos", target_os = "ios"))]
pub use mac::Sem;

pub mod chan;
pub mod lsema;
pub mod mutex;
pub mod once;

/// Describes the platform semaphore interface.
///
/// This primitive provides access to a single non-negative integer that can
/// be decremented by [`Sema::wait`] and incremented by [`Sema::signal`].
pub trait Sema: Sized + Send + Sync {
    /// Creates a new instance initialized to `init`, returning `None` on
    /// inability to do so (OS resource exhaustion, etc).
    fn new(init: u32) -> Option<Self>;

    /// Decrements self, blocking the calling thread until it was signaled if
    /// necessary.
    fn wait(&self);

    /// Attempts to decrement self without blocking.
    ///
    /// Returns `true` if self was signaled (and thus decremented), `false`
    /// otherwise.
    fn try_wait(&self) -> bool;

    /// Attempts to decrement self, blocking for at most `timeout`.
    ///
    /// Returns `true` if self was signaled within `timeout`, `false` on
    /// timeout.
    fn wait_timeout(&self, timeout: core::time::Duration) -> bool;

    /// Increments self by `n`, waking up to `n` blocked waiters.
    fn signal(&self, n: u32);
}
