//! The channel itself: a bounded ring buffer plus two FIFO wait queues,
//! modeled on `golang.org/src/runtime/chan.go` but built for native OS
//! threads instead of a cooperative scheduler.

use core::cell::UnsafeCell;
use core::mem::MaybeUninit;
use core::sync::atomic::{fence, AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::collections::VecDeque;
use std::sync::Arc;

use crate::lsema::LSema;
use crate::mutex::HybridMutex;

/// One record per in-flight blocking send/receive call, parked on its own
/// [`LSema`] while waiting for a peer or a close.
///
/// The upstream design keeps one of these per OS thread, reused for its
/// lifetime and stashed in thread-local storage. Here the message type is
/// generic, so a single thread may be parked on channels of unrelated `T`s
/// at different times; rather than type-erase a persistent thread-local
/// slot, each blocking call allocates a fresh one. This preserves every
/// ordering and fairness invariant in the original (the slot's identity
/// only matters for the duration of one park), at the cost of one
/// allocation per blocking call instead of amortizing it across a thread's
/// lifetime.
struct ThreadSlot<T> {
    #[allow(dead_code)] // carried for debug logging / future diagnostics
    id: u64,
    sema: LSema,
    payload: UnsafeCell<Option<T>>,
    woken_by_close: AtomicBool,
}

// `payload` is only ever touched by the parking thread (before parking and
// after waking) and by exactly one peer holding the channel lock (to
// deposit or withdraw a message) while the owner is blocked inside
// `sema.wait()`. The happens-before edge is established by `LSema`'s
// release-on-signal / acquire-on-wake ordering.
unsafe impl<T: Send> Send for ThreadSlot<T> {}
unsafe impl<T: Send> Sync for ThreadSlot<T> {}

static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(0);

impl<T> ThreadSlot<T> {
    fn new(payload: Option<T>) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed),
            sema: LSema::new(0).expect("failed to create thread park semaphore"),
            payload: UnsafeCell::new(payload),
            woken_by_close: AtomicBool::new(false),
        })
    }

    fn take_payload(&self) -> T {
        unsafe { (*self.payload.get()).take() }.expect("thread slot payload missing on handoff")
    }

    fn put_payload(&self, msg: T) {
        unsafe {
            *self.payload.get() = Some(msg);
        }
    }
}

/// FIFO wait queues and the buffer indices they interact with, all
/// serialized by the channel's [`HybridMutex`].
struct Locked<T> {
    sendq: VecDeque<Arc<ThreadSlot<T>>>,
    recvq: VecDeque<Arc<ThreadSlot<T>>>,
}

/// A typed, optionally-buffered, multi-producer/multi-consumer channel for
/// CSP-style message passing between OS threads.
///
/// `cap == 0` is an unbuffered (synchronous, rendezvous) channel: send and
/// receive hand off directly. `cap > 0` is a buffered channel backed by a
/// ring buffer of that capacity.
pub struct Channel<T> {
    qcap: u32,
    qlen: AtomicU32,
    sendx: AtomicU32,
    recvx: AtomicU32,
    closed: AtomicBool,
    // Lock-free mirrors of `locked.{sendq,recvq}.len()`, maintained under
    // the lock, so the non-blocking fast path can read queue emptiness
    // without acquiring it -- the same trade the original makes by reading
    // `recvq.first` atomically outside the lock.
    sendq_len: AtomicU32,
    recvq_len: AtomicU32,
    buf: Box<[UnsafeCell<MaybeUninit<T>>]>,
    locked: HybridMutex<Locked<T>>,
}

unsafe impl<T: Send> Send for Channel<T> {}
unsafe impl<T: Send> Sync for Channel<T> {}

/// Outcome of a non-blocking [`Channel::try_send`].
#[derive(Debug)]
pub enum TrySend<T> {
    /// The message was sent (direct hand-off or enqueued in the buffer).
    Sent,
    /// The channel is full; the message is handed back to the caller.
    Full(T),
    /// The channel is closed; the message is handed back to the caller.
    Closed(T),
}

/// Outcome of a non-blocking [`Channel::try_recv`].
#[derive(Debug)]
pub enum TryRecv<T> {
    /// A message was received.
    Received(T),
    /// The channel is empty but still open.
    Empty,
    /// The channel is closed and its buffer is drained.
    Closed,
}

enum SendAttempt<T> {
    Sent,
    Full(T),
    Closed(T),
}

enum RecvAttempt<T> {
    Received(T),
    Empty,
    Closed,
}

impl<T: Send> Channel<T> {
    /// Allocates and initializes a new channel with the given buffer
    /// capacity (`0` for unbuffered).
    ///
    /// Returns `None` if a platform primitive (the hybrid mutex's
    /// underlying semaphore) failed to initialize.
    pub fn open(cap: u32) -> Option<Self> {
        let mut buf = Vec::with_capacity(cap as usize);
        for _ in 0..cap {
            buf.push(UnsafeCell::new(MaybeUninit::uninit()));
        }

        Some(Self {
            qcap: cap,
            qlen: AtomicU32::new(0),
            sendx: AtomicU32::new(0),
            recvx: AtomicU32::new(0),
            closed: AtomicBool::new(false),
            sendq_len: AtomicU32::new(0),
            recvq_len: AtomicU32::new(0),
            buf: buf.into_boxed_slice(),
            locked: HybridMutex::new(Locked {
                sendq: VecDeque::new(),
                recvq: VecDeque::new(),
            })?,
        })
    }

    /// Returns the channel's buffer capacity (`0` for unbuffered).
    pub fn cap(&self) -> u32 {
        self.qcap
    }

    fn is_full(&self) -> bool {
        if self.qcap == 0 {
            self.recvq_len.load(Ordering::Relaxed) == 0
        } else {
            self.qlen.load(Ordering::Relaxed) == self.qcap
        }
    }

    fn is_empty(&self) -> bool {
        if self.qcap == 0 {
            self.sendq_len.load(Ordering::Relaxed) == 0
        } else {
            self.qlen.load(Ordering::Relaxed) == 0
        }
    }

    /// Closes the channel, waking every thread parked on it.
    ///
    /// # Panics
    ///
    /// Panics if the channel is already closed (spec: close of a closed
    /// channel is a programmer error).
    pub fn close(&self) {
        let mut state = self.locked.lock();
        if self.closed.swap(true, Ordering::AcqRel) {
            panic!("close of closed channel");
        }
        // Make the transition visible to the lock-free fast path.
        fence(Ordering::SeqCst);

        log::trace!("close: waking {} parked receivers", state.recvq.len());
        for t in state.recvq.drain(..) {
            t.woken_by_close.store(true, Ordering::Release);
            t.sema.signal(1);
        }
        self.recvq_len.store(0, Ordering::Relaxed);

        log::trace!("close: waking {} parked senders", state.sendq.len());
        for t in state.sendq.drain(..) {
            t.woken_by_close.store(true, Ordering::Release);
            t.sema.signal(1);
        }
        self.sendq_len.store(0, Ordering::Relaxed);
    }

    /// Sends `msg`, blocking until it is delivered or the channel closes.
    ///
    /// # Panics
    ///
    /// Panics if the channel is closed, either already closed when `send`
    /// is called, or closed while this call was parked waiting for a
    /// receiver on an unbuffered channel (spec: this combination is a
    /// documented error condition; we choose to treat it as the same fatal
    /// "send on closed channel" case rather than silently drop the
    /// message).
    pub fn send(&self, msg: T) {
        match self.send_attempt(msg, false) {
            SendAttempt::Sent => {}
            SendAttempt::Closed(_) => panic!("send on closed channel"),
            SendAttempt::Full(_) => unreachable!("blocking send cannot observe Full"),
        }
    }

    /// Attempts to send `msg` without blocking.
    pub fn try_send(&self, msg: T) -> TrySend<T> {
        match self.send_attempt(msg, true) {
            SendAttempt::Sent => TrySend::Sent,
            SendAttempt::Full(msg) => TrySend::Full(msg),
            SendAttempt::Closed(msg) => TrySend::Closed(msg),
        }
    }

    fn send_attempt(&self, msg: T, non_blocking: bool) -> SendAttempt<T> {
        log::trace!("send: non_blocking={non_blocking}");

        // Fast path: only valid for non-blocking sends, see spec 4.6.1.
        if non_blocking && !self.closed.load(Ordering::Acquire) && self.is_full() {
            return SendAttempt::Full(msg);
        }

        let mut state = self.locked.lock();

        if self.closed.load(Ordering::Acquire) {
            drop(state);
            return SendAttempt::Closed(msg);
        }

        if let Some(recvt) = state.recvq.pop_front() {
            self.recvq_len.fetch_sub(1, Ordering::Relaxed);
            drop(state);
            log::trace!("send: direct hand-off to receiver {}", recvt.id);
            recvt.put_payload(msg);
            recvt.sema.signal(1);
            return SendAttempt::Sent;
        }

        if self.qlen.load(Ordering::Relaxed) < self.qcap {
            let i = self.sendx.load(Ordering::Relaxed);
            unsafe {
                (*self.buf[i as usize].get()).write(msg);
            }
            self.sendx.store((i + 1) % self.qcap, Ordering::Relaxed);
            self.qlen.fetch_add(1, Ordering::Relaxed);
            drop(state);
            log::trace!("send: enqueued at buf[{i}]");
            return SendAttempt::Sent;
        }

        if non_blocking {
            drop(state);
            return SendAttempt::Full(msg);
        }

        let slot = ThreadSlot::new(Some(msg));
        state.sendq.push_back(Arc::clone(&slot));
        self.sendq_len.fetch_add(1, Ordering::Relaxed);
        drop(state);

        log::trace!("send: parking as sender {}", slot.id);
        slot.sema.wait();

        if slot.woken_by_close.load(Ordering::Acquire) {
            // The message was never delivered; give it back so the
            // panicking caller's caller could in principle recover it via
            // catch_unwind, and so we don't silently drop user data.
            return SendAttempt::Closed(slot.take_payload());
        }
        SendAttempt::Sent
    }

    /// Receives a message, blocking until one is available or the channel
    /// closes.
    ///
    /// Returns `None` once the channel is closed and its buffer has been
    /// drained.
    pub fn recv(&self) -> Option<T> {
        match self.recv_attempt(false) {
            RecvAttempt::Received(msg) => Some(msg),
            RecvAttempt::Closed => None,
            RecvAttempt::Empty => unreachable!("blocking recv cannot observe Empty"),
        }
    }

    /// Attempts to receive a message without blocking.
    pub fn try_recv(&self) -> TryRecv<T> {
        match self.recv_attempt(true) {
            RecvAttempt::Received(msg) => TryRecv::Received(msg),
            RecvAttempt::Empty => TryRecv::Empty,
            RecvAttempt::Closed => TryRecv::Closed,
        }
    }

    fn recv_attempt(&self, non_blocking: bool) -> RecvAttempt<T> {
        log::trace!("recv: non_blocking={non_blocking}");

        if non_blocking {
            let empty = self.is_empty();
            let closed = self.closed.load(Ordering::Acquire);
            if empty && !closed {
                return RecvAttempt::Empty;
            }
            if empty && closed {
                return RecvAttempt::Closed;
            }
        }

        let mut state = self.locked.lock();

        if self.closed.load(Ordering::Acquire) && self.qlen.load(Ordering::Relaxed) == 0 {
            drop(state);
            return RecvAttempt::Closed;
        }

        if let Some(sendt) = state.sendq.pop_front() {
            self.sendq_len.fetch_sub(1, Ordering::Relaxed);

            let msg = if self.qcap == 0 || self.qlen.load(Ordering::Relaxed) == 0 {
                drop(state);
                log::trace!(
                    "recv: direct hand-off from sender {} (buffer empty)",
                    sendt.id
                );
                sendt.take_payload()
            } else {
                // Buffer is full: take the head, then rotate the sender's
                // message into the now-vacant slot. Head and tail coincide
                // because the buffer is full, so recvx and sendx converge
                // on the same new index.
                let i = self.recvx.load(Ordering::Relaxed);
                let out = unsafe { (*self.buf[i as usize].get()).assume_init_read() };
                let incoming = sendt.take_payload();
                unsafe {
                    (*self.buf[i as usize].get()).write(incoming);
                }
                let next = (i + 1) % self.qcap;
                self.recvx.store(next, Ordering::Relaxed);
                self.sendx.store(next, Ordering::Relaxed);
                drop(state);
                log::trace!(
                    "recv: direct hand-off from sender {} (buffer full)",
                    sendt.id
                );
                out
            };

            sendt.sema.signal(1);
            return RecvAttempt::Received(msg);
        }

        if self.qlen.load(Ordering::Relaxed) > 0 {
            let i = self.recvx.load(Ordering::Relaxed);
            let msg = unsafe { (*self.buf[i as usize].get()).assume_init_read() };
            self.recvx.store((i + 1) % self.qcap, Ordering::Relaxed);
            self.qlen.fetch_sub(1, Ordering::Relaxed);
            drop(state);
            log::trace!("recv: dequeued from buf[{i}]");
            return RecvAttempt::Received(msg);
        }

        if self.closed.load(Ordering::Acquire) {
            drop(state);
            return RecvAttempt::Closed;
        }

        if non_blocking {
            drop(state);
            return RecvAttempt::Empty;
        }

        let slot = ThreadSlot::new(None);
        state.recvq.push_back(Arc::clone(&slot));
        self.recvq_len.fetch_add(1, Ordering::Relaxed);
        drop(state);

        log::trace!("recv: parking as receiver {}", slot.id);
        slot.sema.wait();

        if slot.woken_by_close.load(Ordering::Acquire) {
            return RecvAttempt::Closed;
        }
        RecvAttempt::Received(slot.take_payload())
    }
}

impl<T> Drop for Channel<T> {
    fn drop(&mut self) {
        // Drop any buffered, still-live messages before the closed-check
        // assertion below, so a "free before close" programmer error still
        // releases their resources instead of leaking them.
        let qlen = *self.qlen.get_mut();
        let recvx = *self.recvx.get_mut();
        let qcap = self.qcap.max(1);
        for k in 0..qlen {
            let i = (recvx + k) % qcap;
            unsafe {
                (*self.buf[i as usize].get()).assume_init_drop();
            }
        }

        assert!(
            *self.closed.get_mut(),
            "channel dropped (freed) before it was closed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lockstep_buffered() {
        let ch = Channel::open(2).unwrap();
        ch.send(1);
        ch.send(2);
        assert_eq!(ch.recv(), Some(1));
        assert_eq!(ch.recv(), Some(2));
        ch.send(3);
        ch.send(4);
        assert_eq!(ch.recv(), Some(3));
        assert_eq!(ch.recv(), Some(4));
        ch.close();
    }

    #[test]
    fn batch_buffered() {
        let ch = Channel::open(4).unwrap();
        let mut sum = 0u64;
        for base in (0..10).step_by(4) {
            let count = 4.min(10 - base);
            for i in 0..count {
                ch.send(base + i + 1);
            }
            for _ in 0..count {
                sum += ch.recv().unwrap() as u64;
            }
        }
        assert_eq!(sum, 55);
        ch.close();
    }

    #[test]
    fn try_send_to_full_channel() {
        let ch = Channel::open(1).unwrap();
        assert!(matches!(ch.try_send(1), TrySend::Sent));
        assert!(matches!(ch.try_send(2), TrySend::Full(2)));
        assert_eq!(ch.recv(), Some(1));
        assert!(matches!(ch.try_send(2), TrySend::Sent));
        ch.close();
        assert!(matches!(ch.try_send(3), TrySend::Closed(3)));
    }

    #[test]
    fn try_recv_from_empty_channel() {
        let ch: Channel<i32> = Channel::open(1).unwrap();
        assert!(matches!(ch.try_recv(), TryRecv::Empty));
        ch.send(1);
        assert!(matches!(ch.try_recv(), TryRecv::Received(1)));
        ch.close();
        assert!(matches!(ch.try_recv(), TryRecv::Closed));
    }

    #[test]
    fn recv_after_close_drains_buffer_then_closes() {
        let ch = Channel::open(2).unwrap();
        ch.send(1);
        ch.close();
        assert_eq!(ch.recv(), Some(1));
        assert_eq!(ch.recv(), None);
        assert_eq!(ch.recv(), None);
    }

    #[test]
    #[should_panic(expected = "close of closed channel")]
    fn double_close_is_fatal() {
        let ch: Channel<i32> = Channel::open(1).unwrap();
        ch.close();
        ch.close();
    }

    #[test]
    #[should_panic(expected = "send on closed channel")]
    fn blocking_send_on_closed_is_fatal() {
        let ch: Channel<i32> = Channel::open(1).unwrap();
        ch.close();
        ch.send(1);
    }

    #[test]
    #[should_panic(expected = "before it was closed")]
    fn free_before_close_is_fatal() {
        let _ch: Channel<i32> = Channel::open(1).unwrap();
        // dropped here without calling close()
    }

    #[test]
    fn dropping_an_unclosed_channel_does_not_leak_buffered_messages() {
        use std::sync::atomic::{AtomicUsize, Ordering as O};
        use std::sync::Arc;

        struct Counted(Arc<AtomicUsize>);
        impl Drop for Counted {
            fn drop(&mut self) {
                self.0.fetch_add(1, O::SeqCst);
            }
        }

        let drops = Arc::new(AtomicUsize::new(0));
        let ch = Channel::open(4).unwrap();
        ch.send(Counted(Arc::clone(&drops)));
        ch.send(Counted(Arc::clone(&drops)));
        ch.close();
        drop(ch);
        assert_eq!(drops.load(O::SeqCst), 2);
    }
}
