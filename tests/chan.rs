//! Concurrency-heavy integration tests for [`ckit_sync::chan::Channel`].

use ckit_sync::chan::Channel;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

/// One sender, `cap` buffer slots, `nmsg` messages -- lockstep producer and
/// consumer on an unbuffered channel, each message observed in order.
#[test]
fn unbuffered_lockstep_single_sender_single_receiver() {
    let ch = Arc::new(Channel::open(0).unwrap());
    let nmsg = 500u64;

    let sender = {
        let ch = Arc::clone(&ch);
        thread::spawn(move || {
            for i in 0..nmsg {
                ch.send(i);
            }
        })
    };

    for i in 0..nmsg {
        assert_eq!(ch.recv(), Some(i));
    }
    sender.join().unwrap();
    ch.close();
}

/// A single sender feeding `n` concurrent receivers on an unbuffered
/// channel: every message is delivered to exactly one receiver, with none
/// duplicated or lost.
fn one_sender_n_receivers(nreceivers: usize) {
    let ch = Arc::new(Channel::open(0).unwrap());
    let nmsg = 2000u64;
    let received = Arc::new(AtomicU64::new(0));
    let sum = Arc::new(AtomicU64::new(0));

    let receivers: Vec<_> = (0..nreceivers)
        .map(|_| {
            let ch = Arc::clone(&ch);
            let received = Arc::clone(&received);
            let sum = Arc::clone(&sum);
            thread::spawn(move || {
                while let Some(msg) = ch.recv() {
                    received.fetch_add(1, Ordering::Relaxed);
                    sum.fetch_add(msg, Ordering::Relaxed);
                }
            })
        })
        .collect();

    for i in 0..nmsg {
        ch.send(i);
    }
    ch.close();

    for r in receivers {
        r.join().unwrap();
    }

    assert_eq!(received.load(Ordering::Relaxed), nmsg);
    assert_eq!(sum.load(Ordering::Relaxed), nmsg * (nmsg - 1) / 2);
}

#[test]
fn chan_1send_1recv() {
    one_sender_n_receivers(1);
}

#[test]
fn chan_1send_2recv() {
    one_sender_n_receivers(2);
}

#[test]
fn chan_1send_4recv() {
    one_sender_n_receivers(4);
}

#[test]
fn chan_1send_8recv() {
    one_sender_n_receivers(8);
}

/// `n` concurrent senders and `n` concurrent receivers on a buffered
/// channel: every sent message is received exactly once.
fn n_senders_n_receivers(n: usize, cap: u32) {
    let ch = Arc::new(Channel::open(cap).unwrap());
    let per_sender = 500u64;
    let received = Arc::new(AtomicU64::new(0));

    let senders: Vec<_> = (0..n)
        .map(|_| {
            let ch = Arc::clone(&ch);
            thread::spawn(move || {
                for i in 0..per_sender {
                    ch.send(i);
                }
            })
        })
        .collect();

    let receivers: Vec<_> = (0..n)
        .map(|_| {
            let ch = Arc::clone(&ch);
            let received = Arc::clone(&received);
            thread::spawn(move || {
                while let Some(_msg) = ch.recv() {
                    received.fetch_add(1, Ordering::Relaxed);
                }
            })
        })
        .collect();

    for s in senders {
        s.join().unwrap();
    }
    ch.close();
    for r in receivers {
        r.join().unwrap();
    }

    assert_eq!(received.load(Ordering::Relaxed), n as u64 * per_sender);
}

#[test]
fn chan_4send_4recv_unbuffered() {
    n_senders_n_receivers(4, 0);
}

#[test]
fn chan_4send_4recv_buffered() {
    n_senders_n_receivers(4, 8);
}

#[test]
fn chan_8send_8recv_buffered() {
    n_senders_n_receivers(8, 16);
}

/// A blocking receiver parked on an empty channel is woken by `close` and
/// observes the closed state instead of hanging forever.
#[test]
fn close_wakes_a_parked_receiver() {
    let ch: Arc<Channel<u32>> = Arc::new(Channel::open(0).unwrap());
    let receiver = {
        let ch = Arc::clone(&ch);
        thread::spawn(move || ch.recv())
    };

    thread::sleep(std::time::Duration::from_millis(20));
    ch.close();
    assert_eq!(receiver.join().unwrap(), None);
}

/// A blocking sender parked on a full unbuffered channel is woken by
/// `close` and must observe that as the documented fatal condition.
#[test]
fn close_wakes_a_parked_sender_which_then_panics() {
    let ch: Arc<Channel<u32>> = Arc::new(Channel::open(0).unwrap());
    let sender = {
        let ch = Arc::clone(&ch);
        thread::spawn(move || ch.send(1))
    };

    thread::sleep(std::time::Duration::from_millis(20));
    ch.close();
    assert!(sender.join().is_err());
}
