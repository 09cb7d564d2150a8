//! # Blocking Coordinator
//!
//! Services blocking list-pop commands with per-key FIFO fairness and a
//! wall-clock timeout.
//!
//! Grounded on the original implementation's `server.BlockingManager` /
//! `BlockedClient` shape (a per-key queue of waiters, registered and
//! unregistered by identity), extended with the `notify` half the original
//! never implemented: when a push lands, the head waiter for that key is
//! woken with a non-blocking send over its single-slot reply channel. Per
//! spec, the source's "notify sends the whole remaining list, first waiter
//! re-notifies on residual" behavior becomes the adopted policy here: one
//! awakening per push, and the dispatcher re-invokes `notify` if the popped
//! list still has elements left.

use crate::types::StorageKey;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex};

static NEXT_WAITER_ID: AtomicU64 = AtomicU64::new(1);

/// A unique, process-lifetime identity for a registered waiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WaiterId(u64);

impl WaiterId {
    fn next() -> Self {
        Self(NEXT_WAITER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// What a woken waiter receives: the key that was signaled.
pub type WakeUp = StorageKey;

struct Waiter {
    keys: Vec<StorageKey>,
    reply: Option<oneshot::Sender<WakeUp>>,
}

/// A registered waiter's caller-facing half: the id needed to unregister,
/// and the receiver to await alongside its timeout.
pub struct Registration {
    pub id: WaiterId,
    pub receiver: oneshot::Receiver<WakeUp>,
}

#[derive(Default)]
struct Inner {
    /// Every live waiter, by identity. The source of truth for its reply
    /// channel and subscribed-keys list.
    waiters: HashMap<WaiterId, Waiter>,
    /// Per-key FIFO order of waiter ids subscribed to that key.
    queues: HashMap<StorageKey, VecDeque<WaiterId>>,
}

/// The blocking coordinator: a mapping from key to an ordered sequence of
/// waiters, guarded by a single mutex. No lock is held across a suspending
/// operation except briefly across the non-blocking channel send in
/// [`Coordinator::notify`].
#[derive(Clone, Default)]
pub struct Coordinator {
    inner: Arc<Mutex<Inner>>,
}

impl Coordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new waiter under each of `keys`, in order. Returns the
    /// caller-facing [`Registration`] to await and later unregister.
    pub async fn register(&self, keys: Vec<StorageKey>) -> Registration {
        let (tx, rx) = oneshot::channel();
        let id = WaiterId::next();

        let mut inner = self.inner.lock().await;
        for key in &keys {
            inner.queues.entry(key.clone()).or_default().push_back(id);
        }
        inner.waiters.insert(
            id,
            Waiter {
                keys,
                reply: Some(tx),
            },
        );

        Registration { id, receiver: rx }
    }

    /// Removes the waiter identified by `id` from every queue it was
    /// enqueued under, and drops its record entirely. No-op if already
    /// removed (signaled or previously unregistered).
    pub async fn unregister(&self, id: WaiterId) {
        let mut inner = self.inner.lock().await;
        if let Some(waiter) = inner.waiters.remove(&id) {
            for key in &waiter.keys {
                if let Some(queue) = inner.queues.get_mut(key) {
                    queue.retain(|w| *w != id);
                }
            }
        }
    }

    /// Wakes exactly one waiter subscribed to `key`, handing it `key` as the
    /// signaled key. If the head waiter's channel is already closed (it
    /// timed out and dropped its receiver, racing this call), it is
    /// discarded and the next waiter in line for `key` is tried. A no-op if
    /// the queue for `key` is empty or absent.
    pub async fn notify(&self, key: &str) {
        let mut inner = self.inner.lock().await;
        loop {
            let Some(queue) = inner.queues.get_mut(key) else {
                return;
            };
            let Some(id) = queue.pop_front() else {
                return;
            };

            let Some(waiter) = inner.waiters.remove(&id) else {
                // Already unregistered concurrently; try the next one.
                continue;
            };
            for other_key in waiter.keys.iter().filter(|k| k.as_str() != key) {
                if let Some(other_queue) = inner.queues.get_mut(other_key) {
                    other_queue.retain(|w| *w != id);
                }
            }

            let sent = waiter
                .reply
                .expect("reply taken only here")
                .send(key.to_string());
            if sent.is_ok() {
                return;
            }
            // Receiver dropped (timed out concurrently); try the next waiter.
        }
    }
}
