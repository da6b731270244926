//! Bounded hand-off between the transition detector and the notifier.
//!
//! Capacity checks and push/pop happen under a single lock. A full queue evicts its oldest
//! entry so the producer never waits on the consumer.

use alloc::collections::VecDeque;
use core::time::Duration;

use tokio::{
    sync::{Mutex, Notify},
    time::timeout,
};
use tracing::warn;

use crate::{model::NotificationEvent, shutdown::ShutdownRx};

pub struct NotificationQueue {
    inner: Mutex<VecDeque<NotificationEvent>>,
    capacity: usize,
    ready: Notify,
}

impl NotificationQueue {
    /// Creates a queue holding at most `capacity` events (at least one).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            ready: Notify::new(),
        }
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Enqueues an event, evicting and returning the oldest pending one if the queue is full.
    pub async fn push(&self, event: NotificationEvent) -> Option<NotificationEvent> {
        let mut guard = self.inner.lock().await;
        let evicted = if guard.len() >= self.capacity {
            guard.pop_front()
        } else {
            None
        };
        guard.push_back(event);
        drop(guard);
        self.ready.notify_one();

        if let Some(ref dropped) = evicted {
            warn!(
                "Notification queue full ({}), dropping oldest event for {}",
                self.capacity, dropped.ip_address
            );
        }
        evicted
    }

    /// Removes the oldest pending event without waiting.
    pub async fn try_pop(&self) -> Option<NotificationEvent> {
        self.inner.lock().await.pop_front()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }

    /// Waits for the next event.
    ///
    /// Sleeps for at most `idle_poll` at a time while empty and re-checks, so a lost wakeup
    /// costs one poll interval at worst. Returns `None` once shutdown has been requested.
    pub async fn recv(
        &self,
        shutdown: &mut ShutdownRx,
        idle_poll: Duration,
    ) -> Option<NotificationEvent> {
        loop {
            if shutdown.is_stopping() {
                return None;
            }
            if let Some(event) = self.try_pop().await {
                return Some(event);
            }
            tokio::select! {
                () = shutdown.wait() => return None,
                _ = timeout(idle_poll, self.ready.notified()) => {}
            }
        }
    }
}
