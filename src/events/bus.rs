//! Fan-out of repair events to subscribers.

use crossbeam_channel::{bounded, Sender, TrySendError};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use super::types::{
    DropReason, EventFilter, RepairEvent, SubscriptionConfig, SubscriptionHandle, SubscriptionId,
};

struct Subscriber {
    filter: EventFilter,
    tx: Sender<RepairEvent>,
}

impl Subscriber {
    /// False when the subscriber can no longer keep up or has gone away.
    fn deliver(&self, event: &RepairEvent) -> bool {
        if !self.filter.matches(event) {
            return true;
        }
        match self.tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_) | TrySendError::Disconnected(_)) => false,
        }
    }

    /// Last message before the channel is dropped; lost if the buffer is full.
    fn farewell(self, reason: DropReason) {
        let _ = self.tx.try_send(RepairEvent::Dropped { reason });
    }
}

/// Broadcasts repair events.
///
/// Publishing never blocks a sweep: a subscriber whose buffer is full is
/// removed and its handle sees a final [`RepairEvent::Dropped`] if there is
/// room for it.
pub struct EventBus {
    subscribers: RwLock<HashMap<SubscriptionId, Subscriber>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn subscribe(&self, config: SubscriptionConfig) -> SubscriptionHandle {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (tx, receiver) = bounded(config.buffer_size);
        self.subscribers.write().insert(
            id,
            Subscriber {
                filter: config.filter,
                tx,
            },
        );
        SubscriptionHandle { id, receiver }
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        let removed = self.subscribers.write().remove(&id);
        if let Some(subscriber) = removed {
            subscriber.farewell(DropReason::Unsubscribed);
        }
    }

    pub fn subscription_count(&self) -> usize {
        self.subscribers.read().len()
    }

    pub fn publish(&self, event: RepairEvent) {
        let lagging: Vec<SubscriptionId> = {
            let subscribers = self.subscribers.read();
            subscribers
                .iter()
                .filter(|(_, subscriber)| !subscriber.deliver(&event))
                .map(|(id, _)| *id)
                .collect()
        };
        if lagging.is_empty() {
            return;
        }

        let mut subscribers = self.subscribers.write();
        for id in lagging {
            if let Some(subscriber) = subscribers.remove(&id) {
                tracing::warn!(
                    target: "seqwarden::events",
                    subscription = id.0,
                    "subscriber fell behind and was dropped"
                );
                subscriber.farewell(DropReason::BufferOverflow);
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
