//! # Value Frame Dispatcher
//!
//! Fans each cycle's values out to every host listener. A frame is wrapped in
//! an `Arc` once and every listener receives a pointer to the same block, so
//! the cost of a broadcast does not grow with the payload.
//!
//! Listeners whose receiver has been dropped are pruned on the next send. The
//! dispatcher also keeps the last value delivered to each subscription.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;

use crate::core::model::{FeedValue, SubscriptionId};

/// One delivery: values for a set of subscriptions.
#[derive(Debug, Clone)]
pub struct ValueFrame {
    /// Governor cycle that produced the values; 0 for status-only frames.
    pub cycle: u64,
    /// Value per subscription.
    pub values: Vec<(SubscriptionId, FeedValue)>,
}

struct ListenerHandle {
    id: String,
    sender: mpsc::UnboundedSender<Arc<ValueFrame>>,
}

/// Pushes value frames to registered listeners.
#[derive(Default)]
pub struct Dispatcher {
    listeners: Mutex<Vec<ListenerHandle>>,
    latest: Mutex<HashMap<SubscriptionId, FeedValue>>,
}

fn guard<T>(lock: &Mutex<T>) -> MutexGuard<'_, T> {
    lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Dispatcher {
    /// Creates a dispatcher with no listeners.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a listener and returns its receiving end.
    ///
    /// Re-registering an id replaces the previous channel.
    pub fn add_listener(&self, id: &str) -> mpsc::UnboundedReceiver<Arc<ValueFrame>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut listeners = guard(&self.listeners);
        listeners.retain(|l| l.id != id);
        listeners.push(ListenerHandle {
            id: id.to_string(),
            sender: tx,
        });
        log::info!("Listener '{}' registered", id);
        rx
    }

    /// Removes a listener by id.
    pub fn remove_listener(&self, id: &str) {
        guard(&self.listeners).retain(|l| l.id != id);
        log::info!("Listener '{}' explicitly removed.", id);
    }

    /// Number of live listeners.
    pub fn listener_count(&self) -> usize {
        guard(&self.listeners).len()
    }

    /// Sends one frame to every listener and records the values as latest.
    pub fn broadcast(&self, cycle: u64, values: Vec<(SubscriptionId, FeedValue)>) {
        if values.is_empty() {
            return;
        }
        {
            let mut latest = guard(&self.latest);
            for (id, value) in &values {
                latest.insert(*id, value.clone());
            }
        }

        let frame = Arc::new(ValueFrame { cycle, values });

        guard(&self.listeners).retain(|listener| match listener.sender.send(Arc::clone(&frame)) {
            Ok(()) => true,
            Err(_) => {
                log::info!("Listener '{}' disconnected. Removing from dispatcher.", listener.id);
                false
            }
        });
    }

    /// Last value delivered to a subscription.
    pub fn latest(&self, id: SubscriptionId) -> Option<FeedValue> {
        guard(&self.latest).get(&id).cloned()
    }

    /// Drops the cached value of a destroyed subscription.
    pub fn forget(&self, id: SubscriptionId) {
        guard(&self.latest).remove(&id);
    }
}
