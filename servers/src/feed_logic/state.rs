use lib_feed::{FeedManager, FeedValue, RemoteApi, ResourceKey, StatusLabel, SubscriptionId};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;

// Result type for acknowledgements
pub type AckResult = Result<(), String>;

#[derive(Default)]
struct ClientKeys {
    by_key: HashMap<ResourceKey, SubscriptionId>,
    by_id: HashMap<SubscriptionId, ResourceKey>,
}

pub struct AppState<P: RemoteApi> {
    pub feed: FeedManager<P>,
    // Map of client_id -> the feed subscriptions it owns
    clients: Arc<Mutex<HashMap<usize, ClientKeys>>>,
    next_subscription: Arc<AtomicU64>,
}

impl<P: RemoteApi> Clone for AppState<P> {
    fn clone(&self) -> Self {
        Self {
            feed: self.feed.clone(),
            clients: Arc::clone(&self.clients),
            next_subscription: Arc::clone(&self.next_subscription),
        }
    }
}

impl<P: RemoteApi> AppState<P> {
    pub fn new(feed: FeedManager<P>) -> Self {
        Self {
            feed,
            clients: Arc::new(Mutex::new(HashMap::new())),
            next_subscription: Arc::new(AtomicU64::new(1)),
        }
    }

    pub async fn add_client(&self, client_id: usize) {
        let mut clients = self.clients.lock().await;
        clients.insert(client_id, ClientKeys::default());
    }

    pub async fn remove_client(&self, client_id: usize) {
        let removed = self.clients.lock().await.remove(&client_id);
        if let Some(keys) = removed {
            for id in keys.by_id.into_keys() {
                if let Err(e) = self.feed.on_subscription_destroyed(id).await {
                    log::warn!("Client {}: failed to release {}: {}", client_id, id, e);
                }
            }
        }
    }

    /// One feed subscription per (client, key). Returns the status label per key.
    ///
    /// The client map is not locked while the feed is called.
    pub async fn subscribe(
        &self,
        client_id: usize,
        keys: Vec<ResourceKey>,
    ) -> Vec<(ResourceKey, Result<StatusLabel, String>)> {
        let mut results = Vec::with_capacity(keys.len());
        for key in keys {
            let id = {
                let clients = self.clients.lock().await;
                match clients.get(&client_id) {
                    None => {
                        results.push((key, Err(format!("unknown client {}", client_id))));
                        continue;
                    }
                    Some(client) if client.by_key.contains_key(&key) => {
                        results.push((key, Ok(self.feed.status_label())));
                        continue;
                    }
                    Some(_) => SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed)),
                }
            };

            let label = match self.feed.on_subscription_created(id, key.clone()).await {
                Ok(label) => label,
                Err(e) => {
                    results.push((key, Err(e.to_string())));
                    continue;
                }
            };

            let (recorded, release) = {
                let mut clients = self.clients.lock().await;
                match clients.get_mut(&client_id) {
                    Some(client) if !client.by_key.contains_key(&key) => {
                        client.by_key.insert(key.clone(), id);
                        client.by_id.insert(id, key.clone());
                        (Ok(label), false)
                    }
                    // A concurrent subscribe recorded the key first.
                    Some(_) => (Ok(label), true),
                    None => (Err(format!("client {} disconnected", client_id)), true),
                }
            };
            if release {
                if let Err(e) = self.feed.on_subscription_destroyed(id).await {
                    log::warn!("Client {}: failed to release {}: {}", client_id, id, e);
                }
            }
            results.push((key, recorded));
        }
        results
    }

    pub async fn unsubscribe(&self, client_id: usize, keys: Vec<ResourceKey>) -> AckResult {
        let mut released = Vec::new();
        let mut missing = Vec::new();
        {
            let mut clients = self.clients.lock().await;
            let client = clients
                .get_mut(&client_id)
                .ok_or_else(|| format!("unknown client {}", client_id))?;
            for key in keys {
                match client.by_key.remove(&key) {
                    Some(id) => {
                        client.by_id.remove(&id);
                        released.push(id);
                    }
                    None => missing.push(key.to_string()),
                }
            }
        }

        for id in released {
            self.feed.on_subscription_destroyed(id).await.map_err(|e| e.to_string())?;
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(format!("not subscribed: {}", missing.join(", ")))
        }
    }

    /// Keeps the values addressed to this client, keyed by resource.
    pub async fn route(&self, client_id: usize, values: &[(SubscriptionId, FeedValue)]) -> Vec<(ResourceKey, FeedValue)> {
        let clients = self.clients.lock().await;
        let Some(client) = clients.get(&client_id) else {
            return Vec::new();
        };
        values
            .iter()
            .filter_map(|(id, value)| client.by_id.get(id).map(|key| (key.clone(), value.clone())))
            .collect()
    }

    pub async fn subscription_count(&self, client_id: usize) -> usize {
        self.clients
            .lock()
            .await
            .get(&client_id)
            .map(|client| client.by_id.len())
            .unwrap_or(0)
    }
}
