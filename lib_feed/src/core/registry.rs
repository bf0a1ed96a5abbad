//! # Registry
//!
//! Two layers of subscription bookkeeping:
//!
//! - **`BijectiveRegistry`**: a strict one-to-one map between topic ids and
//!   resource keys. The governor reads its key set every cycle, so a key is
//!   requested once no matter how many subscriptions want it.
//! - **`SubscriptionTable`**: reference counting on top of the registry. The
//!   first subscription for a key registers a topic, later ones only bump the
//!   count, and the topic disappears when its last subscription detaches.

use std::collections::{BTreeSet, HashMap};
use std::fmt::Debug;
use std::hash::Hash;

use crate::core::model::{ResourceKey, SubscriptionId, TopicId};
use crate::error::{FeedError, FeedResult};

/// Two-way unique mapping. `left` and `right` are always exact inverses.
#[derive(Debug, Clone)]
pub struct BijectiveRegistry<L, R> {
    by_left: HashMap<L, R>,
    by_right: HashMap<R, L>,
}

impl<L, R> Default for BijectiveRegistry<L, R> {
    fn default() -> Self {
        Self {
            by_left: HashMap::new(),
            by_right: HashMap::new(),
        }
    }
}

impl<L, R> BijectiveRegistry<L, R>
where
    L: Eq + Hash + Clone + Debug,
    R: Eq + Hash + Clone + Debug,
{
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts the pair in both directions.
    ///
    /// Returns `false` and changes nothing if either side is already present.
    pub fn add(&mut self, id: L, key: R) -> bool {
        if self.by_left.contains_key(&id) || self.by_right.contains_key(&key) {
            return false;
        }
        self.by_left.insert(id.clone(), key.clone());
        self.by_right.insert(key, id);
        true
    }

    /// Removes the pair owning `id`.
    pub fn remove_by_id(&mut self, id: &L) -> bool {
        match self.by_left.remove(id) {
            Some(key) => {
                self.by_right.remove(&key);
                true
            }
            None => false,
        }
    }

    /// Removes the pair owning `key`.
    pub fn remove_by_key(&mut self, key: &R) -> bool {
        match self.by_right.remove(key) {
            Some(id) => {
                self.by_left.remove(&id);
                true
            }
            None => false,
        }
    }

    /// # Errors
    /// `NotFound` if `key` is not registered.
    pub fn lookup_by_key(&self, key: &R) -> FeedResult<&L> {
        self.by_right
            .get(key)
            .ok_or_else(|| FeedError::NotFound(format!("no id registered for {:?}", key)))
    }

    /// # Errors
    /// `NotFound` if `id` is not registered.
    pub fn lookup_by_id(&self, id: &L) -> FeedResult<&R> {
        self.by_left
            .get(id)
            .ok_or_else(|| FeedError::NotFound(format!("no key registered for {:?}", id)))
    }

    /// Registered keys, in no particular order.
    pub fn keys(&self) -> impl Iterator<Item = &R> + '_ {
        self.by_right.keys()
    }

    /// Registered `(id, key)` pairs, in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (&L, &R)> + '_ {
        self.by_left.iter()
    }

    /// Number of pairs.
    pub fn len(&self) -> usize {
        self.by_left.len()
    }

    /// `true` if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.by_left.is_empty()
    }
}

/// Result of [`SubscriptionTable::attach`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attach {
    /// Topic serving the key.
    pub topic: TopicId,
    /// `true` if this subscription created the topic.
    pub new_topic: bool,
}

/// Result of [`SubscriptionTable::detach`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detach {
    /// Topic the subscription was attached to.
    pub topic: TopicId,
    /// Key of that topic.
    pub key: ResourceKey,
    /// `true` if the topic was unregistered because no subscription is left.
    pub topic_released: bool,
}

/// Reference-counted subscriptions over a [`BijectiveRegistry`] of topics.
#[derive(Debug, Default)]
pub struct SubscriptionTable {
    topics: BijectiveRegistry<TopicId, ResourceKey>,
    subscriptions: HashMap<SubscriptionId, TopicId>,
    subscribers: HashMap<TopicId, BTreeSet<SubscriptionId>>,
    next_topic: u64,
}

impl SubscriptionTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches a subscription to the topic serving `key`, creating the topic
    /// for the first subscriber.
    ///
    /// # Errors
    /// `InvalidArgument` if `id` is already attached.
    pub fn attach(&mut self, id: SubscriptionId, key: ResourceKey) -> FeedResult<Attach> {
        if self.subscriptions.contains_key(&id) {
            return Err(FeedError::InvalidArgument(format!("{} is already registered", id)));
        }

        let existing = self.topics.lookup_by_key(&key).ok().copied();
        let (topic, new_topic) = match existing {
            Some(topic) => (topic, false),
            None => {
                self.next_topic += 1;
                let topic = TopicId(self.next_topic);
                self.topics.add(topic, key.clone());
                log::debug!("Registered {} for {}", topic, key);
                (topic, true)
            }
        };

        self.subscriptions.insert(id, topic);
        self.subscribers.entry(topic).or_default().insert(id);
        Ok(Attach { topic, new_topic })
    }

    /// Detaches a subscription, releasing its topic when it was the last one.
    ///
    /// # Errors
    /// `NotFound` if `id` is not attached.
    pub fn detach(&mut self, id: SubscriptionId) -> FeedResult<Detach> {
        let topic = self
            .subscriptions
            .remove(&id)
            .ok_or_else(|| FeedError::NotFound(format!("{} is not registered", id)))?;
        let key = self.topics.lookup_by_id(&topic)?.clone();

        let remaining = match self.subscribers.get_mut(&topic) {
            Some(set) => {
                set.remove(&id);
                set.len()
            }
            None => 0,
        };

        let topic_released = remaining == 0;
        if topic_released {
            self.subscribers.remove(&topic);
            self.topics.remove_by_id(&topic);
            log::debug!("Released {} for {}", topic, key);
        }

        Ok(Detach {
            topic,
            key,
            topic_released,
        })
    }

    /// Subscriptions currently attached to `topic`, in id order.
    pub fn subscribers_of(&self, topic: TopicId) -> impl Iterator<Item = SubscriptionId> + '_ {
        self.subscribers.get(&topic).into_iter().flatten().copied()
    }

    /// Every subscription id, in no particular order.
    pub fn subscription_ids(&self) -> impl Iterator<Item = SubscriptionId> + '_ {
        self.subscriptions.keys().copied()
    }

    /// Snapshot of registered topics with their keys, ordered by topic id.
    pub fn topics(&self) -> Vec<(TopicId, ResourceKey)> {
        let mut topics: Vec<(TopicId, ResourceKey)> = self
            .topics
            .iter()
            .map(|(topic, key)| (*topic, key.clone()))
            .collect();
        topics.sort_by_key(|(topic, _)| *topic);
        topics
    }

    /// Every registered key exactly once.
    pub fn resource_keys(&self) -> Vec<ResourceKey> {
        self.topics().into_iter().map(|(_, key)| key).collect()
    }

    /// The registry backing the table.
    pub fn registry(&self) -> &BijectiveRegistry<TopicId, ResourceKey> {
        &self.topics
    }

    /// Number of attached subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Number of distinct topics.
    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }

    /// `true` if no subscription is attached.
    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_inverse(registry: &BijectiveRegistry<u32, String>) {
        for (id, key) in registry.iter() {
            assert_eq!(registry.lookup_by_key(key).unwrap(), id);
            assert_eq!(registry.lookup_by_id(id).unwrap(), key);
        }
        assert_eq!(registry.keys().count(), registry.len());
    }

    #[test]
    fn test_add_rejects_either_side_duplicate() {
        let mut registry = BijectiveRegistry::new();
        assert!(registry.add(1u32, "a".to_string()));
        assert!(!registry.add(1, "b".to_string()));
        assert!(!registry.add(2, "a".to_string()));
        assert_eq!(registry.len(), 1);
        assert!(matches!(registry.lookup_by_id(&2), Err(FeedError::NotFound(_))));
        assert!(matches!(registry.lookup_by_key(&"b".to_string()), Err(FeedError::NotFound(_))));
    }

    #[test]
    fn test_mixed_sequences_keep_maps_inverse() {
        let mut registry = BijectiveRegistry::new();
        // Deterministic pseudo-random walk over a small id/key space.
        let mut state = 0x2545_f491_u32;
        for _ in 0..2_000 {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            let id = state % 16;
            let key = format!("k{}", (state >> 8) % 16);
            match state % 4 {
                0 | 1 => {
                    let id_taken = registry.lookup_by_id(&id).is_ok();
                    let key_taken = registry.lookup_by_key(&key).is_ok();
                    assert_eq!(registry.add(id, key), !id_taken && !key_taken);
                }
                2 => {
                    let present = registry.lookup_by_id(&id).is_ok();
                    assert_eq!(registry.remove_by_id(&id), present);
                }
                _ => {
                    let present = registry.lookup_by_key(&key).is_ok();
                    assert_eq!(registry.remove_by_key(&key), present);
                }
            }
            assert_inverse(&registry);
        }
    }

    #[test]
    fn test_shared_key_collapses_to_one_topic() {
        let mut table = SubscriptionTable::new();
        let key = ResourceKey::new("BTCUSDT", "price");

        let first = table.attach(SubscriptionId(10), key.clone()).unwrap();
        let second = table.attach(SubscriptionId(11), key.clone()).unwrap();
        assert!(first.new_topic);
        assert!(!second.new_topic);
        assert_eq!(first.topic, second.topic);
        assert_eq!(table.topic_count(), 1);
        assert_eq!(table.subscription_count(), 2);
        assert_eq!(table.resource_keys(), vec![key.clone()]);
        assert_eq!(
            table.subscribers_of(first.topic).collect::<Vec<_>>(),
            vec![SubscriptionId(10), SubscriptionId(11)]
        );

        let detach = table.detach(SubscriptionId(10)).unwrap();
        assert!(!detach.topic_released);
        assert_eq!(table.topic_count(), 1);

        let detach = table.detach(SubscriptionId(11)).unwrap();
        assert!(detach.topic_released);
        assert_eq!(detach.key, key);
        assert!(table.is_empty());
        assert!(table.registry().is_empty());
    }

    #[test]
    fn test_duplicate_and_unknown_ids() {
        let mut table = SubscriptionTable::new();
        table.attach(SubscriptionId(1), ResourceKey::new("ETHUSDT", "volume")).unwrap();
        assert!(matches!(
            table.attach(SubscriptionId(1), ResourceKey::new("ETHUSDT", "price")),
            Err(FeedError::InvalidArgument(_))
        ));
        assert!(matches!(table.detach(SubscriptionId(2)), Err(FeedError::NotFound(_))));
        assert_eq!(table.topic_count(), 1);
    }
}
