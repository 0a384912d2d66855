//! Keyed storage for message groups and the per-key lock registry.

use crate::{
    error::StoreError,
    group::MessageGroup,
    message::Message,
    types::{Key, Payload},
};
use dashmap::DashMap;
use std::{
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
    time::Instant,
};

/// Storage for message groups.
///
/// Implementations must be safe to use from many threads for distinct
/// keys. Operations on the same key are serialized by the handler
/// through [KeyLocks], so a store only needs per-call atomicity.
pub trait GroupStore<K, T>: Send + Sync {
    /// Returns the group for the key, creating an empty one when
    /// absent. The flag tells whether the group was created.
    fn get_or_create(&self, key: &K) -> (MessageGroup<K, T>, bool);

    fn get(&self, key: &K) -> Option<MessageGroup<K, T>>;

    /// Appends a message to the key's group and returns the group as
    /// it is after the insertion.
    fn add(&self, key: &K, message: Message<T>) -> Result<MessageGroup<K, T>, StoreError>;

    /// Overwrites the stored group that has the same key.
    fn replace(&self, group: MessageGroup<K, T>);

    fn remove(&self, key: &K) -> Option<MessageGroup<K, T>>;

    /// Lists the messages buffered for the key. Empty once the group
    /// was removed.
    fn list(&self, key: &K) -> Vec<Message<T>>;

    /// Lists the keys of groups created at or before the cutoff.
    fn expire_older_than(&self, cutoff: Instant) -> Vec<K>;

    /// Number of groups.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A [GroupStore] keeping groups in a sharded concurrent map.
///
/// An optional capacity bounds the number of messages buffered across
/// all groups.
#[derive(Debug)]
pub struct InMemoryGroupStore<K, T>
where
    K: Key,
{
    groups: DashMap<K, MessageGroup<K, T>>,
    capacity: Option<usize>,
    message_count: AtomicUsize,
}

impl<K, T> Default for InMemoryGroupStore<K, T>
where
    K: Key,
    T: Payload,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, T> InMemoryGroupStore<K, T>
where
    K: Key,
    T: Payload,
{
    pub fn new() -> Self {
        Self::with_capacity(None)
    }

    pub fn with_capacity(capacity: Option<usize>) -> Self {
        Self {
            groups: DashMap::new(),
            capacity,
            message_count: AtomicUsize::new(0),
        }
    }

    /// Number of messages buffered across all groups.
    pub fn message_count(&self) -> usize {
        self.message_count.load(Ordering::SeqCst)
    }

    fn reserve_one(&self) -> Result<(), StoreError> {
        match self.capacity {
            Some(capacity) => self
                .message_count
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |count| {
                    (count < capacity).then_some(count + 1)
                })
                .map(|_| ())
                .map_err(|_| StoreError::CapacityExceeded { capacity }),
            None => {
                self.message_count.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }
    }

    fn release(&self, count: usize) {
        self.message_count.fetch_sub(count, Ordering::SeqCst);
    }
}

impl<K, T> GroupStore<K, T> for InMemoryGroupStore<K, T>
where
    K: Key,
    T: Payload,
{
    fn get_or_create(&self, key: &K) -> (MessageGroup<K, T>, bool) {
        let mut created = false;
        let group = self
            .groups
            .entry(key.clone())
            .or_insert_with(|| {
                created = true;
                MessageGroup::new(key.clone())
            })
            .value()
            .clone();
        (group, created)
    }

    fn get(&self, key: &K) -> Option<MessageGroup<K, T>> {
        self.groups.get(key).map(|group| group.value().clone())
    }

    fn add(&self, key: &K, message: Message<T>) -> Result<MessageGroup<K, T>, StoreError> {
        let mut group = self
            .groups
            .entry(key.clone())
            .or_insert_with(|| MessageGroup::new(key.clone()));
        self.reserve_one()?;
        group.push(message);
        Ok(group.value().clone())
    }

    fn replace(&self, group: MessageGroup<K, T>) {
        let new_len = group.len();
        let old_len = self
            .groups
            .insert(group.key().clone(), group)
            .map_or(0, |old| old.len());

        if new_len >= old_len {
            self.message_count
                .fetch_add(new_len - old_len, Ordering::SeqCst);
        } else {
            self.release(old_len - new_len);
        }
    }

    fn remove(&self, key: &K) -> Option<MessageGroup<K, T>> {
        let (_, group) = self.groups.remove(key)?;
        self.release(group.len());
        Some(group)
    }

    fn list(&self, key: &K) -> Vec<Message<T>> {
        self.groups
            .get(key)
            .map(|group| group.messages().to_vec())
            .unwrap_or_default()
    }

    fn expire_older_than(&self, cutoff: Instant) -> Vec<K> {
        self.groups
            .iter()
            .filter(|entry| entry.value().created_at() <= cutoff)
            .map(|entry| entry.key().clone())
            .collect()
    }

    fn len(&self) -> usize {
        self.groups.len()
    }
}

/// Registry of per-key mutexes.
///
/// Callers working on different keys never contend. An entry is
/// dropped as soon as no caller holds or waits on it.
#[derive(Debug)]
pub struct KeyLocks<K>
where
    K: Key,
{
    locks: DashMap<K, Arc<Mutex<()>>>,
}

impl<K> Default for KeyLocks<K>
where
    K: Key,
{
    fn default() -> Self {
        Self {
            locks: DashMap::new(),
        }
    }
}

impl<K> KeyLocks<K>
where
    K: Key,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `f` while holding the key's lock.
    pub fn with_lock<R>(&self, key: &K, f: impl FnOnce() -> R) -> R {
        let lock = self.locks.entry(key.clone()).or_default().value().clone();

        let result = {
            let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            f()
        };

        // The map shard is write-locked inside remove_if, so nobody can
        // clone the entry while its strong count is inspected.
        drop(lock);
        self.locks
            .remove_if(key, |_, lock| Arc::strong_count(lock) == 1);

        result
    }

    /// Number of keys currently locked or waited on.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{thread, time::Duration};

    fn message(payload: u32) -> Message<u32> {
        Message::builder(payload).correlation_id("A").build()
    }

    #[test]
    fn test_get_or_create_reports_creation() {
        let store = InMemoryGroupStore::<&str, u32>::new();

        let (group, created) = store.get_or_create(&"A");
        assert!(created);
        assert!(group.is_empty());

        let (_, created) = store.get_or_create(&"A");
        assert!(!created);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_add_returns_updated_group() {
        let store = InMemoryGroupStore::new();

        store.add(&"A", message(1)).unwrap();
        let group = store.add(&"A", message(2)).unwrap();

        assert_eq!(group.len(), 2);
        assert_eq!(store.list(&"A"), vec![message(1), message(2)]);
        assert_eq!(store.message_count(), 2);
    }

    #[test]
    fn test_list_is_empty_after_remove() {
        let store = InMemoryGroupStore::new();
        store.add(&"A", message(1)).unwrap();

        let removed = store.remove(&"A").unwrap();
        assert_eq!(removed.len(), 1);
        assert!(store.list(&"A").is_empty());
        assert!(store.is_empty());
        assert_eq!(store.message_count(), 0);
    }

    #[test]
    fn test_capacity_limits_buffered_messages() {
        let store = InMemoryGroupStore::with_capacity(Some(2));
        store.add(&"A", message(1)).unwrap();
        store.add(&"B", message(2)).unwrap();

        let result = store.add(&"A", message(3));
        assert_eq!(result.unwrap_err(), StoreError::CapacityExceeded { capacity: 2 });
        assert_eq!(store.list(&"A").len(), 1);

        store.remove(&"B");
        assert!(store.add(&"A", message(3)).is_ok());
    }

    #[test]
    fn test_replace_tracks_message_count() {
        let store = InMemoryGroupStore::new();
        store.add(&"A", message(1)).unwrap();
        let mut group = store.add(&"A", message(2)).unwrap();

        group.take_messages();
        store.replace(group);
        assert_eq!(store.message_count(), 0);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_expire_older_than() {
        let store = InMemoryGroupStore::<&str, u32>::new();
        let start = Instant::now();
        store.replace(MessageGroup::with_created_at("old", start));
        store.replace(MessageGroup::with_created_at(
            "young",
            start + Duration::from_secs(10),
        ));

        let expired = store.expire_older_than(start + Duration::from_secs(1));
        assert_eq!(expired, vec!["old"]);
    }

    #[test]
    fn test_key_locks_are_released() {
        let locks = KeyLocks::new();
        let value = locks.with_lock(&"A", || 42);

        assert_eq!(value, 42);
        assert!(locks.is_empty());
    }

    #[test]
    fn test_key_locks_serialize_same_key() {
        let locks = Arc::new(KeyLocks::new());
        let counter = Arc::new(Mutex::new(Vec::new()));

        let handles: Vec<_> = (0..4)
            .map(|id| {
                let locks = locks.clone();
                let counter = counter.clone();
                thread::spawn(move || {
                    locks.with_lock(&"A", || {
                        counter.lock().unwrap().push((id, "enter"));
                        thread::sleep(Duration::from_millis(5));
                        counter.lock().unwrap().push((id, "exit"));
                    })
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        // Every enter is immediately followed by the exit of the same
        // thread.
        let events = counter.lock().unwrap();
        for pair in events.chunks(2) {
            assert_eq!(pair[0].0, pair[1].0);
            assert_eq!(pair[0].1, "enter");
            assert_eq!(pair[1].1, "exit");
        }
        assert!(locks.is_empty());
    }
}
