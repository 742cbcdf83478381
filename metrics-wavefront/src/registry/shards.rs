use std::{
    collections::hash_map::RandomState,
    hash::BuildHasher,
    iter::repeat_with,
    sync::{PoisonError, RwLock},
};

use hashbrown::HashMap;

/// One kind's worth of metrics, split across independently locked subshards.
pub(super) struct Shards<V> {
    subshards: Vec<RwLock<HashMap<String, V>>>,
    shard_mask: usize,
    hasher: RandomState,
}

impl<V: Clone> Shards<V> {
    pub fn new() -> Self {
        let shard_count = std::cmp::max(1, num_cpus::get()).next_power_of_two();
        let subshards = repeat_with(|| RwLock::new(HashMap::new())).take(shard_count).collect();

        Self { subshards, shard_mask: shard_count - 1, hasher: RandomState::new() }
    }

    fn shard_for(&self, key: &str) -> &RwLock<HashMap<String, V>> {
        let hash = self.hasher.hash_one(key);
        &self.subshards[hash as usize & self.shard_mask]
    }

    pub fn get(&self, key: &str) -> Option<V> {
        let shard = self.shard_for(key);
        let shard_read = shard.read().unwrap_or_else(PoisonError::into_inner);
        shard_read.get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        let shard = self.shard_for(key);
        shard.read().unwrap_or_else(PoisonError::into_inner).contains_key(key)
    }

    /// Gets the value under `key`, creating it with `create` if it does not exist yet.
    ///
    /// The fast path only takes a read lock. Under the write lock the key is checked again, so a
    /// concurrent creator that won the race hands its value to everyone else.
    pub fn get_or_create<F>(&self, key: &str, create: F) -> V
    where
        F: FnOnce() -> V,
    {
        let shard = self.shard_for(key);

        {
            let shard_read = shard.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(value) = shard_read.get(key) {
                return value.clone();
            }
        }

        let mut shard_write = shard.write().unwrap_or_else(PoisonError::into_inner);
        shard_write.entry(key.to_string()).or_insert_with(create).clone()
    }

    /// Inserts `value` under `key` if the key is free, otherwise returns the existing value.
    pub fn insert_new(&self, key: &str, value: V) -> Result<(), V> {
        let shard = self.shard_for(key);
        let mut shard_write = shard.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = shard_write.get(key) {
            return Err(existing.clone());
        }

        shard_write.insert(key.to_string(), value);
        Ok(())
    }

    pub fn remove(&self, key: &str) -> bool {
        let shard = self.shard_for(key);
        shard.write().unwrap_or_else(PoisonError::into_inner).remove(key).is_some()
    }

    pub fn clear(&self) {
        for subshard in &self.subshards {
            subshard.write().unwrap_or_else(PoisonError::into_inner).clear();
        }
    }

    /// Visits every value, one subshard at a time.
    ///
    /// Values added or removed in a subshard that was already visited are not observed.
    pub fn visit<F>(&self, mut collect: F)
    where
        F: FnMut(&str, &V),
    {
        for subshard in &self.subshards {
            let shard_read = subshard.read().unwrap_or_else(PoisonError::into_inner);
            for (key, value) in shard_read.iter() {
                collect(key, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Shards;

    #[test]
    fn insert_new_keeps_first_value() {
        let shards = Shards::new();
        assert_eq!(shards.insert_new("a", 1), Ok(()));
        assert_eq!(shards.insert_new("a", 2), Err(1));
        assert_eq!(shards.get("a"), Some(1));
    }

    #[test]
    fn get_or_create_only_creates_once() {
        let shards = Shards::new();
        assert_eq!(shards.get_or_create("a", || 1), 1);
        assert_eq!(shards.get_or_create("a", || 2), 1);

        let mut seen = Vec::new();
        shards.visit(|key, value| seen.push((key.to_string(), *value)));
        assert_eq!(seen, vec![("a".to_string(), 1)]);
    }

    #[test]
    fn shard_count_follows_cpu_count() {
        let shards = Shards::<u64>::new();
        let count = shards.subshards.len();
        assert!(count.is_power_of_two());
        assert!(count >= num_cpus::get());
        assert_eq!(shards.shard_mask, count - 1);
    }
}
