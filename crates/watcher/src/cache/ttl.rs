use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::clock::Clock;

/// One cached value and the time it was stored
#[derive(Debug, Clone)]
pub struct CacheRecord<V> {
    pub age: DateTime<Utc>,
    pub data: V,
}

impl<V> CacheRecord<V> {
    /// Valid while `now < age + ttl`
    pub fn is_valid_at(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        if self.age == DateTime::<Utc>::MIN_UTC {
            return false;
        }
        match chrono::Duration::from_std(ttl) {
            Ok(ttl) => self.age.checked_add_signed(ttl).is_some_and(|expiry| now < expiry),
            Err(_) => true,
        }
    }
}

/// Key/value map whose entries expire a fixed time after insertion
///
/// Entries are never evicted, a newer store simply supersedes them.
pub struct TtlCache<K, V> {
    records: RwLock<HashMap<K, CacheRecord<V>>>,
    clock: Arc<dyn Clock>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            clock,
        }
    }

    pub fn store(&self, key: K, data: V) {
        let record = CacheRecord {
            age: self.clock.now(),
            data,
        };
        self.records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, record);
    }

    pub fn is_valid(&self, key: &K, ttl: Duration) -> bool {
        let now = self.clock.now();
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .is_some_and(|record| record.is_valid_at(now, ttl))
    }

    /// Cached value regardless of age
    pub fn get(&self, key: &K) -> Option<V> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .map(|record| record.data.clone())
    }

    /// Cached value if still valid, checked and read under one lock
    pub fn get_valid(&self, key: &K, ttl: Duration) -> Option<V> {
        let now = self.clock.now();
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .filter(|record| record.is_valid_at(now, ttl))
            .map(|record| record.data.clone())
    }

    pub fn len(&self) -> usize {
        self.records.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
