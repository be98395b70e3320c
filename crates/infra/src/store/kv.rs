use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use stockledger_core::Entity;

use crate::error::{LedgerError, LedgerResult};

/// Keyed record store for catalog, reservation, count and divergence rows.
///
/// Rows are replaced whole on upsert and never removed.
pub trait KeyValueStore<K, V>: Send + Sync {
    fn get(&self, key: &K) -> LedgerResult<Option<V>>;
    fn upsert(&self, key: K, value: V) -> LedgerResult<()>;
    /// All rows, in key order.
    fn list(&self) -> LedgerResult<Vec<V>>;

    /// Upsert an entity under its own id.
    fn save(&self, entity: &V) -> LedgerResult<()>
    where
        K: Clone,
        V: Entity<Id = K> + Clone,
    {
        self.upsert(entity.id().clone(), entity.clone())
    }
}

impl<K, V, S> KeyValueStore<K, V> for Arc<S>
where
    S: KeyValueStore<K, V> + ?Sized,
{
    fn get(&self, key: &K) -> LedgerResult<Option<V>> {
        (**self).get(key)
    }

    fn upsert(&self, key: K, value: V) -> LedgerResult<()> {
        (**self).upsert(key, value)
    }

    fn list(&self) -> LedgerResult<Vec<V>> {
        (**self).list()
    }
}

/// In-memory store for tests/dev.
#[derive(Debug)]
pub struct InMemoryKeyValueStore<K, V> {
    inner: RwLock<BTreeMap<K, V>>,
}

impl<K, V> InMemoryKeyValueStore<K, V> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(BTreeMap::new()),
        }
    }
}

impl<K, V> Default for InMemoryKeyValueStore<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> KeyValueStore<K, V> for InMemoryKeyValueStore<K, V>
where
    K: Ord + Send + Sync,
    V: Clone + Send + Sync,
{
    fn get(&self, key: &K) -> LedgerResult<Option<V>> {
        let map = self.inner.read().map_err(|_| LedgerError::poisoned("record store"))?;
        Ok(map.get(key).cloned())
    }

    fn upsert(&self, key: K, value: V) -> LedgerResult<()> {
        let mut map = self.inner.write().map_err(|_| LedgerError::poisoned("record store"))?;
        map.insert(key, value);
        Ok(())
    }

    fn list(&self) -> LedgerResult<Vec<V>> {
        let map = self.inner.read().map_err(|_| LedgerError::poisoned("record store"))?;
        Ok(map.values().cloned().collect())
    }
}
