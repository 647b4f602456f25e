use crate::domain::change::CoinCounts;
use crate::domain::denomination::Denomination;
use crate::domain::ports::{InventoryStore, SettingsStore};
use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A thread-safe in-memory coin inventory.
///
/// Uses `Arc<RwLock<CoinCounts>>` for shared concurrent access. Ideal for
/// testing and for the CLI, where the persistent store is out of scope.
#[derive(Default, Clone)]
pub struct InMemoryInventoryStore {
    counts: Arc<RwLock<CoinCounts>>,
}

impl InMemoryInventoryStore {
    /// Creates an empty inventory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an inventory seeded with the given counts.
    pub fn with_counts(counts: CoinCounts) -> Self {
        Self {
            counts: Arc::new(RwLock::new(counts)),
        }
    }
}

#[async_trait]
impl InventoryStore for InMemoryInventoryStore {
    async fn coin_counts(&self) -> Result<CoinCounts> {
        Ok(*self.counts.read().await)
    }

    async fn set_coin_count(&self, denomination: Denomination, count: u64) -> Result<()> {
        let mut counts = self.counts.write().await;
        counts.set_count(denomination, count);
        Ok(())
    }
}

/// A thread-safe in-memory settings store with string values, matching the
/// shape of the kiosk's named-settings table.
#[derive(Default, Clone)]
pub struct InMemorySettingsStore {
    values: Arc<RwLock<HashMap<String, String>>>,
}

impl InMemorySettingsStore {
    /// Creates an empty settings store (all consumers see defaults).
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set(&self, key: &str, value: &str) {
        let mut values = self.values.write().await;
        values.insert(key.to_string(), value.to_string());
    }
}

#[async_trait]
impl SettingsStore for InMemorySettingsStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let values = self.values.read().await;
        Ok(values.get(key).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_inventory_store() {
        let store = InMemoryInventoryStore::with_counts(CoinCounts::new(10, 4));
        assert_eq!(store.coin_counts().await.unwrap(), CoinCounts::new(10, 4));

        store.set_coin_count(Denomination::Five, 2).await.unwrap();
        assert_eq!(store.coin_counts().await.unwrap(), CoinCounts::new(10, 2));
    }

    #[tokio::test]
    async fn test_in_memory_settings_store() {
        let store = InMemorySettingsStore::new();
        assert_eq!(store.get("max_change_limit").await.unwrap(), None);

        store.set("max_change_limit", "30").await;
        assert_eq!(
            store.get("max_change_limit").await.unwrap().as_deref(),
            Some("30")
        );
    }
}
