use super::change::CoinCounts;
use super::denomination::Denomination;
use crate::error::Result;
use async_trait::async_trait;

/// Access to the persisted coin inventory.
///
/// The inventory is owned externally; this subsystem only reads snapshots
/// and writes back *actually* dispensed counts, never requested counts.
#[async_trait]
pub trait InventoryStore: Send + Sync {
    async fn coin_counts(&self) -> Result<CoinCounts>;
    async fn set_coin_count(&self, denomination: Denomination, count: u64) -> Result<()>;
}

/// Read access to the named-settings store (reserve thresholds, max-change
/// cap). Values are stored as strings and validated on load.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
}

pub type InventoryStoreBox = Box<dyn InventoryStore>;
pub type SettingsStoreBox = Box<dyn SettingsStore>;
