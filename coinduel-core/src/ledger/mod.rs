pub mod memory;

pub use memory::MemoryLedger;

use crate::error::Result;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// An interchangeable currency backend.
///
/// Withdraw and deposit may perform network or disk IO; callers treat a
/// failed withdraw as "no funds moved" and a failed deposit as an anomaly
/// to be logged and reconciled.
#[async_trait]
pub trait LedgerProvider: Send + Sync {
    async fn balance(&self, account: Uuid) -> Result<u64>;

    async fn withdraw(&self, account: Uuid, amount: u64) -> Result<()>;

    async fn deposit(&self, account: Uuid, amount: u64) -> Result<()>;

    fn display_name(&self) -> &str;
}

/// Named registry of ledger providers. Lookup is case-insensitive: keys are
/// uppercased on registration and lookup so stored selector strings survive
/// config edits that change casing.
pub struct LedgerRegistry {
    providers: RwLock<HashMap<String, Arc<dyn LedgerProvider>>>,
}

impl LedgerRegistry {
    pub fn new() -> Self {
        Self {
            providers: RwLock::new(HashMap::new()),
        }
    }

    pub fn register(&self, key: &str, provider: Arc<dyn LedgerProvider>) {
        let key = key.to_uppercase();
        tracing::info!("Registered ledger provider '{}'", key);
        self.providers.write().insert(key, provider);
    }

    pub fn get(&self, key: &str) -> Option<Arc<dyn LedgerProvider>> {
        self.providers.read().get(&key.to_uppercase()).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        self.providers.read().keys().cloned().collect()
    }
}

impl Default for LedgerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_case_insensitive() {
        let registry = LedgerRegistry::new();
        registry.register("Gold", Arc::new(MemoryLedger::new("Gold")));

        assert!(registry.get("GOLD").is_some());
        assert!(registry.get("gold").is_some());
        assert!(registry.get("silver").is_none());
    }
}
