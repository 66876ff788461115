use crate::error::{EngineError, Result};
use crate::wager::{Wager, WagerState};
use coinduel_core::{ListingStore, Storage, StoredListing};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

const SAVE_ATTEMPTS: u32 = 3;
const SAVE_RETRY_DELAY: Duration = Duration::from_millis(200);

/// Authoritative map from creator identity to open wager.
///
/// The in-memory map is the source of truth for "does this account have an
/// open, unpaired listing"; the durable store trails it asynchronously.
/// A listing becomes visible the moment it is added, before its store write
/// lands (eventual durability).
pub struct ListingRegistry {
    storage: Arc<Storage>,
    listings: RwLock<HashMap<Uuid, Arc<Wager>>>,
}

impl ListingRegistry {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self {
            storage,
            listings: RwLock::new(HashMap::new()),
        }
    }

    /// Add an open listing. Fails if the creator already has one; the
    /// map insert is the uniqueness gate, the store write trails it.
    pub fn add(&self, wager: Arc<Wager>) -> Result<()> {
        let creator = wager.creator();

        {
            let mut listings = self.listings.write();
            if listings.contains_key(&creator) {
                return Err(EngineError::DuplicateListing(creator));
            }
            listings.insert(creator, wager.clone());
        }

        self.spawn_save(wager.to_stored());
        Ok(())
    }

    /// Atomically remove and return the listing for `creator`. This is the
    /// mutual-exclusion point for racing acceptors: only the caller that
    /// gets `Some` may proceed with the pairing.
    pub fn take(&self, creator: Uuid) -> Option<Arc<Wager>> {
        let removed = self.listings.write().remove(&creator);
        if removed.is_some() {
            self.spawn_delete(creator);
        }
        removed
    }

    /// Idempotent removal. The store delete is always scheduled, even when
    /// the entry was not in memory, so a row orphaned by an earlier crash
    /// still gets cleaned up.
    pub fn remove(&self, creator: Uuid) -> bool {
        let removed = self.listings.write().remove(&creator).is_some();
        self.spawn_delete(creator);
        removed
    }

    /// Re-insert a listing whose acceptance fell through (e.g. the
    /// accepter's withdraw failed after the take). A wager that went
    /// terminal in the meantime (a cancellation raced the acceptance and
    /// already refunded the creator) is not reinstated; its store row is
    /// deleted instead so recovery never refunds the stake a second time.
    pub fn put_back(&self, wager: Arc<Wager>) {
        let creator = wager.creator();
        if wager.state() != WagerState::Listed {
            self.spawn_delete(creator);
            return;
        }

        self.listings.write().insert(creator, wager.clone());
        self.spawn_save(wager.to_stored());
    }

    pub fn get(&self, creator: Uuid) -> Option<Arc<Wager>> {
        self.listings.read().get(&creator).cloned()
    }

    pub fn contains(&self, creator: Uuid) -> bool {
        self.listings.read().contains_key(&creator)
    }

    /// Point-in-time snapshot. Entries can be taken concurrently by
    /// accepting participants, so callers must not assume the returned
    /// wagers are still registered.
    pub fn all(&self) -> Vec<Arc<Wager>> {
        self.listings.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.listings.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listings.read().is_empty()
    }

    fn spawn_save(&self, listing: StoredListing) {
        let storage = self.storage.clone();
        tokio::spawn(async move {
            let store = ListingStore::new(&storage);
            for attempt in 1..=SAVE_ATTEMPTS {
                match store.save_listing(&listing).await {
                    Ok(()) => return,
                    Err(e) if attempt < SAVE_ATTEMPTS => {
                        tracing::warn!(
                            "Listing save for {} failed (attempt {}): {}",
                            listing.account_id,
                            attempt,
                            e
                        );
                        tokio::time::sleep(SAVE_RETRY_DELAY).await;
                    }
                    Err(e) => {
                        tracing::error!(
                            "Giving up persisting listing for {}: {}",
                            listing.account_id,
                            e
                        );
                    }
                }
            }
        });
    }

    fn spawn_delete(&self, creator: Uuid) {
        let storage = self.storage.clone();
        tokio::spawn(async move {
            let store = ListingStore::new(&storage);
            if let Err(e) = store.delete_listing(creator).await {
                tracing::error!("Listing delete for {} failed: {}", creator, e);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coinduel_core::ListingStore;

    async fn registry() -> ListingRegistry {
        let storage = Arc::new(Storage::in_memory().await.unwrap());
        ListingRegistry::new(storage)
    }

    /// Wait for the fire-and-forget store write to land.
    async fn wait_for_row(storage: &Storage, creator: Uuid, expected: bool) {
        let store = ListingStore::new(storage);
        for _ in 0..50 {
            let present = store.load_listing(creator).await.unwrap().is_some();
            if present == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("store row for {} never reached presence={}", creator, expected);
    }

    #[tokio::test]
    async fn duplicate_listing_rejected() {
        let registry = registry().await;
        let creator = Uuid::new_v4();

        registry
            .add(Arc::new(Wager::new(creator, "GOLD", 100)))
            .unwrap();

        let err = registry
            .add(Arc::new(Wager::new(creator, "GOLD", 200)))
            .unwrap_err();
        assert!(matches!(err, EngineError::DuplicateListing(id) if id == creator));
        assert_eq!(registry.len(), 1);
        // the original entry survives
        assert_eq!(registry.get(creator).unwrap().amount(), 100);
    }

    #[tokio::test]
    async fn take_is_exclusive() {
        let registry = registry().await;
        let creator = Uuid::new_v4();
        registry
            .add(Arc::new(Wager::new(creator, "GOLD", 100)))
            .unwrap();

        assert!(registry.take(creator).is_some());
        assert!(registry.take(creator).is_none());
        assert!(registry.get(creator).is_none());
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let registry = registry().await;
        let creator = Uuid::new_v4();
        registry
            .add(Arc::new(Wager::new(creator, "GOLD", 100)))
            .unwrap();

        assert!(registry.remove(creator));
        assert!(!registry.remove(creator));
    }

    #[tokio::test]
    async fn add_persists_and_remove_deletes() {
        let storage = Arc::new(Storage::in_memory().await.unwrap());
        let registry = ListingRegistry::new(storage.clone());
        let creator = Uuid::new_v4();

        registry
            .add(Arc::new(Wager::new(creator, "GOLD", 100)))
            .unwrap();
        wait_for_row(&storage, creator, true).await;

        registry.remove(creator);
        wait_for_row(&storage, creator, false).await;
    }

    #[tokio::test]
    async fn put_back_reinstates_a_listed_wager() {
        let registry = registry().await;
        let creator = Uuid::new_v4();
        registry
            .add(Arc::new(Wager::new(creator, "GOLD", 100)))
            .unwrap();

        let taken = registry.take(creator).unwrap();
        registry.put_back(taken);
        assert!(registry.contains(creator));
    }

    #[tokio::test]
    async fn put_back_drops_a_terminal_wager() {
        let storage = Arc::new(Storage::in_memory().await.unwrap());
        let registry = ListingRegistry::new(storage.clone());
        let creator = Uuid::new_v4();
        registry
            .add(Arc::new(Wager::new(creator, "GOLD", 100)))
            .unwrap();

        let taken = registry.take(creator).unwrap();
        assert!(taken.try_cancel());
        registry.put_back(taken);

        assert!(!registry.contains(creator));
        wait_for_row(&storage, creator, false).await;
    }

    #[tokio::test]
    async fn remove_cleans_orphaned_store_row() {
        let storage = Arc::new(Storage::in_memory().await.unwrap());

        // Simulate a row left behind by a crash: present in the store,
        // absent from memory.
        let orphan = Wager::new(Uuid::new_v4(), "GOLD", 300);
        ListingStore::new(&storage)
            .save_listing(&orphan.to_stored())
            .await
            .unwrap();

        let registry = ListingRegistry::new(storage.clone());
        assert!(!registry.remove(orphan.creator()));
        wait_for_row(&storage, orphan.creator(), false).await;
    }
}
