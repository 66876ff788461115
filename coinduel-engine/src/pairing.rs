use crate::wager::Wager;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Secondary index mapping either participant of an active pairing to the
/// shared wager. Purely derived state: the wager's own participant fields
/// are authoritative, the cache only buys O(1) lookup from either side for
/// disconnect handling.
pub struct PairingCache {
    active: RwLock<HashMap<Uuid, Arc<Wager>>>,
}

impl PairingCache {
    pub fn new() -> Self {
        Self {
            active: RwLock::new(HashMap::new()),
        }
    }

    /// Insert the wager under both participant identities. A missing
    /// opponent is skipped, not an error.
    pub fn register(&self, wager: &Arc<Wager>) {
        let mut active = self.active.write();
        active.insert(wager.creator(), wager.clone());
        if let Some(opponent) = wager.opponent() {
            active.insert(opponent, wager.clone());
        }
    }

    /// Remove every identity entry pointing at *this exact* wager
    /// instance. Pointer comparison, so two wagers with identical fields
    /// are never confused. Calling twice is a no-op.
    pub fn unregister(&self, wager: &Arc<Wager>) {
        self.active
            .write()
            .retain(|_, entry| !Arc::ptr_eq(entry, wager));
    }

    /// Identities participating in this wager. The wager's explicit fields
    /// take precedence; the reverse cache scan only covers a wager whose
    /// fields were never populated.
    pub fn participants_of(&self, wager: &Arc<Wager>) -> Vec<Uuid> {
        let from_fields = wager.participants();
        if from_fields.len() == 2 {
            return from_fields;
        }

        let active = self.active.read();
        let mut ids: Vec<Uuid> = active
            .iter()
            .filter(|(_, entry)| Arc::ptr_eq(entry, wager))
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids.dedup();

        if ids.is_empty() {
            from_fields
        } else {
            ids
        }
    }

    pub fn get_by_participant(&self, id: Uuid) -> Option<Arc<Wager>> {
        self.active.read().get(&id).cloned()
    }

    pub fn is_paired(&self, id: Uuid) -> bool {
        self.active.read().contains_key(&id)
    }

    /// Deduplicated snapshot of every wager currently paired. Safe to
    /// iterate while pairings form and dissolve concurrently.
    pub fn all_unique(&self) -> Vec<Arc<Wager>> {
        let active = self.active.read();
        let mut unique: Vec<Arc<Wager>> = Vec::new();
        for wager in active.values() {
            if !unique.iter().any(|w| Arc::ptr_eq(w, wager)) {
                unique.push(wager.clone());
            }
        }
        unique
    }

    pub fn clear(&self) {
        self.active.write().clear();
    }

    pub fn len(&self) -> usize {
        self.active.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.read().is_empty()
    }
}

impl Default for PairingCache {
    fn default() -> Self {
        Self::new()
    }
}
