use crate::deadline::{ledger_call, CALL_TIMEOUT};
use crate::error::{EngineError, Result};
use crate::pairing::PairingCache;
use crate::registry::ListingRegistry;
use crate::wager::Wager;
use coinduel_core::{
    LedgerRegistry, ListingStore, MessageKey, NotificationSink, Storage,
};
use std::sync::Arc;
use uuid::Uuid;

/// Recovery and cancellation: guarantees that every escrowed stake is
/// returned exactly once when a session drops, the process shuts down, or
/// a persisted listing is found after a crash.
pub struct Reconciler {
    ledgers: Arc<LedgerRegistry>,
    listings: Arc<ListingRegistry>,
    pairings: Arc<PairingCache>,
    storage: Arc<Storage>,
    sink: Arc<dyn NotificationSink>,
}

impl Reconciler {
    pub fn new(
        ledgers: Arc<LedgerRegistry>,
        listings: Arc<ListingRegistry>,
        pairings: Arc<PairingCache>,
        storage: Arc<Storage>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            ledgers,
            listings,
            pairings,
            storage,
            sink,
        }
    }

    /// Unwind an active pairing: refund BOTH participants their original
    /// stake (not the pot), then drop every piece of bookkeeping. The
    /// `try_cancel` gate makes this race-safe against a concurrent
    /// settlement: whichever side flips the state first wins, the other
    /// becomes a no-op.
    pub async fn reconcile_active(&self, wager: &Arc<Wager>) -> bool {
        if !wager.try_cancel() {
            return false;
        }

        let participants = self.pairings.participants_of(wager);
        self.pairings.unregister(wager);

        let amount = wager.amount();
        let provider_key = wager.provider();

        match self.ledgers.get(&provider_key) {
            Some(provider) => {
                for account in &participants {
                    if let Err(e) =
                        ledger_call("deposit", provider.deposit(*account, amount)).await
                    {
                        tracing::error!(
                            "Refund of {} to {} failed during reconciliation: {}",
                            amount,
                            account,
                            e
                        );
                        continue;
                    }
                    self.notify_refund(*account, amount, &provider_key);
                }
            }
            None => {
                // The stake stays withdrawn: a data anomaly for operators,
                // but bookkeeping removal must not block on it.
                tracing::error!(
                    "Currency provider '{}' missing while refunding wager of {}; stakes unrecoverable",
                    provider_key,
                    wager.creator()
                );
            }
        }

        self.listings.remove(wager.creator());
        true
    }

    /// Unwind an unpaired listing: refund the creator only.
    pub async fn reconcile_listing(&self, wager: &Arc<Wager>) -> bool {
        if !wager.try_cancel() {
            return false;
        }

        let creator = wager.creator();
        let amount = wager.amount();
        let provider_key = wager.provider();

        match self.ledgers.get(&provider_key) {
            Some(provider) => match ledger_call("deposit", provider.deposit(creator, amount)).await
            {
                Ok(()) => self.sink.notify(
                    creator,
                    MessageKey::ListingCancelled,
                    &[
                        ("AMOUNT", amount.to_string()),
                        ("PROVIDER", provider_key.clone()),
                    ],
                ),
                Err(e) => {
                    tracing::error!("Refund of {} to {} failed: {}", amount, creator, e);
                }
            },
            None => {
                tracing::error!(
                    "Currency provider '{}' missing while refunding listing of {}",
                    provider_key,
                    creator
                );
            }
        }

        self.listings.remove(creator);
        true
    }

    /// A participant's session ended. An active pairing takes precedence
    /// over a bare listing: the same creator identity must never be
    /// processed down both paths.
    pub async fn on_session_end(&self, account: Uuid) {
        if let Some(wager) = self.pairings.get_by_participant(account) {
            tracing::info!(
                "Session end for {} cancels active wager of {}",
                account,
                wager.creator()
            );
            self.reconcile_active(&wager).await;
            return;
        }

        if let Some(wager) = self.listings.get(account) {
            tracing::info!("Session end for {} cancels open listing", account);
            self.reconcile_listing(&wager).await;
        }
    }

    /// Whole-process shutdown. Active pairings are reconciled before
    /// remaining listings so a creator whose wager is mid-settlement can
    /// never be refunded twice through a stale-looking listing entry.
    pub async fn on_shutdown(&self) {
        let active = self.pairings.all_unique();
        tracing::info!(
            "Shutdown reconciliation: {} active pairing(s), {} listing(s)",
            active.len(),
            self.listings.len()
        );

        for wager in active {
            self.reconcile_active(&wager).await;
        }
        self.pairings.clear();

        for wager in self.listings.all() {
            if wager.is_active() {
                continue;
            }
            self.reconcile_listing(&wager).await;
        }
    }

    /// Crash recovery, run when an account's session starts: a persisted
    /// listing with no in-memory counterpart means the previous process
    /// died holding this stake. Deposit it back and delete the row; a
    /// recovered stake is neither a win nor a loss, so statistics stay
    /// untouched. Returns whether a stake was recovered.
    pub async fn recover_listing(&self, account: Uuid) -> Result<bool> {
        // A live in-memory listing means this row is current, not orphaned.
        if self.listings.contains(account) {
            return Ok(false);
        }

        let store = ListingStore::new(&self.storage);
        let loaded = tokio::time::timeout(CALL_TIMEOUT, store.load_listing(account))
            .await
            .map_err(|_| EngineError::StorageUnavailable("listing load timed out".to_string()))?;
        let Some(row) = loaded? else {
            return Ok(false);
        };

        match self.ledgers.get(&row.provider) {
            Some(provider) => match ledger_call("deposit", provider.deposit(account, row.amount))
                .await
            {
                Ok(()) => {
                    tracing::info!(
                        "Recovered stake of {} for {} from persisted listing",
                        row.amount,
                        account
                    );
                    self.notify_refund(account, row.amount, &row.provider);
                }
                Err(e) => {
                    tracing::error!("Recovery deposit of {} to {} failed: {}", row.amount, account, e);
                }
            },
            None => {
                tracing::error!(
                    "Currency provider '{}' missing while recovering stake of {}",
                    row.provider,
                    account
                );
            }
        }

        tokio::time::timeout(CALL_TIMEOUT, store.delete_listing(account))
            .await
            .map_err(|_| EngineError::StorageUnavailable("listing delete timed out".to_string()))??;
        Ok(true)
    }

    fn notify_refund(&self, account: Uuid, amount: u64, provider: &str) {
        self.sink.notify(
            account,
            MessageKey::GameRefunded,
            &[
                ("AMOUNT", amount.to_string()),
                ("PROVIDER", provider.to_string()),
            ],
        );
    }
}
