use crate::deadline::ledger_call;
use crate::error::{EngineError, Result};
use crate::pairing::PairingCache;
use crate::reconcile::Reconciler;
use crate::registry::ListingRegistry;
use crate::settlement::{derive_seed, pick_winner, Payout, SettlementOutcome};
use crate::wager::{Wager, WagerState};
use chrono::Utc;
use coinduel_core::{
    AccountStats, CoreError, EngineConfig, LedgerRegistry, MessageKey, NotificationSink,
    StatsStore, Storage,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// The wager lifecycle and settlement engine.
///
/// Constructed once with its collaborators and cloned (cheaply, all fields
/// are shared handles) wherever the host needs it; there is no ambient
/// global instance.
#[derive(Clone)]
pub struct WagerEngine {
    config: Arc<EngineConfig>,
    ledgers: Arc<LedgerRegistry>,
    storage: Arc<Storage>,
    listings: Arc<ListingRegistry>,
    pairings: Arc<PairingCache>,
    sink: Arc<dyn NotificationSink>,
    reconciler: Arc<Reconciler>,
    shutting_down: Arc<AtomicBool>,
}

impl WagerEngine {
    pub fn new(
        config: EngineConfig,
        ledgers: Arc<LedgerRegistry>,
        storage: Arc<Storage>,
        sink: Arc<dyn NotificationSink>,
    ) -> Result<Self> {
        config.validate()?;

        let listings = Arc::new(ListingRegistry::new(storage.clone()));
        let pairings = Arc::new(PairingCache::new());
        let reconciler = Arc::new(Reconciler::new(
            ledgers.clone(),
            listings.clone(),
            pairings.clone(),
            storage.clone(),
            sink.clone(),
        ));

        Ok(Self {
            config: Arc::new(config),
            ledgers,
            storage,
            listings,
            pairings,
            sink,
            reconciler,
            shutting_down: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn ledgers(&self) -> &LedgerRegistry {
        &self.ledgers
    }

    /// Escrow the creator's stake and open a listing. The withdraw happens
    /// strictly before the wager is registered or persisted: the store is
    /// never asked to record a listing whose funds are not already held.
    pub async fn create_listing(
        &self,
        creator: Uuid,
        provider_key: &str,
        amount: u64,
    ) -> Result<Arc<Wager>> {
        self.ensure_accepting()?;

        if amount < self.config.minimum_bet || amount > self.config.maximum_bet {
            return Err(EngineError::AmountOutOfRange {
                amount,
                min: self.config.minimum_bet,
                max: self.config.maximum_bet,
            });
        }

        let provider = self
            .ledgers
            .get(provider_key)
            .ok_or_else(|| EngineError::CurrencyProviderMissing(provider_key.to_string()))?;

        if self.listings.contains(creator) {
            return Err(EngineError::DuplicateListing(creator));
        }

        let available = ledger_call("balance", provider.balance(creator)).await?;
        if available < amount {
            return Err(EngineError::InsufficientFunds {
                need: amount,
                available,
            });
        }

        ledger_call("withdraw", provider.withdraw(creator, amount))
            .await
            .map_err(map_funds)?;

        let wager = Arc::new(Wager::new(creator, provider_key.to_uppercase(), amount));
        if let Err(e) = self.listings.add(wager.clone()) {
            // Lost a duplicate race after the withdraw; undo the escrow.
            if let Err(refund_err) = ledger_call("deposit", provider.deposit(creator, amount)).await
            {
                tracing::error!(
                    "Refund after duplicate-listing race failed for {}: {}",
                    creator,
                    refund_err
                );
            }
            return Err(e);
        }

        tracing::info!(
            "Listing created by {} for {} {}",
            creator,
            amount,
            provider.display_name()
        );
        self.sink.notify(
            creator,
            MessageKey::ListingCreated,
            &[
                ("AMOUNT", amount.to_string()),
                ("CURRENCY", provider.display_name().to_string()),
            ],
        );

        Ok(wager)
    }

    /// Pair an accepter with an open listing. Atomically removing the
    /// listing from the registry is the mutual-exclusion point: of two
    /// racing accepters, only the one whose `take` succeeds proceeds.
    pub async fn accept_listing(&self, creator: Uuid, accepter: Uuid) -> Result<Arc<Wager>> {
        self.ensure_accepting()?;

        if creator == accepter {
            return Err(EngineError::SelfAcceptance);
        }

        let listed = self
            .listings
            .get(creator)
            .ok_or(EngineError::ListingNotFound(creator))?;

        let provider_key = listed.provider();
        let provider = self
            .ledgers
            .get(&provider_key)
            .ok_or(EngineError::CurrencyProviderMissing(provider_key.clone()))?;

        let amount = listed.amount();
        let available = ledger_call("balance", provider.balance(accepter)).await?;
        if available < amount {
            return Err(EngineError::InsufficientFunds {
                need: amount,
                available,
            });
        }

        // Race gate: first taker wins, everyone else sees ListingNotFound.
        let wager = self
            .listings
            .take(creator)
            .ok_or(EngineError::ListingNotFound(creator))?;

        if let Err(e) = ledger_call("withdraw", provider.withdraw(accepter, amount)).await {
            self.listings.put_back(wager);
            return Err(map_funds(e));
        }

        if let Err(e) = wager.activate(accepter) {
            // The listing was cancelled between the lookup and the take
            // (creator refunded by the reconciler). Undo the accepter's
            // escrow and report the listing gone.
            tracing::warn!("Acceptance of {}'s listing lost to cancellation: {}", creator, e);
            if let Err(refund_err) =
                ledger_call("deposit", provider.deposit(accepter, amount)).await
            {
                tracing::error!("Escrow rollback to {} failed: {}", accepter, refund_err);
            }
            return Err(EngineError::ListingNotFound(creator));
        }

        self.pairings.register(&wager);
        tracing::info!("{} accepted {}'s listing of {} {}", accepter, creator, amount, provider_key);
        self.sink.notify(
            accepter,
            MessageKey::PlayerChallenge,
            &[("OPPONENT", creator.to_string())],
        );

        if self.config.auto_settle {
            let engine = self.clone();
            let wager_for_settlement = wager.clone();
            tokio::spawn(async move {
                if let Err(e) = engine.run_settlement(wager_for_settlement).await {
                    tracing::error!("Settlement task failed: {}", e);
                }
            });
        }

        Ok(wager)
    }

    /// Run the settlement procedure for a paired wager: one fair draw,
    /// then payout. The seed is logged so the outcome can be audited.
    ///
    /// Returns `None` when the wager was no longer active (a concurrent
    /// disconnect or duplicate invocation won the race); funds are
    /// deposited at most once either way.
    pub async fn run_settlement(&self, wager: Arc<Wager>) -> Result<Option<SettlementOutcome>> {
        let creator = wager.creator();
        let opponent = wager
            .opponent()
            .ok_or_else(|| EngineError::invalid_state("cannot settle an unpaired wager"))?;

        let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let seed = derive_seed(creator, opponent, nanos);
        tracing::info!(
            "Settlement draw for {} vs {} (seed {})",
            creator,
            opponent,
            hex::encode(seed)
        );

        let winner = pick_winner(seed, creator, opponent);
        self.settle_with(wager, winner).await
    }

    /// Settlement with a predetermined winner. The `try_settle` flip is
    /// the single exactly-once gate in front of the payout deposit.
    pub(crate) async fn settle_with(
        &self,
        wager: Arc<Wager>,
        winner: Uuid,
    ) -> Result<Option<SettlementOutcome>> {
        let creator = wager.creator();
        let opponent = wager
            .opponent()
            .ok_or_else(|| EngineError::invalid_state("cannot settle an unpaired wager"))?;
        let loser = if winner == creator { opponent } else { creator };

        let stake = wager.amount();
        let provider_key = wager.provider();

        let Some(provider) = self.ledgers.get(&provider_key) else {
            // Never drop the pot: degrade to the cancellation path.
            tracing::error!(
                "Currency provider '{}' missing at settlement; refunding both stakes",
                provider_key
            );
            self.reconciler.reconcile_active(&wager).await;
            return Ok(None);
        };

        if !wager.try_settle() {
            tracing::debug!("Settlement of {}'s wager suppressed: no longer active", creator);
            return Ok(None);
        }

        let payout = Payout::compute(stake, &self.config);
        if let Err(e) = ledger_call("deposit", provider.deposit(winner, payout.payout)).await {
            tracing::error!(
                "Payout deposit of {} to {} failed: {}; refunding both stakes",
                payout.payout,
                winner,
                e
            );
            self.refund_after_failed_payout(&wager, stake, provider.as_ref())
                .await;
            return Ok(None);
        }

        self.record_stats(winner, loser, payout.payout, stake).await;

        self.listings.remove(creator);
        self.pairings.unregister(&wager);

        let outcome = SettlementOutcome {
            winner,
            loser,
            stake,
            total_pot: payout.total_pot,
            tax: payout.tax,
            payout: payout.payout,
        };
        self.announce(&outcome, provider.display_name());

        tracing::info!(
            "Wager settled: {} beat {} for {} {} (tax {})",
            winner,
            loser,
            payout.payout,
            provider_key,
            payout.tax
        );

        Ok(Some(outcome))
    }

    /// Cancel an open listing and refund the creator. Idempotent: a second
    /// call (or a call racing a reconciler) returns false and moves no
    /// funds.
    pub async fn cancel_listing(&self, creator: Uuid) -> Result<bool> {
        let Some(wager) = self.listings.get(creator) else {
            return Ok(false);
        };

        if wager.state() != WagerState::Listed {
            return Err(EngineError::invalid_state(
                "cannot cancel a wager that is already paired",
            ));
        }

        Ok(self.reconciler.reconcile_listing(&wager).await)
    }

    /// Session-start hook: recover a stake persisted by a crashed process.
    pub async fn on_session_start(&self, account: Uuid) -> Result<bool> {
        self.reconciler.recover_listing(account).await
    }

    /// Session-end hook: unwind whatever wager the account is part of.
    pub async fn on_session_end(&self, account: Uuid) {
        self.reconciler.on_session_end(account).await;
    }

    /// Process shutdown: close acceptance first, then reconcile every
    /// active pairing and every remaining listing.
    pub async fn on_shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        self.reconciler.on_shutdown().await;
    }

    /// Open (unpaired) listings, as a point-in-time snapshot.
    pub fn open_listings(&self) -> Vec<Arc<Wager>> {
        self.listings
            .all()
            .into_iter()
            .filter(|w| w.state() == WagerState::Listed)
            .collect()
    }

    pub fn is_in_active_game(&self, account: Uuid) -> bool {
        self.pairings.is_paired(account)
    }

    pub async fn stats(&self, account: Uuid) -> Result<AccountStats> {
        Ok(StatsStore::new(&self.storage).load_stats(account).await?)
    }

    fn ensure_accepting(&self) -> Result<()> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(EngineError::invalid_state("engine is shutting down"));
        }
        Ok(())
    }

    /// Statistics are best-effort after the payout deposit: a store error
    /// here is logged, never allowed to unwind a completed transfer.
    async fn record_stats(&self, winner: Uuid, loser: Uuid, payout: u64, stake: u64) {
        let store = StatsStore::new(&self.storage);

        match store.load_stats(winner).await {
            Ok(mut stats) => {
                stats.record_win(payout, stake);
                if let Err(e) = store.save_stats(&stats).await {
                    tracing::error!("Saving winner stats for {} failed: {}", winner, e);
                }
            }
            Err(e) => tracing::error!("Loading winner stats for {} failed: {}", winner, e),
        }

        match store.load_stats(loser).await {
            Ok(mut stats) => {
                stats.record_loss(stake);
                if let Err(e) = store.save_stats(&stats).await {
                    tracing::error!("Saving loser stats for {} failed: {}", loser, e);
                }
            }
            Err(e) => tracing::error!("Loading loser stats for {} failed: {}", loser, e),
        }
    }

    /// Deposit failed after the state flipped to settled: fall back to
    /// refunding both original stakes. No statistics are recorded.
    async fn refund_after_failed_payout(
        &self,
        wager: &Arc<Wager>,
        stake: u64,
        provider: &dyn coinduel_core::LedgerProvider,
    ) {
        for account in self.pairings.participants_of(wager) {
            match ledger_call("deposit", provider.deposit(account, stake)).await {
                Ok(()) => self.sink.notify(
                    account,
                    MessageKey::GameRefunded,
                    &[
                        ("AMOUNT", stake.to_string()),
                        ("PROVIDER", wager.provider()),
                    ],
                ),
                Err(e) => {
                    tracing::error!("Fallback refund of {} to {} failed: {}", stake, account, e);
                }
            }
        }

        self.listings.remove(wager.creator());
        self.pairings.unregister(wager);
    }

    fn announce(&self, outcome: &SettlementOutcome, currency: &str) {
        let substitutions = [
            ("WINNER", outcome.winner.to_string()),
            ("LOSER", outcome.loser.to_string()),
            ("WINNINGS", outcome.payout.to_string()),
            ("TAX_RATE", self.config.tax_rate.to_string()),
            ("TAX_DEDUCTION", outcome.tax.to_string()),
            ("CURRENCY", currency.to_string()),
        ];

        self.sink
            .notify(outcome.winner, MessageKey::GameSummaryWin, &substitutions);
        self.sink
            .notify(outcome.loser, MessageKey::GameSummaryLoss, &substitutions);

        if outcome.payout >= self.config.minimum_broadcast_winnings {
            self.sink
                .broadcast(MessageKey::WinBroadcast, &substitutions);
        }
    }
}

fn map_funds(e: CoreError) -> EngineError {
    match e {
        CoreError::InsufficientFunds { need, available } => {
            EngineError::InsufficientFunds { need, available }
        }
        other => EngineError::Core(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coinduel_core::{LedgerProvider, ListingStore, MemoryLedger, NullSink};
    use std::time::Duration;

    /// Ledger whose deposits wait on a gate held by the test, and whose
    /// withdrawals can be switched to fail, for pinning interleavings.
    struct GatedLedger {
        inner: MemoryLedger,
        deposit_gate: tokio::sync::Mutex<()>,
        fail_withdrawals: AtomicBool,
    }

    impl GatedLedger {
        fn new() -> Self {
            Self {
                inner: MemoryLedger::new("Gold"),
                deposit_gate: tokio::sync::Mutex::new(()),
                fail_withdrawals: AtomicBool::new(false),
            }
        }
    }

    #[async_trait::async_trait]
    impl LedgerProvider for GatedLedger {
        async fn balance(&self, account: Uuid) -> coinduel_core::Result<u64> {
            self.inner.balance(account).await
        }

        async fn withdraw(&self, account: Uuid, amount: u64) -> coinduel_core::Result<()> {
            if self.fail_withdrawals.load(Ordering::SeqCst) {
                return Err(CoreError::ledger("ledger offline"));
            }
            self.inner.withdraw(account, amount).await
        }

        async fn deposit(&self, account: Uuid, amount: u64) -> coinduel_core::Result<()> {
            let _open = self.deposit_gate.lock().await;
            self.inner.deposit(account, amount).await
        }

        fn display_name(&self) -> &str {
            self.inner.display_name()
        }
    }

    fn gated_engine(
        ledger: Arc<GatedLedger>,
        storage: Arc<Storage>,
    ) -> WagerEngine {
        let ledgers = Arc::new(LedgerRegistry::new());
        ledgers.register("GOLD", ledger);
        WagerEngine::new(
            EngineConfig {
                minimum_bet: 1,
                tax_enabled: false,
                auto_settle: false,
                ..Default::default()
            },
            ledgers,
            storage,
            Arc::new(NullSink),
        )
        .unwrap()
    }

    struct Duel {
        engine: WagerEngine,
        ledger: Arc<MemoryLedger>,
        a: Uuid,
        b: Uuid,
    }

    async fn duel_with_config(config: EngineConfig) -> Duel {
        let storage = Arc::new(Storage::in_memory().await.unwrap());
        let ledger = Arc::new(MemoryLedger::new("Gold"));
        let ledgers = Arc::new(LedgerRegistry::new());
        ledgers.register("GOLD", ledger.clone());

        let engine = WagerEngine::new(config, ledgers, storage, Arc::new(NullSink)).unwrap();

        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        ledger.credit(a, 1_000);
        ledger.credit(b, 1_000);

        Duel {
            engine,
            ledger,
            a,
            b,
        }
    }

    async fn duel() -> Duel {
        duel_with_config(EngineConfig {
            minimum_bet: 1,
            tax_enabled: false,
            auto_settle: false,
            ..Default::default()
        })
        .await
    }

    #[tokio::test]
    async fn forced_winner_settlement_scenario() {
        let duel = duel().await;

        let wager = duel.engine.create_listing(duel.a, "GOLD", 100).await.unwrap();
        assert_eq!(duel.ledger.balance(duel.a).await.unwrap(), 900);
        assert_eq!(duel.engine.open_listings().len(), 1);

        duel.engine.accept_listing(duel.a, duel.b).await.unwrap();
        assert_eq!(duel.ledger.balance(duel.b).await.unwrap(), 900);
        assert!(duel.engine.is_in_active_game(duel.a));
        assert!(duel.engine.is_in_active_game(duel.b));

        let outcome = duel
            .engine
            .settle_with(wager, duel.b)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome.winner, duel.b);
        assert_eq!(outcome.payout, 200);
        assert_eq!(outcome.tax, 0);

        assert_eq!(duel.ledger.balance(duel.b).await.unwrap(), 1_100);
        assert_eq!(duel.ledger.balance(duel.a).await.unwrap(), 900);

        let a_stats = duel.engine.stats(duel.a).await.unwrap();
        let b_stats = duel.engine.stats(duel.b).await.unwrap();
        assert_eq!(a_stats.losses, 1);
        assert_eq!(a_stats.wins, 0);
        assert_eq!(a_stats.total_losses, 100);
        assert_eq!(b_stats.wins, 1);
        assert_eq!(b_stats.profit, 200);

        assert!(duel.engine.open_listings().is_empty());
        assert!(!duel.engine.is_in_active_game(duel.a));
        assert!(!duel.engine.is_in_active_game(duel.b));
    }

    #[tokio::test]
    async fn disconnect_mid_settlement_refunds_both() {
        let duel = duel().await;

        let wager = duel.engine.create_listing(duel.a, "GOLD", 100).await.unwrap();
        duel.engine.accept_listing(duel.a, duel.b).await.unwrap();

        duel.engine.on_session_end(duel.b).await;

        assert_eq!(duel.ledger.balance(duel.a).await.unwrap(), 1_000);
        assert_eq!(duel.ledger.balance(duel.b).await.unwrap(), 1_000);
        assert!(!duel.engine.is_in_active_game(duel.a));
        assert!(!duel.engine.is_in_active_game(duel.b));

        let a_stats = duel.engine.stats(duel.a).await.unwrap();
        let b_stats = duel.engine.stats(duel.b).await.unwrap();
        assert_eq!(a_stats.games_played(), 0);
        assert_eq!(b_stats.games_played(), 0);

        // the superseded settlement must not move funds
        let late = duel.engine.settle_with(wager, duel.b).await.unwrap();
        assert!(late.is_none());
        assert_eq!(duel.ledger.balance(duel.b).await.unwrap(), 1_000);
    }

    #[tokio::test]
    async fn double_settlement_deposits_once() {
        let duel = duel().await;

        let wager = duel.engine.create_listing(duel.a, "GOLD", 100).await.unwrap();
        duel.engine.accept_listing(duel.a, duel.b).await.unwrap();

        let first = duel.engine.settle_with(wager.clone(), duel.b).await.unwrap();
        assert!(first.is_some());

        let second = duel.engine.settle_with(wager, duel.b).await.unwrap();
        assert!(second.is_none());
        assert_eq!(duel.ledger.balance(duel.b).await.unwrap(), 1_100);
    }

    #[tokio::test]
    async fn duplicate_listing_always_fails() {
        let duel = duel().await;

        duel.engine.create_listing(duel.a, "GOLD", 100).await.unwrap();
        let err = duel
            .engine
            .create_listing(duel.a, "GOLD", 200)
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::DuplicateListing(id) if id == duel.a));
        assert_eq!(duel.engine.open_listings().len(), 1);
        // only the first stake is escrowed
        assert_eq!(duel.ledger.balance(duel.a).await.unwrap(), 900);
    }

    #[tokio::test]
    async fn cancel_twice_refunds_once() {
        let duel = duel().await;
        duel.engine.create_listing(duel.a, "GOLD", 100).await.unwrap();

        assert!(duel.engine.cancel_listing(duel.a).await.unwrap());
        assert!(!duel.engine.cancel_listing(duel.a).await.unwrap());
        assert_eq!(duel.ledger.balance(duel.a).await.unwrap(), 1_000);
    }

    #[tokio::test]
    async fn validation_failures() {
        let duel = duel().await;

        assert!(matches!(
            duel.engine.create_listing(duel.a, "TOKENS", 100).await,
            Err(EngineError::CurrencyProviderMissing(_))
        ));
        assert!(matches!(
            duel.engine
                .create_listing(duel.a, "GOLD", 2_000_000_000)
                .await,
            Err(EngineError::AmountOutOfRange { .. })
        ));
        assert!(matches!(
            duel.engine.create_listing(duel.a, "GOLD", 5_000).await,
            Err(EngineError::InsufficientFunds { .. })
        ));

        duel.engine.create_listing(duel.a, "GOLD", 100).await.unwrap();
        assert!(matches!(
            duel.engine.accept_listing(duel.a, duel.a).await,
            Err(EngineError::SelfAcceptance)
        ));
        assert!(matches!(
            duel.engine.accept_listing(Uuid::new_v4(), duel.b).await,
            Err(EngineError::ListingNotFound(_))
        ));

        let broke = Uuid::new_v4();
        assert!(matches!(
            duel.engine.accept_listing(duel.a, broke).await,
            Err(EngineError::InsufficientFunds { .. })
        ));
        // the failed acceptance left the listing intact
        assert_eq!(duel.engine.open_listings().len(), 1);
    }

    #[tokio::test]
    async fn pairing_symmetry_holds() {
        let duel = duel().await;

        duel.engine.create_listing(duel.a, "GOLD", 100).await.unwrap();
        let wager = duel.engine.accept_listing(duel.a, duel.b).await.unwrap();

        assert!(duel.engine.is_in_active_game(duel.a));
        assert!(duel.engine.is_in_active_game(duel.b));

        duel.engine.settle_with(wager, duel.a).await.unwrap();
        assert!(!duel.engine.is_in_active_game(duel.a));
        assert!(!duel.engine.is_in_active_game(duel.b));
    }

    #[tokio::test]
    async fn supply_is_conserved_without_tax() {
        let duel = duel().await;

        // create -> cancel
        duel.engine.create_listing(duel.a, "GOLD", 300).await.unwrap();
        duel.engine.cancel_listing(duel.a).await.unwrap();

        // create -> accept -> settle
        let wager = duel.engine.create_listing(duel.a, "GOLD", 250).await.unwrap();
        duel.engine.accept_listing(duel.a, duel.b).await.unwrap();
        duel.engine.settle_with(wager, duel.a).await.unwrap();

        // create -> accept -> disconnect
        duel.engine.create_listing(duel.b, "GOLD", 100).await.unwrap();
        duel.engine.accept_listing(duel.b, duel.a).await.unwrap();
        duel.engine.on_session_end(duel.a).await;

        let total = duel.ledger.balance(duel.a).await.unwrap()
            + duel.ledger.balance(duel.b).await.unwrap();
        assert_eq!(total, 2_000);
    }

    #[tokio::test]
    async fn tax_comes_out_of_the_pot() {
        let duel = duel_with_config(EngineConfig {
            minimum_bet: 1,
            tax_enabled: true,
            tax_rate: 5.0,
            auto_settle: false,
            ..Default::default()
        })
        .await;

        let wager = duel.engine.create_listing(duel.a, "GOLD", 100).await.unwrap();
        duel.engine.accept_listing(duel.a, duel.b).await.unwrap();
        let outcome = duel
            .engine
            .settle_with(wager, duel.b)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(outcome.tax, 10);
        assert_eq!(outcome.payout, 190);
        assert_eq!(duel.ledger.balance(duel.b).await.unwrap(), 1_090);

        // gambled counts the pre-tax per-participant stake
        let b_stats = duel.engine.stats(duel.b).await.unwrap();
        assert_eq!(b_stats.total_gambled, 100);
        assert_eq!(b_stats.profit, 190);
    }

    #[tokio::test]
    async fn auto_settle_runs_to_completion() {
        let duel = duel_with_config(EngineConfig {
            minimum_bet: 1,
            tax_enabled: false,
            auto_settle: true,
            ..Default::default()
        })
        .await;

        duel.engine.create_listing(duel.a, "GOLD", 100).await.unwrap();
        duel.engine.accept_listing(duel.a, duel.b).await.unwrap();

        for _ in 0..100 {
            if !duel.engine.is_in_active_game(duel.a) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert!(!duel.engine.is_in_active_game(duel.a));
        let total = duel.ledger.balance(duel.a).await.unwrap()
            + duel.ledger.balance(duel.b).await.unwrap();
        assert_eq!(total, 2_000);
        // exactly one winner, one loser
        let a_stats = duel.engine.stats(duel.a).await.unwrap();
        let b_stats = duel.engine.stats(duel.b).await.unwrap();
        assert_eq!(a_stats.wins + b_stats.wins, 1);
        assert_eq!(a_stats.losses + b_stats.losses, 1);
    }

    #[tokio::test]
    async fn shutdown_refunds_everyone_and_blocks_new_listings() {
        let duel = duel().await;
        let c = Uuid::new_v4();
        duel.ledger.credit(c, 500);

        duel.engine.create_listing(duel.a, "GOLD", 100).await.unwrap();
        duel.engine.accept_listing(duel.a, duel.b).await.unwrap();
        duel.engine.create_listing(c, "GOLD", 200).await.unwrap();

        duel.engine.on_shutdown().await;

        assert_eq!(duel.ledger.balance(duel.a).await.unwrap(), 1_000);
        assert_eq!(duel.ledger.balance(duel.b).await.unwrap(), 1_000);
        assert_eq!(duel.ledger.balance(c).await.unwrap(), 500);

        assert!(matches!(
            duel.engine.create_listing(c, "GOLD", 100).await,
            Err(EngineError::InvalidState(_))
        ));
        assert!(matches!(
            duel.engine.accept_listing(duel.a, duel.b).await,
            Err(EngineError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn failed_acceptance_never_resurrects_a_cancelled_listing() {
        let storage = Arc::new(Storage::in_memory().await.unwrap());
        let ledger = Arc::new(GatedLedger::new());
        let engine = gated_engine(ledger.clone(), storage);

        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        ledger.inner.credit(a, 1_000);
        ledger.inner.credit(b, 1_000);

        engine.create_listing(a, "GOLD", 100).await.unwrap();

        // Hold the gate so the cancellation flips the state, then blocks
        // inside its refund deposit with the wager still registered.
        let gate = ledger.deposit_gate.lock().await;
        let cancel = tokio::spawn({
            let engine = engine.clone();
            async move { engine.cancel_listing(a).await }
        });
        for _ in 0..100 {
            if engine.listings.get(a).map(|w| w.state()) == Some(WagerState::Cancelled) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(
            engine.listings.get(a).unwrap().state(),
            WagerState::Cancelled
        );

        // An accepter takes the cancelled wager and its withdraw fails;
        // the listing must not come back.
        ledger.fail_withdrawals.store(true, Ordering::SeqCst);
        let err = engine.accept_listing(a, b).await.unwrap_err();
        assert!(matches!(err, EngineError::Core(_)));
        ledger.fail_withdrawals.store(false, Ordering::SeqCst);

        drop(gate);
        assert!(cancel.await.unwrap().unwrap());

        // exactly one refund landed and the creator is free to list again
        assert_eq!(ledger.inner.balance(a).await.unwrap(), 1_000);
        assert_eq!(ledger.inner.balance(b).await.unwrap(), 1_000);
        assert!(engine.open_listings().is_empty());
        engine.create_listing(a, "GOLD", 100).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn hung_refund_deposit_cannot_stall_cancellation() {
        let storage = Arc::new(Storage::in_memory().await.unwrap());
        let ledger = Arc::new(GatedLedger::new());
        let engine = gated_engine(ledger.clone(), storage);

        let a = Uuid::new_v4();
        ledger.inner.credit(a, 1_000);
        engine.create_listing(a, "GOLD", 100).await.unwrap();

        // The refund deposit hangs on the gate; the bounded ledger call
        // turns it into a failed refund instead of wedging the cancel.
        let _gate = ledger.deposit_gate.lock().await;
        assert!(engine.cancel_listing(a).await.unwrap());

        assert!(engine.open_listings().is_empty());
        // the stake stays with the hung provider, logged as an anomaly
        assert_eq!(ledger.inner.balance(a).await.unwrap(), 900);
    }

    #[tokio::test]
    async fn restart_recovers_persisted_listing() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("coinduel.db");

        let ledger = Arc::new(MemoryLedger::new("Gold"));
        let c = Uuid::new_v4();
        ledger.credit(c, 50);

        let config = EngineConfig {
            minimum_bet: 1,
            auto_settle: false,
            ..Default::default()
        };

        // First process: escrow a stake, wait for the fire-and-forget
        // store write to land, then drop everything (the "crash").
        {
            let storage = Arc::new(Storage::new(&db_path).await.unwrap());
            let ledgers = Arc::new(LedgerRegistry::new());
            ledgers.register("GOLD", ledger.clone());
            let engine = WagerEngine::new(
                config.clone(),
                ledgers,
                storage.clone(),
                Arc::new(NullSink),
            )
            .unwrap();

            engine.create_listing(c, "GOLD", 50).await.unwrap();
            assert_eq!(ledger.balance(c).await.unwrap(), 0);

            for _ in 0..100 {
                if ListingStore::new(&storage)
                    .load_listing(c)
                    .await
                    .unwrap()
                    .is_some()
                {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            assert!(ListingStore::new(&storage)
                .load_listing(c)
                .await
                .unwrap()
                .is_some());
        }

        // Restart: a fresh engine over the same database file.
        let storage = Arc::new(Storage::new(&db_path).await.unwrap());
        let ledgers = Arc::new(LedgerRegistry::new());
        ledgers.register("GOLD", ledger.clone());
        let restarted =
            WagerEngine::new(config, ledgers, storage.clone(), Arc::new(NullSink)).unwrap();

        assert!(restarted.on_session_start(c).await.unwrap());
        assert_eq!(ledger.balance(c).await.unwrap(), 50);
        assert!(ListingStore::new(&storage)
            .load_listing(c)
            .await
            .unwrap()
            .is_none());

        let stats = restarted.stats(c).await.unwrap();
        assert_eq!(stats.games_played(), 0);
    }
}
