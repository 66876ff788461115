use crate::error::{EngineError, Result};
use chrono::{DateTime, Utc};
use coinduel_core::StoredListing;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Lifecycle of a wager.
///
/// `Listed -> Active -> Settled | Cancelled`, plus `Listed -> Cancelled`.
/// Both terminal states are absorbing; a second completion attempt on a
/// terminal wager is a no-op, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WagerState {
    /// Funds escrowed, awaiting an opponent.
    Listed,
    /// Paired, both stakes escrowed, settlement in flight.
    Active,
    /// Winner paid.
    Settled,
    /// All escrowed funds returned.
    Cancelled,
}

#[derive(Debug)]
struct WagerInner {
    provider: String,
    amount: u64,
    opponent: Option<Uuid>,
    state: WagerState,
    display_tag: Option<String>,
}

/// A single listing/pairing. Shared as `Arc<Wager>`; identity comparison
/// between instances is pointer equality, never field equality.
///
/// The creator identity doubles as the wager's natural key: one creator has
/// at most one open wager at a time. The `amount` equals currency already
/// withdrawn from the creator and held in escrow until settlement or
/// cancellation.
#[derive(Debug)]
pub struct Wager {
    creator: Uuid,
    created_at: DateTime<Utc>,
    inner: Mutex<WagerInner>,
}

impl Wager {
    pub fn new(creator: Uuid, provider: impl Into<String>, amount: u64) -> Self {
        Self {
            creator,
            created_at: Utc::now(),
            inner: Mutex::new(WagerInner {
                provider: provider.into(),
                amount,
                opponent: None,
                state: WagerState::Listed,
                display_tag: None,
            }),
        }
    }

    pub fn from_stored(listing: &StoredListing) -> Self {
        Self {
            creator: listing.account_id,
            created_at: listing.created_at,
            inner: Mutex::new(WagerInner {
                provider: listing.provider.clone(),
                amount: listing.amount,
                opponent: None,
                state: WagerState::Listed,
                display_tag: None,
            }),
        }
    }

    pub fn to_stored(&self) -> StoredListing {
        let inner = self.inner.lock();
        StoredListing {
            account_id: self.creator,
            provider: inner.provider.clone(),
            amount: inner.amount,
            created_at: self.created_at,
        }
    }

    pub fn creator(&self) -> Uuid {
        self.creator
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn provider(&self) -> String {
        self.inner.lock().provider.clone()
    }

    pub fn amount(&self) -> u64 {
        self.inner.lock().amount
    }

    pub fn opponent(&self) -> Option<Uuid> {
        self.inner.lock().opponent
    }

    pub fn state(&self) -> WagerState {
        self.inner.lock().state
    }

    pub fn is_active(&self) -> bool {
        self.inner.lock().state == WagerState::Active
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.inner.lock().state,
            WagerState::Settled | WagerState::Cancelled
        )
    }

    /// Denormalized rendering hint (e.g. an avatar reference). Never read
    /// by settlement; safe to recompute or drop on recovery.
    pub fn display_tag(&self) -> Option<String> {
        self.inner.lock().display_tag.clone()
    }

    pub fn set_display_tag(&self, tag: impl Into<String>) {
        self.inner.lock().display_tag = Some(tag.into());
    }

    /// Stake is mutable only while the wager is still listed.
    pub fn set_amount(&self, amount: u64) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.state != WagerState::Listed {
            return Err(EngineError::invalid_state(
                "amount can only change while listed",
            ));
        }

        inner.amount = amount;
        Ok(())
    }

    pub fn set_provider(&self, provider: impl Into<String>) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.state != WagerState::Listed {
            return Err(EngineError::invalid_state(
                "provider can only change while listed",
            ));
        }

        inner.provider = provider.into();
        Ok(())
    }

    /// `Listed -> Active`: attach the opponent and begin settlement. The
    /// state flip and opponent attachment happen under one lock so a
    /// concurrent observer never sees an active wager without an opponent.
    pub fn activate(&self, opponent: Uuid) -> Result<()> {
        if opponent == self.creator {
            return Err(EngineError::SelfAcceptance);
        }

        let mut inner = self.inner.lock();
        if inner.state != WagerState::Listed {
            return Err(EngineError::invalid_state(format!(
                "cannot activate wager in state {:?}",
                inner.state
            )));
        }

        inner.opponent = Some(opponent);
        inner.state = WagerState::Active;
        Ok(())
    }

    /// `Active -> Settled`, atomically. Returns false when the wager is no
    /// longer active; the caller must then skip the payout. This is the
    /// exactly-once gate for the winner deposit.
    pub fn try_settle(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.state != WagerState::Active {
            return false;
        }

        inner.state = WagerState::Settled;
        true
    }

    /// `Listed | Active -> Cancelled`, atomically. Returns false when the
    /// wager is already terminal; the caller must then skip the refund.
    /// Cancelling an active wager also supersedes any in-flight settlement.
    pub fn try_cancel(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            WagerState::Listed | WagerState::Active => {
                inner.state = WagerState::Cancelled;
                true
            }
            WagerState::Settled | WagerState::Cancelled => false,
        }
    }

    /// Both participant identities, creator first. The wager's own fields
    /// are the source of truth; the pairing cache is only a derived index.
    pub fn participants(&self) -> Vec<Uuid> {
        let inner = self.inner.lock();
        let mut ids = vec![self.creator];
        if let Some(opponent) = inner.opponent {
            ids.push(opponent);
        }
        ids
    }

    pub fn snapshot(&self) -> WagerInfo {
        let inner = self.inner.lock();
        WagerInfo {
            creator: self.creator,
            provider: inner.provider.clone(),
            amount: inner.amount,
            opponent: inner.opponent,
            state: inner.state,
            created_at: self.created_at,
        }
    }
}

/// Point-in-time copy of a wager for display.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WagerInfo {
    pub creator: Uuid,
    pub provider: String,
    pub amount: u64,
    pub opponent: Option<Uuid>,
    pub state: WagerState,
    pub created_at: DateTime<Utc>,
}

/// Identity comparison for shared wagers.
pub fn same_wager(a: &Arc<Wager>, b: &Arc<Wager>) -> bool {
    Arc::ptr_eq(a, b)
}
