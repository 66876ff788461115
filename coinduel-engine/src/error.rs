use thiserror::Error;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Core error: {0}")]
    Core(#[from] coinduel_core::CoreError),

    #[error("Account {0} already has an open listing")]
    DuplicateListing(Uuid),

    #[error("No open listing for account {0}")]
    ListingNotFound(Uuid),

    #[error("Cannot accept your own listing")]
    SelfAcceptance,

    #[error("Insufficient funds: need {need}, have {available}")]
    InsufficientFunds { need: u64, available: u64 },

    #[error("Amount {amount} outside allowed range {min}..={max}")]
    AmountOutOfRange { amount: u64, min: u64, max: u64 },

    #[error("Currency provider not registered: {0}")]
    CurrencyProviderMissing(String),

    #[error("Durable store unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Invalid wager state: {0}")]
    InvalidState(String),
}

impl EngineError {
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }
}
