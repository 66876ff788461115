//! coinduel-core - Foundation for the coinduel wager engine
//!
//! This crate provides the pieces the engine is built on: the SQLite
//! durable store (open listings + account statistics), the pluggable
//! ledger-provider boundary, the notification sink boundary, and the
//! engine configuration.

pub mod config;
pub mod error;
pub mod ledger;
pub mod notify;
pub mod storage;
pub mod types;

pub use config::EngineConfig;
pub use error::{CoreError, Result};
pub use ledger::{LedgerProvider, LedgerRegistry, MemoryLedger};
pub use notify::{MessageKey, NotificationSink, NullSink, TracingSink};
pub use storage::{ListingStore, StatsStore, Storage, StoredListing};
pub use types::AccountStats;
