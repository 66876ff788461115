//! coinduel-engine - PvP wager lifecycle and settlement
//!
//! One participant stakes currency into a listing, another accepts it, and
//! a seeded random draw settles the pair: winner takes the pot minus an
//! optional tax. The engine guarantees that every escrowed unit is paid
//! out or refunded exactly once, under concurrent acceptance, disconnects
//! and process shutdown, with crash recovery of persisted listings.

pub mod deadline;
pub mod engine;
pub mod error;
pub mod pairing;
pub mod reconcile;
pub mod registry;
pub mod settlement;
pub mod wager;

pub use engine::WagerEngine;
pub use error::{EngineError, Result};
pub use pairing::PairingCache;
pub use reconcile::Reconciler;
pub use registry::ListingRegistry;
pub use settlement::{Payout, SettlementOutcome};
pub use wager::{Wager, WagerInfo, WagerState};
