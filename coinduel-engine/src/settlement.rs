use coinduel_core::EngineConfig;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Derive the draw seed for one pairing: both participant identities plus
/// a nanosecond timestamp, hashed. Not predictable ahead of acceptance,
/// but reproducible for audit when the seed is logged.
pub fn derive_seed(creator: Uuid, opponent: Uuid, nanos: i64) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(creator.as_bytes());
    hasher.update(opponent.as_bytes());
    hasher.update(nanos.to_le_bytes());
    hasher.finalize().into()
}

/// Single fair coin draw between the two participants.
pub fn pick_winner(seed: [u8; 32], creator: Uuid, opponent: Uuid) -> Uuid {
    let mut rng = StdRng::from_seed(seed);
    if rng.gen_bool(0.5) {
        creator
    } else {
        opponent
    }
}

/// Pot arithmetic for one settlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Payout {
    pub total_pot: u64,
    pub tax: u64,
    pub payout: u64,
}

impl Payout {
    /// Tax truncates toward zero on the total pot, matching the stored
    /// behavior the statistics were accumulated under.
    pub fn compute(stake: u64, config: &EngineConfig) -> Self {
        let total_pot = stake * 2;
        let tax = if config.tax_enabled {
            ((config.tax_rate * total_pot as f64) / 100.0).floor() as u64
        } else {
            0
        };

        Self {
            total_pot,
            tax,
            payout: total_pot - tax,
        }
    }
}

/// Result of a completed settlement, reported to the host.
#[derive(Debug, Clone, Serialize)]
pub struct SettlementOutcome {
    pub winner: Uuid,
    pub loser: Uuid,
    pub stake: u64,
    pub total_pot: u64,
    pub tax: u64,
    pub payout: u64,
}
