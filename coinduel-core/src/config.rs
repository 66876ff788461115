use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};

/// Engine configuration, typically deserialized from the host's config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Smallest stake a listing may be created with.
    pub minimum_bet: u64,
    /// Largest stake a listing may be created with.
    pub maximum_bet: u64,
    /// Whether a house tax is deducted from the pot on settlement.
    pub tax_enabled: bool,
    /// Tax rate as a percentage of the total pot.
    pub tax_rate: f64,
    /// Payouts at or above this amount trigger a public broadcast.
    pub minimum_broadcast_winnings: u64,
    /// Run the settlement procedure automatically once a listing is
    /// accepted. Hosts that drive settlement themselves set this to false.
    pub auto_settle: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            minimum_bet: 100,
            maximum_bet: 1_000_000_000,
            tax_enabled: true,
            tax_rate: 5.0,
            minimum_broadcast_winnings: 10_000,
            auto_settle: true,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.minimum_bet > self.maximum_bet {
            return Err(CoreError::config(format!(
                "minimum_bet {} exceeds maximum_bet {}",
                self.minimum_bet, self.maximum_bet
            )));
        }

        // the pot doubles the stake, so the stake ceiling must leave room
        if self.maximum_bet > u64::MAX / 2 {
            return Err(CoreError::config(format!(
                "maximum_bet {} exceeds the largest settleable stake {}",
                self.maximum_bet,
                u64::MAX / 2
            )));
        }

        if !(0.0..=100.0).contains(&self.tax_rate) {
            return Err(CoreError::config(format!(
                "tax_rate {} must be between 0 and 100",
                self.tax_rate
            )));
        }

        Ok(())
    }
}
