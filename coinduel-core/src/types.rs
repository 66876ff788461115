use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Per-account aggregate of settled wager results.
///
/// Only the settlement procedure mutates these counters. A refunded or
/// recovered stake counts as neither a win nor a loss.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountStats {
    pub account_id: Uuid,
    pub wins: u64,
    pub losses: u64,
    pub profit: i64,
    pub total_losses: u64,
    pub total_gambled: u64,
    pub display_broadcasts: bool,
}

impl AccountStats {
    pub fn new(account_id: Uuid) -> Self {
        Self {
            account_id,
            wins: 0,
            losses: 0,
            profit: 0,
            total_losses: 0,
            total_gambled: 0,
            display_broadcasts: true,
        }
    }

    /// Record a won wager: `payout` is the post-tax amount deposited,
    /// `stake` the pre-tax per-participant stake.
    pub fn record_win(&mut self, payout: u64, stake: u64) {
        self.wins += 1;
        self.profit += payout as i64;
        self.total_gambled += stake;
    }

    /// Record a lost wager of `stake`.
    pub fn record_loss(&mut self, stake: u64) {
        self.losses += 1;
        self.total_losses += stake;
        self.total_gambled += stake;
    }

    pub fn games_played(&self) -> u64 {
        self.wins + self.losses
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_stats_are_zeroed() {
        let stats = AccountStats::new(Uuid::new_v4());
        assert_eq!(stats.wins, 0);
        assert_eq!(stats.losses, 0);
        assert_eq!(stats.profit, 0);
        assert_eq!(stats.games_played(), 0);
        assert!(stats.display_broadcasts);
    }

    #[test]
    fn win_and_loss_accumulate() {
        let mut stats = AccountStats::new(Uuid::new_v4());
        stats.record_win(190, 100);
        stats.record_loss(100);

        assert_eq!(stats.wins, 1);
        assert_eq!(stats.losses, 1);
        assert_eq!(stats.profit, 190);
        assert_eq!(stats.total_losses, 100);
        assert_eq!(stats.total_gambled, 200);
        assert_eq!(stats.games_played(), 2);
    }
}
