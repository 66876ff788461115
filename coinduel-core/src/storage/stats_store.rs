use crate::error::Result;
use crate::storage::Storage;
use crate::types::AccountStats;
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

pub struct StatsStore<'a> {
    storage: &'a Storage,
}

impl<'a> StatsStore<'a> {
    pub fn new(storage: &'a Storage) -> Self {
        Self { storage }
    }

    /// Load an account's statistics, defaulting to zeroed stats if the
    /// account has never settled a wager.
    pub async fn load_stats(&self, account_id: Uuid) -> Result<AccountStats> {
        let conn = self.storage.get_connection().await;

        let mut stmt = conn.prepare(
            "SELECT wins, losses, profit, total_losses, total_gambled, broadcasts
             FROM stats WHERE account_id = ?1",
        )?;

        let stats = stmt
            .query_row(params![account_id.to_string()], |row| {
                Ok(AccountStats {
                    account_id,
                    wins: row.get(0)?,
                    losses: row.get(1)?,
                    profit: row.get(2)?,
                    total_losses: row.get(3)?,
                    total_gambled: row.get(4)?,
                    display_broadcasts: row.get(5)?,
                })
            })
            .optional()?;

        Ok(stats.unwrap_or_else(|| AccountStats::new(account_id)))
    }

    pub async fn save_stats(&self, stats: &AccountStats) -> Result<()> {
        let conn = self.storage.get_connection().await;

        conn.execute(
            "REPLACE INTO stats (account_id, wins, losses, profit, total_losses, total_gambled, broadcasts)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                stats.account_id.to_string(),
                stats.wins,
                stats.losses,
                stats.profit,
                stats.total_losses,
                stats.total_gambled,
                stats.display_broadcasts,
            ],
        )?;

        Ok(())
    }
}
