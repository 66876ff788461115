pub mod listing_store;
pub mod stats_store;

pub use listing_store::{ListingStore, StoredListing};
pub use stats_store::StatsStore;

use crate::error::{CoreError, Result};
use rusqlite::Connection;
use std::path::Path;
use tokio::sync::Mutex;

/// SQLite-backed durable store. Holds the open listings table (crash
/// recovery of escrowed stakes) and the per-account statistics table.
/// Active pairings are deliberately not persisted.
pub struct Storage {
    conn: Mutex<Connection>,
}

impl Storage {
    pub async fn new(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| CoreError::internal(format!("Failed to create directory: {}", e)))?;
        }

        let conn = Connection::open(db_path)?;
        let storage = Self {
            conn: Mutex::new(conn),
        };

        storage.init_schema().await?;
        Ok(storage)
    }

    /// Fully in-memory database, for tests and the demo CLI.
    pub async fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let storage = Self {
            conn: Mutex::new(conn),
        };

        storage.init_schema().await?;
        Ok(storage)
    }

    async fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().await;

        // Open listings table, keyed by creator identity
        conn.execute(
            "CREATE TABLE IF NOT EXISTS listings (
                account_id TEXT NOT NULL PRIMARY KEY,
                provider TEXT NOT NULL,
                amount INTEGER NOT NULL,
                created_at INTEGER NOT NULL
            )",
            [],
        )?;

        // Aggregate statistics table
        conn.execute(
            "CREATE TABLE IF NOT EXISTS stats (
                account_id TEXT NOT NULL PRIMARY KEY,
                wins INTEGER NOT NULL,
                losses INTEGER NOT NULL,
                profit INTEGER NOT NULL,
                total_losses INTEGER NOT NULL,
                total_gambled INTEGER NOT NULL,
                broadcasts INTEGER NOT NULL
            )",
            [],
        )?;

        Ok(())
    }

    pub async fn get_connection(&self) -> tokio::sync::MutexGuard<'_, Connection> {
        self.conn.lock().await
    }
}
