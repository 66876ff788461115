use crate::error::Result;
use crate::storage::Storage;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Serialized shadow of a `LISTED` wager. A row exists exactly while the
/// creator's stake is escrowed and unpaired; it is the only record that
/// survives a crash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredListing {
    pub account_id: Uuid,
    pub provider: String,
    pub amount: u64,
    pub created_at: DateTime<Utc>,
}

pub struct ListingStore<'a> {
    storage: &'a Storage,
}

impl<'a> ListingStore<'a> {
    pub fn new(storage: &'a Storage) -> Self {
        Self { storage }
    }

    pub async fn save_listing(&self, listing: &StoredListing) -> Result<()> {
        let conn = self.storage.get_connection().await;

        conn.execute(
            "REPLACE INTO listings (account_id, provider, amount, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                listing.account_id.to_string(),
                listing.provider,
                listing.amount,
                listing.created_at.timestamp(),
            ],
        )?;

        Ok(())
    }

    pub async fn load_listing(&self, account_id: Uuid) -> Result<Option<StoredListing>> {
        let conn = self.storage.get_connection().await;

        let mut stmt = conn.prepare(
            "SELECT account_id, provider, amount, created_at
             FROM listings WHERE account_id = ?1",
        )?;

        let listing = stmt
            .query_row(params![account_id.to_string()], |row| {
                Ok(StoredListing {
                    account_id,
                    provider: row.get(1)?,
                    amount: row.get(2)?,
                    created_at: chrono::DateTime::from_timestamp(row.get(3)?, 0)
                        .unwrap_or_else(Utc::now),
                })
            })
            .optional()?;

        Ok(listing)
    }

    pub async fn delete_listing(&self, account_id: Uuid) -> Result<()> {
        let conn = self.storage.get_connection().await;

        conn.execute(
            "DELETE FROM listings WHERE account_id = ?1",
            params![account_id.to_string()],
        )?;

        Ok(())
    }

    pub async fn all_listings(&self) -> Result<Vec<StoredListing>> {
        let conn = self.storage.get_connection().await;

        let mut stmt = conn.prepare(
            "SELECT account_id, provider, amount, created_at
             FROM listings ORDER BY created_at",
        )?;

        let rows = stmt.query_map([], |row| {
            let id: String = row.get(0)?;
            let account_id = id.parse::<Uuid>().map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    0,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })?;

            Ok(StoredListing {
                account_id,
                provider: row.get(1)?,
                amount: row.get(2)?,
                created_at: chrono::DateTime::from_timestamp(row.get(3)?, 0)
                    .unwrap_or_else(Utc::now),
            })
        })?;

        let mut listings = Vec::new();
        for listing in rows {
            listings.push(listing?);
        }

        Ok(listings)
    }
}
