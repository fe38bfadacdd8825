//! Delivery cache with per-entry expiry, stored alongside the messages.
//! A hint only: a missing key says nothing about whether a message was delivered.

use std::time::Duration;

use async_trait::async_trait;
use autosend_core::error::{AutoSendError, Result};
use autosend_core::traits::DeliveryCache;
use chrono::Utc;
use rusqlite::{OptionalExtension, params};

use crate::db::{SqliteStore, store_err, ts};

#[async_trait]
impl DeliveryCache for SqliteStore {
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| AutoSendError::Store(format!("Invalid cache TTL: {e}")))?;
        let now = Utc::now();
        let conn = self.conn()?;

        let purged = conn
            .execute("DELETE FROM delivery_cache WHERE expires_at <= ?1", [ts(now)])
            .map_err(|e| store_err("Purge cache", e))?;
        if purged > 0 {
            tracing::debug!("🧹 Purged {purged} expired cache entries");
        }

        conn.execute(
            "INSERT OR REPLACE INTO delivery_cache (key, value, expires_at) VALUES (?1, ?2, ?3)",
            params![key, value, ts(now + ttl)],
        )
        .map_err(|e| store_err("Cache set", e))?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let found = self
            .conn()?
            .query_row(
                "SELECT 1 FROM delivery_cache WHERE key = ?1 AND expires_at > ?2",
                params![key, ts(Utc::now())],
                |_| Ok(()),
            )
            .optional()
            .map_err(|e| store_err("Cache lookup", e))?;
        Ok(found.is_some())
    }
}
