//! Replay protection (§4.5). The `ReplayStore` trait returns a three-valued
//! [`NonceLookup`] rather than lying about store outages; the caller (the
//! orchestrator) decides whether `Unknown` should be treated as used
//! (SPEC_FULL.md §9 "fail-safe replay store" redesign flag).

use alloy_primitives::Address;
use async_trait::async_trait;
use dashmap::DashSet;
use rusqlite::Connection;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NonceLookup {
    Used,
    Unused,
    Unknown,
}

#[derive(Debug, thiserror::Error)]
pub enum ReplayStoreError {
    #[error("durable replay store unavailable: {0}")]
    Unavailable(String),
    #[error("failed to persist nonce as used: {0}")]
    MarkUsedFailed(String),
}

#[async_trait]
pub trait ReplayStore: Send + Sync {
    async fn is_used(&self, payer: Address, nonce: &[u8]) -> NonceLookup;
    async fn mark_used(&self, payer: Address, nonce: &[u8], token: Address, tx_id: &str) -> Result<(), ReplayStoreError>;
}

fn key(payer: Address, nonce: &[u8]) -> String {
    format!("{}:{}", payer.to_string().to_lowercase(), hex::encode(nonce))
}

/// Non-production fallback (§4.5 "Ephemeral mode"). The core refuses to
/// start in production mode without a durable backing (enforced in
/// `config.rs`'s `DurableStoreRequiredInProduction`), so this type is never
/// reachable from a production boot path.
#[derive(Default)]
pub struct InMemoryReplayStore {
    used: DashSet<String>,
}

impl InMemoryReplayStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReplayStore for InMemoryReplayStore {
    async fn is_used(&self, payer: Address, nonce: &[u8]) -> NonceLookup {
        if self.used.contains(&key(payer, nonce)) {
            NonceLookup::Used
        } else {
            NonceLookup::Unused
        }
    }

    async fn mark_used(&self, payer: Address, nonce: &[u8], _token: Address, _tx_id: &str) -> Result<(), ReplayStoreError> {
        self.used.insert(key(payer, nonce));
        Ok(())
    }
}

/// Durable, sqlite-backed store (§6 durable state layout: `nonces` table).
/// `rusqlite::Connection` is not `Sync`; access is serialized behind a
/// `Mutex`, matching the "concurrent safe; the only write is an idempotent
/// insertion" resource policy in §5 (reads and the idempotent insert are
/// cheap enough that serializing them is not a bottleneck relative to the
/// on-chain round trips surrounding them).
pub struct SqliteReplayStore {
    conn: Mutex<Connection>,
}

impl SqliteReplayStore {
    pub fn open(path: &str) -> Result<Self, ReplayStoreError> {
        let conn = Connection::open(path).map_err(|e| ReplayStoreError::Unavailable(e.to_string()))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS nonces (
                payer TEXT NOT NULL,
                nonce TEXT NOT NULL,
                token_address TEXT NOT NULL,
                used_at INTEGER NOT NULL,
                tx_id TEXT NOT NULL,
                PRIMARY KEY (payer, nonce)
            )",
        )
        .map_err(|e| ReplayStoreError::Unavailable(e.to_string()))?;
        Ok(SqliteReplayStore { conn: Mutex::new(conn) })
    }
}

#[async_trait]
impl ReplayStore for SqliteReplayStore {
    async fn is_used(&self, payer: Address, nonce: &[u8]) -> NonceLookup {
        let payer_lower = payer.to_string().to_lowercase();
        let nonce_hex = hex::encode(nonce);
        let conn = match self.conn.lock() {
            Ok(c) => c,
            Err(_) => return NonceLookup::Unknown,
        };
        let result: Result<i64, rusqlite::Error> = conn.query_row(
            "SELECT COUNT(*) FROM nonces WHERE payer = ?1 AND nonce = ?2",
            rusqlite::params![payer_lower, nonce_hex],
            |row| row.get(0),
        );
        match result {
            Ok(count) if count > 0 => NonceLookup::Used,
            Ok(_) => NonceLookup::Unused,
            Err(_) => NonceLookup::Unknown,
        }
    }

    async fn mark_used(&self, payer: Address, nonce: &[u8], token: Address, tx_id: &str) -> Result<(), ReplayStoreError> {
        let payer_lower = payer.to_string().to_lowercase();
        let nonce_hex = hex::encode(nonce);
        let token_lower = token.to_string().to_lowercase();
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        let conn = self.conn.lock().map_err(|e| ReplayStoreError::MarkUsedFailed(e.to_string()))?;
        conn.execute(
            "INSERT OR IGNORE INTO nonces (payer, nonce, token_address, used_at, tx_id) VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![payer_lower, nonce_hex, token_lower, now, tx_id],
        )
        .map_err(|e| ReplayStoreError::MarkUsedFailed(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> Address {
        "0x0000000000000000000000000000000000beef".parse().unwrap()
    }

    #[tokio::test]
    async fn in_memory_store_marks_and_looks_up() {
        let store = InMemoryReplayStore::new();
        let nonce = [1u8; 32];
        assert_eq!(store.is_used(addr(), &nonce).await, NonceLookup::Unused);
        store.mark_used(addr(), &nonce, addr(), "0xabc").await.unwrap();
        assert_eq!(store.is_used(addr(), &nonce).await, NonceLookup::Used);
    }

    #[tokio::test]
    async fn sqlite_store_marks_and_looks_up_in_memory_db() {
        let store = SqliteReplayStore::open(":memory:").unwrap();
        let nonce = [2u8; 32];
        assert_eq!(store.is_used(addr(), &nonce).await, NonceLookup::Unused);
        store.mark_used(addr(), &nonce, addr(), "0xabc").await.unwrap();
        assert_eq!(store.is_used(addr(), &nonce).await, NonceLookup::Used);
        // Idempotent insertion: a second mark_used for the same key does not error.
        assert!(store.mark_used(addr(), &nonce, addr(), "0xdef").await.is_ok());
    }
}
