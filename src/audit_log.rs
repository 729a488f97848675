//! Audit log (§4.6): a tamper-evident, append-only record of every attempted
//! settlement. The orchestrator owns the record's lifecycle end-to-end
//! (SPEC_FULL.md §9 "audit record ownership"); this module is a dumb
//! persister with no decision logic of its own.

use crate::error::ErrorReason;
use async_trait::async_trait;
use dashmap::DashMap;
use rusqlite::Connection;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    Pending,
    Success,
    Failed,
}

impl TransactionStatus {
    fn as_str(self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Success => "success",
            TransactionStatus::Failed => "failed",
        }
    }

    fn from_str(s: &str) -> Self {
        match s {
            "success" => TransactionStatus::Success,
            "failed" => TransactionStatus::Failed,
            _ => TransactionStatus::Pending,
        }
    }

    /// Enforces §3 invariant 5: `pending -> success` or `pending -> failed`,
    /// no other transitions (including no transition away from a terminal
    /// state).
    pub fn can_transition_to(self, next: TransactionStatus) -> bool {
        matches!(
            (self, next),
            (TransactionStatus::Pending, TransactionStatus::Success)
                | (TransactionStatus::Pending, TransactionStatus::Failed)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    WitnessSpend,
    DirectAuth,
}

impl Protocol {
    fn as_str(self) -> &'static str {
        match self {
            Protocol::WitnessSpend => "witness-spend",
            Protocol::DirectAuth => "direct-auth",
        }
    }
}

#[derive(Debug, Clone)]
pub struct TransactionRecord {
    pub id: String,
    pub nonce: String,
    pub payer: String,
    pub receiver: String,
    pub token_address: String,
    pub token_symbol: String,
    pub amount: String,
    pub fee: String,
    pub fee_bps: u16,
    pub network: String,
    pub ledger_tx_id: Option<String>,
    pub status: TransactionStatus,
    pub error_reason: Option<ErrorReason>,
    pub protocol: Protocol,
    pub created_at: i64,
    pub settled_at: Option<i64>,
}

/// A partial update applied to an existing record (§4.6 `update(id, patch)`).
#[derive(Debug, Clone, Default)]
pub struct TransactionPatch {
    pub status: Option<TransactionStatus>,
    pub ledger_tx_id: Option<String>,
    pub error_reason: Option<ErrorReason>,
    pub settled_at: Option<i64>,
    pub fee: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct AuditStats {
    pub total: u64,
    pub successful: u64,
    pub failed: u64,
    pub pending: u64,
    pub total_gross_volume: String,
    pub total_fees_collected: String,
    pub gross_volume_by_symbol: HashMap<String, String>,
}

#[derive(Debug, thiserror::Error)]
pub enum AuditLogError {
    #[error("durable audit store unavailable: {0}")]
    Unavailable(String),
    #[error("no record with id {0}")]
    NotFound(String),
    #[error("invalid status transition from {from:?} to {to:?}")]
    InvalidTransition { from: TransactionStatus, to: TransactionStatus },
}

#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn create(&self, record: TransactionRecord) -> Result<String, AuditLogError>;
    async fn update(&self, id: &str, patch: TransactionPatch) -> Result<(), AuditLogError>;
    async fn read(&self, id: &str) -> Result<TransactionRecord, AuditLogError>;
    async fn recent(&self, limit: usize) -> Vec<TransactionRecord>;
    async fn stats(&self) -> AuditStats;
}

fn amount_as_u256(s: &str) -> alloy_primitives::U256 {
    alloy_primitives::U256::from_str_radix(s, 10).unwrap_or_default()
}

fn apply_patch(record: &mut TransactionRecord, patch: TransactionPatch) -> Result<(), AuditLogError> {
    if let Some(next) = patch.status {
        if !record.status.can_transition_to(next) {
            return Err(AuditLogError::InvalidTransition { from: record.status, to: next });
        }
        record.status = next;
    }
    if let Some(tx_id) = patch.ledger_tx_id {
        record.ledger_tx_id = Some(tx_id);
    }
    if let Some(reason) = patch.error_reason {
        record.error_reason = Some(reason);
    }
    if let Some(settled_at) = patch.settled_at {
        record.settled_at = Some(settled_at);
    }
    if let Some(fee) = patch.fee {
        record.fee = fee;
    }
    Ok(())
}

fn stats_from_records<'a>(records: impl Iterator<Item = &'a TransactionRecord>) -> AuditStats {
    let mut stats = AuditStats::default();
    let mut gross = alloy_primitives::U256::ZERO;
    let mut fees = alloy_primitives::U256::ZERO;
    let mut by_symbol: HashMap<String, alloy_primitives::U256> = HashMap::new();
    for record in records {
        stats.total += 1;
        match record.status {
            TransactionStatus::Success => stats.successful += 1,
            TransactionStatus::Failed => stats.failed += 1,
            TransactionStatus::Pending => stats.pending += 1,
        }
        gross += amount_as_u256(&record.amount);
        fees += amount_as_u256(&record.fee);
        *by_symbol.entry(record.token_symbol.clone()).or_default() += amount_as_u256(&record.amount);
    }
    stats.total_gross_volume = gross.to_string();
    stats.total_fees_collected = fees.to_string();
    stats.gross_volume_by_symbol = by_symbol.into_iter().map(|(k, v)| (k, v.to_string())).collect();
    stats
}

/// Non-production fallback, mirroring `InMemoryReplayStore`.
#[derive(Default)]
pub struct InMemoryAuditLog {
    records: DashMap<String, TransactionRecord>,
    counter: AtomicI64,
}

impl InMemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AuditLog for InMemoryAuditLog {
    async fn create(&self, mut record: TransactionRecord) -> Result<String, AuditLogError> {
        record.created_at = self.counter.fetch_add(1, Ordering::SeqCst);
        let id = record.id.clone();
        self.records.insert(id.clone(), record);
        Ok(id)
    }

    async fn update(&self, id: &str, patch: TransactionPatch) -> Result<(), AuditLogError> {
        let mut entry = self.records.get_mut(id).ok_or_else(|| AuditLogError::NotFound(id.to_string()))?;
        apply_patch(&mut entry, patch)
    }

    async fn read(&self, id: &str) -> Result<TransactionRecord, AuditLogError> {
        self.records
            .get(id)
            .map(|r| r.clone())
            .ok_or_else(|| AuditLogError::NotFound(id.to_string()))
    }

    async fn recent(&self, limit: usize) -> Vec<TransactionRecord> {
        let mut all: Vec<_> = self.records.iter().map(|r| r.clone()).collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        all.truncate(limit);
        all
    }

    async fn stats(&self) -> AuditStats {
        stats_from_records(self.records.iter().map(|r| r.clone()).collect::<Vec<_>>().iter())
    }
}

/// Durable, sqlite-backed store (§6 durable state layout: `transactions` table).
pub struct SqliteAuditLog {
    conn: Mutex<Connection>,
}

impl SqliteAuditLog {
    pub fn open(path: &str) -> Result<Self, AuditLogError> {
        let conn = Connection::open(path).map_err(|e| AuditLogError::Unavailable(e.to_string()))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS transactions (
                id TEXT PRIMARY KEY,
                nonce TEXT NOT NULL,
                payer TEXT NOT NULL,
                receiver TEXT NOT NULL,
                token_address TEXT NOT NULL,
                token_symbol TEXT NOT NULL,
                amount TEXT NOT NULL,
                fee TEXT NOT NULL,
                fee_bps INTEGER NOT NULL,
                network TEXT NOT NULL,
                tx_id TEXT,
                status TEXT NOT NULL,
                error_reason TEXT,
                protocol TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                settled_at INTEGER,
                UNIQUE(payer, nonce)
            )",
        )
        .map_err(|e| AuditLogError::Unavailable(e.to_string()))?;
        Ok(SqliteAuditLog { conn: Mutex::new(conn) })
    }

    fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<TransactionRecord> {
        let status: String = row.get("status")?;
        let protocol: String = row.get("protocol")?;
        let error_reason: Option<String> = row.get("error_reason")?;
        Ok(TransactionRecord {
            id: row.get("id")?,
            nonce: row.get("nonce")?,
            payer: row.get("payer")?,
            receiver: row.get("receiver")?,
            token_address: row.get("token_address")?,
            token_symbol: row.get("token_symbol")?,
            amount: row.get("amount")?,
            fee: row.get("fee")?,
            fee_bps: row.get::<_, i64>("fee_bps")? as u16,
            network: row.get("network")?,
            ledger_tx_id: row.get("tx_id")?,
            status: TransactionStatus::from_str(&status),
            error_reason: error_reason.and_then(|s| serde_json::from_str::<ErrorReason>(&format!("\"{s}\"")).ok()),
            protocol: if protocol == "witness-spend" { Protocol::WitnessSpend } else { Protocol::DirectAuth },
            created_at: row.get("created_at")?,
            settled_at: row.get("settled_at")?,
        })
    }
}

#[async_trait]
impl AuditLog for SqliteAuditLog {
    async fn create(&self, mut record: TransactionRecord) -> Result<String, AuditLogError> {
        record.created_at = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        let conn = self.conn.lock().map_err(|e| AuditLogError::Unavailable(e.to_string()))?;
        conn.execute(
            "INSERT INTO transactions (id, nonce, payer, receiver, token_address, token_symbol, amount, fee, fee_bps, network, tx_id, status, error_reason, protocol, created_at, settled_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
            rusqlite::params![
                record.id,
                record.nonce,
                record.payer,
                record.receiver,
                record.token_address,
                record.token_symbol,
                record.amount,
                record.fee,
                record.fee_bps,
                record.network,
                record.ledger_tx_id,
                record.status.as_str(),
                record.error_reason.map(|r| r.to_string()),
                record.protocol.as_str(),
                record.created_at,
                record.settled_at,
            ],
        )
        .map_err(|e| AuditLogError::Unavailable(e.to_string()))?;
        Ok(record.id)
    }

    async fn update(&self, id: &str, patch: TransactionPatch) -> Result<(), AuditLogError> {
        let mut record = self.read(id).await?;
        apply_patch(&mut record, patch)?;
        let conn = self.conn.lock().map_err(|e| AuditLogError::Unavailable(e.to_string()))?;
        conn.execute(
            "UPDATE transactions SET status = ?1, tx_id = ?2, error_reason = ?3, settled_at = ?4, fee = ?5 WHERE id = ?6",
            rusqlite::params![
                record.status.as_str(),
                record.ledger_tx_id,
                record.error_reason.map(|r| r.to_string()),
                record.settled_at,
                record.fee,
                id,
            ],
        )
        .map_err(|e| AuditLogError::Unavailable(e.to_string()))?;
        Ok(())
    }

    async fn read(&self, id: &str) -> Result<TransactionRecord, AuditLogError> {
        let conn = self.conn.lock().map_err(|e| AuditLogError::Unavailable(e.to_string()))?;
        conn.query_row("SELECT * FROM transactions WHERE id = ?1", rusqlite::params![id], Self::row_to_record)
            .map_err(|_| AuditLogError::NotFound(id.to_string()))
    }

    async fn recent(&self, limit: usize) -> Vec<TransactionRecord> {
        let conn = match self.conn.lock() {
            Ok(c) => c,
            Err(_) => return Vec::new(),
        };
        let mut stmt = match conn.prepare("SELECT * FROM transactions ORDER BY created_at DESC LIMIT ?1") {
            Ok(s) => s,
            Err(_) => return Vec::new(),
        };
        let rows = stmt.query_map(rusqlite::params![limit as i64], Self::row_to_record);
        match rows {
            Ok(iter) => iter.filter_map(|r| r.ok()).collect(),
            Err(_) => Vec::new(),
        }
    }

    async fn stats(&self) -> AuditStats {
        let records = self.recent(usize::MAX).await;
        stats_from_records(records.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(id: &str) -> TransactionRecord {
        TransactionRecord {
            id: id.to_string(),
            nonce: "1".into(),
            payer: "0xpayer".into(),
            receiver: "0xreceiver".into(),
            token_address: "0xtoken".into(),
            token_symbol: "USDC".into(),
            amount: "1000000".into(),
            fee: "1000".into(),
            fee_bps: 10,
            network: "base".into(),
            ledger_tx_id: None,
            status: TransactionStatus::Pending,
            error_reason: None,
            protocol: Protocol::DirectAuth,
            created_at: 0,
            settled_at: None,
        }
    }

    #[tokio::test]
    async fn enforces_monotonic_state_machine() {
        let log = InMemoryAuditLog::new();
        let id = log.create(sample("tx1")).await.unwrap();
        log.update(&id, TransactionPatch { status: Some(TransactionStatus::Success), ..Default::default() })
            .await
            .unwrap();
        let err = log
            .update(&id, TransactionPatch { status: Some(TransactionStatus::Failed), ..Default::default() })
            .await
            .unwrap_err();
        assert!(matches!(err, AuditLogError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn stats_aggregate_gross_and_fees() {
        let log = InMemoryAuditLog::new();
        log.create(sample("tx1")).await.unwrap();
        let mut second = sample("tx2");
        second.amount = "2000000".into();
        second.fee = "20000".into();
        log.create(second).await.unwrap();
        let stats = log.stats().await;
        assert_eq!(stats.total, 2);
        assert_eq!(stats.total_gross_volume, "3000000");
        assert_eq!(stats.total_fees_collected, "21000");
    }

    #[tokio::test]
    async fn sqlite_audit_log_round_trips() {
        let log = SqliteAuditLog::open(":memory:").unwrap();
        let id = log.create(sample("tx-sqlite")).await.unwrap();
        let read_back = log.read(&id).await.unwrap();
        assert_eq!(read_back.amount, "1000000");
        log.update(&id, TransactionPatch { status: Some(TransactionStatus::Success), settled_at: Some(123), ..Default::default() })
            .await
            .unwrap();
        let updated = log.read(&id).await.unwrap();
        assert!(matches!(updated.status, TransactionStatus::Success));
        assert_eq!(updated.settled_at, Some(123));
    }
}
