//! Facilitator-account pending-nonce tracking for the facilitator's own
//! submissions (the authorization-spend and, when applicable, the splitter
//! call). Grounded on
//! `examples/x402-rs-x402-rs/src/chain/eip155/pending_nonce_manager.rs`.

use alloy_primitives::Address;
use alloy_provider::Provider;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

const NOT_YET_FETCHED: u64 = u64::MAX;

#[derive(Debug, thiserror::Error)]
pub enum NonceError {
    #[error("failed to fetch pending transaction count: {0}")]
    Rpc(String),
}

/// Tracks the next nonce to use per `(chain, account)`, fetching the
/// on-chain "pending" nonce lazily on first use and incrementing locally
/// thereafter. `reset` forces the next call to re-fetch from chain, used
/// after a submission failure so a stale local guess doesn't poison
/// subsequent attempts (§4.3 "Nonce-retry loop": "Query the pending-nonce
/// for the facilitator account explicitly (not cached)").
#[derive(Clone, Default)]
pub struct PendingNonceManager {
    next: Arc<DashMap<Address, Arc<Mutex<u64>>>>,
}

impl PendingNonceManager {
    pub fn new() -> Self {
        PendingNonceManager {
            next: Arc::new(DashMap::new()),
        }
    }

    fn slot(&self, account: Address) -> Arc<Mutex<u64>> {
        self.next
            .entry(account)
            .or_insert_with(|| Arc::new(Mutex::new(NOT_YET_FETCHED)))
            .clone()
    }

    /// Returns the next nonce to use, fetching from chain if this is the
    /// first call for this account or after a [`Self::reset`].
    pub async fn next_nonce<P: Provider>(&self, provider: &P, account: Address) -> Result<u64, NonceError> {
        let slot = self.slot(account);
        let mut guard = slot.lock().await;
        if *guard == NOT_YET_FETCHED {
            let pending = provider
                .get_transaction_count(account)
                .pending()
                .await
                .map_err(|e| NonceError::Rpc(e.to_string()))?;
            *guard = pending;
        }
        let nonce = *guard;
        *guard += 1;
        Ok(nonce)
    }

    /// Forces the next call for this account to re-fetch from chain,
    /// rather than trusting our local increment, after a failed submission.
    pub fn reset(&self, account: Address) {
        if let Some(slot) = self.next.get(&account) {
            let slot = slot.clone();
            tokio::spawn(async move {
                let mut guard = slot.lock().await;
                *guard = NOT_YET_FETCHED;
            });
        }
    }
}
