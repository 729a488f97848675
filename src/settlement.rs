//! Settlement orchestrator (§4.3): turns a verified authorization into an
//! on-chain outcome and a durable record, with webhook notification.
//! Grounded on `examples/x402-rs-x402-rs/src/facilitator_local.rs`'s
//! `settle` method (pending-record-first discipline, simulate/submit/confirm
//! shape) and the single-worker-mutex pattern named in SPEC_FULL.md §9.

use crate::audit_log::{AuditLog, AuditLogError, Protocol, TransactionPatch, TransactionRecord, TransactionStatus};
use crate::chain::contracts::{IEIP3009Token, IPermit2, PERMIT2_ADDRESS};
use crate::chain::nonce_manager::PendingNonceManager;
use crate::chain::provider::LedgerRead;
use crate::config::{ChainConfig, Config, OperatingMode};
use crate::error::ErrorReason;
use crate::registry::TokenRegistry;
use crate::replay_store::{NonceLookup, ReplayStore};
use crate::splitter;
use crate::types::{AuthorizationPayload, PaymentRequirements, RawPaymentPayload};
use crate::util::money::{net_and_fee, BoundedAmount, FeeBps};
use crate::verifier::{self, Context as VerifyContext, Verified};
use crate::webhook::{WebhookEvent, WebhookEventData, WebhookRegistry};
use alloy_network::{EthereumWallet, TransactionBuilder};
use alloy_primitives::{Address, B256};
use alloy_provider::{Provider, ProviderBuilder};
use alloy_rpc_types_eth::TransactionRequest;
use alloy_signer_local::PrivateKeySigner;
use alloy_sol_types::SolCall;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum SettlementError {
    #[error("verification failed: {0}")]
    Verify(#[from] verifier::VerifyError),
    #[error("audit store unavailable: {0}")]
    AuditUnavailable(#[from] AuditLogError),
    #[error("facilitator not configured for this network")]
    NotConfigured,
    #[error("authorization-spend transaction reverted: {0}")]
    SpendReverted(String),
    #[error("authorization-spend confirmation timed out")]
    SpendTimeout,
    #[error("splitter call failed: {0}")]
    Splitter(#[from] splitter::SplitterError),
}

impl SettlementError {
    pub fn reason_code(&self) -> ErrorReason {
        match self {
            SettlementError::Verify(e) => e.reason_code(),
            SettlementError::AuditUnavailable(_) => ErrorReason::FacilitatorNotConfigured,
            SettlementError::NotConfigured => ErrorReason::FacilitatorNotConfigured,
            SettlementError::SpendReverted(_) => ErrorReason::TransactionReverted,
            SettlementError::SpendTimeout => ErrorReason::TransactionTimeout,
            SettlementError::Splitter(e) => e.reason_code(),
        }
    }
}

pub struct SettleOutcome {
    pub success: bool,
    pub payer: Option<Address>,
    pub ledger_tx_id: Option<String>,
    pub block_number: Option<u64>,
    pub fee: Option<BoundedAmount>,
    pub protocol: &'static str,
    pub transaction_id: String,
    pub error_reason: Option<ErrorReason>,
}

/// Everything the orchestrator needs, wired once at startup and shared
/// across requests. The settlement mutex is realized as `nonce_manager`'s
/// per-account `Mutex` plus the fact that each `settle` call runs its
/// critical section start-to-finish before releasing that lock (§5).
pub struct Settlement {
    pub config: Arc<Config>,
    pub registry: Arc<TokenRegistry>,
    pub replay_store: Arc<dyn ReplayStore>,
    pub audit_log: Arc<dyn AuditLog>,
    pub ledger: Arc<dyn LedgerRead>,
    pub nonce_manager: PendingNonceManager,
    pub webhooks: Arc<WebhookRegistry>,
}

impl Settlement {
    #[tracing::instrument(skip_all, err)]
    pub async fn settle(
        &self,
        raw_payload: &RawPaymentPayload,
        requirements: &PaymentRequirements,
    ) -> Result<SettleOutcome, SettlementError> {
        let chain = self
            .config
            .chain(&requirements.network)
            .map_err(|_| SettlementError::NotConfigured)?;
        let facilitator_address = facilitator_address(self.config.signer_private_key())
            .map_err(|_| SettlementError::NotConfigured)?;

        // Step 1-2: dispatch + re-run verification (defence in depth).
        let verify_ctx = VerifyContext::new(
            &self.registry,
            self.replay_store.as_ref(),
            self.ledger.as_ref(),
            chain.operating_mode,
            chain.splitter_address,
            facilitator_address,
            crate::timestamp::UnixTimestamp::try_now().map_err(|_| SettlementError::NotConfigured)?,
        );
        let verified = verifier::verify(raw_payload, requirements, verify_ctx).await?;

        // Step 3: open the audit record before any on-chain activity.
        let transaction_id = Uuid::new_v4().to_string();
        let token_record = self.registry.by_address(verified.token);
        let protocol = match verified.authorization {
            AuthorizationPayload::WitnessSpend(_) => Protocol::WitnessSpend,
            AuthorizationPayload::DirectAuth(_) => Protocol::DirectAuth,
        };
        let amount = verified.authorization.amount();
        let record = TransactionRecord {
            id: transaction_id.clone(),
            nonce: hex::encode(nonce_bytes(&verified.authorization)),
            payer: verified.payer.to_string(),
            receiver: requirements.pay_to.0.clone(),
            token_address: verified.token.to_string(),
            token_symbol: token_record.as_ref().map(|t| t.symbol.to_string()).unwrap_or_default(),
            amount: amount.to_string(),
            fee: "0".into(),
            fee_bps: token_record.as_ref().map(|t| t.fee_bps).unwrap_or(0),
            network: requirements.network.clone(),
            ledger_tx_id: None,
            status: TransactionStatus::Pending,
            error_reason: None,
            protocol,
            created_at: 0,
            settled_at: None,
        };
        self.audit_log.create(record).await?;

        match self.settle_inner(chain, facilitator_address, &verified, requirements, &transaction_id).await {
            Ok(outcome) => {
                self.fire_webhook(&outcome, requirements).await;
                Ok(outcome)
            }
            Err(err) => {
                let reason = err.reason_code();
                let _ = self
                    .audit_log
                    .update(
                        &transaction_id,
                        TransactionPatch { status: Some(TransactionStatus::Failed), error_reason: Some(reason), ..Default::default() },
                    )
                    .await;
                self.fire_webhook(
                    &SettleOutcome {
                        success: false,
                        payer: Some(verified.payer),
                        ledger_tx_id: None,
                        block_number: None,
                        fee: None,
                        protocol: protocol_name(protocol),
                        transaction_id: transaction_id.clone(),
                        error_reason: Some(reason),
                    },
                    requirements,
                )
                .await;
                Err(err)
            }
        }
    }

    async fn settle_inner(
        &self,
        chain: &ChainConfig,
        facilitator_address: Address,
        verified: &Verified,
        requirements: &PaymentRequirements,
        transaction_id: &str,
    ) -> Result<SettleOutcome, SettlementError> {
        // Step 4a: effective fee.
        let token_record = self.registry.by_address(verified.token);
        let fee_bps = token_record.as_ref().map(|t| if t.fee_exempt { 0 } else { t.fee_bps }).unwrap_or(0);
        let amount = verified.authorization.amount();
        let (net_amount, fee_amount) = net_and_fee(amount, FeeBps(fee_bps));

        // Step 4b: destination.
        let using_splitter = chain.splitter_address.is_some()
            && requirements
                .pay_to
                .as_evm_address()
                .map(|p| Some(p) == chain.splitter_address)
                .unwrap_or(false);
        let spend_destination = if using_splitter {
            chain.splitter_address.expect("checked above")
        } else {
            requirements.pay_to.as_evm_address().ok_or(SettlementError::NotConfigured)?
        };

        // Step 4c-4d: submit the authorization-spend. Not retried: it is
        // bound to the user's signed nonce (SPEC_FULL.md §9 "retry loop
        // scope").
        let settlement_timeout = Duration::from_millis(self.config.settlement_timeout_ms());
        let (spend_tx_hash, spend_block) = submit_authorization_spend(
            &chain.rpc_url.0,
            self.config.signer_private_key(),
            chain.chain_id,
            verified.token,
            spend_destination,
            &self.nonce_manager,
            &verified.authorization,
            settlement_timeout,
        )
        .await?;

        self.audit_log
            .update(transaction_id, TransactionPatch { ledger_tx_id: Some(spend_tx_hash.clone()), ..Default::default() })
            .await?;

        let (terminal_tx_hash, terminal_block) = if using_splitter {
            // Step 4f: splitter call. Failure here is the stuck-funds case
            // (SPEC_FULL.md §9 decision 1): nonce is deliberately left
            // unmarked.
            let recipient = requirements.actual_recipient().or(chain.treasury).ok_or(SettlementError::NotConfigured)?;
            let outcome = splitter::split_payment(
                &chain.rpc_url.0,
                *self.config.signer_private_key(),
                chain.chain_id,
                chain.splitter_address.expect("checked above"),
                &self.nonce_manager,
                verified.token,
                verified.payer,
                recipient,
                amount,
                settlement_timeout,
            )
            .await
            .map_err(|e| {
                tracing::error!(
                    spend_tx = %spend_tx_hash,
                    "splitter call failed after authorization-spend succeeded; funds are stuck in the splitter"
                );
                SettlementError::Splitter(e)
            })?;
            (outcome.tx_hash, outcome.block_number)
        } else {
            (spend_tx_hash, spend_block)
        };

        // Step 4g: mark the nonce used before marking success.
        let nonce = nonce_bytes(&verified.authorization);
        self.replay_store
            .mark_used(verified.payer, &nonce, verified.token, &terminal_tx_hash)
            .await
            .map_err(|_| SettlementError::NotConfigured)?;

        self.audit_log
            .update(
                transaction_id,
                TransactionPatch {
                    status: Some(TransactionStatus::Success),
                    ledger_tx_id: Some(terminal_tx_hash.clone()),
                    settled_at: Some(now_unix()),
                    fee: Some(fee_amount.to_string()),
                    ..Default::default()
                },
            )
            .await?;

        let _ = net_amount; // recorded on-chain by the splitter/transfer itself, not separately tracked here
        Ok(SettleOutcome {
            success: true,
            payer: Some(verified.payer),
            ledger_tx_id: Some(terminal_tx_hash),
            block_number: terminal_block,
            fee: Some(fee_amount),
            protocol: protocol_name_for(&verified.authorization),
            transaction_id: transaction_id.to_string(),
            error_reason: None,
        })
    }

    async fn fire_webhook(&self, outcome: &SettleOutcome, requirements: &PaymentRequirements) {
        let event_name = if outcome.success { "settlement.success" } else { "settlement.failed" };
        self.webhooks.fire(WebhookEvent {
            event: event_name.into(),
            timestamp: crate::timestamp::UnixTimestamp::try_now().map(|t| t.to_string()).unwrap_or_default(),
            data: WebhookEventData {
                transaction_id: outcome.transaction_id.clone(),
                tx_hash: outcome.ledger_tx_id.clone(),
                payer: outcome.payer.map(|p| p.to_string()).unwrap_or_default(),
                receiver: requirements.pay_to.0.clone(),
                token: requirements.asset.to_string(),
                amount: requirements.max_amount_required.to_string(),
                fee: outcome.fee.map(|f| f.to_string()).unwrap_or_else(|| "0".into()),
                network: requirements.network.clone(),
                status: if outcome.success { "success".into() } else { "failed".into() },
                error_reason: outcome.error_reason.map(|r| r.to_string()),
            },
        });
    }
}

fn protocol_name(protocol: Protocol) -> &'static str {
    match protocol {
        Protocol::WitnessSpend => "witness-spend",
        Protocol::DirectAuth => "direct-auth",
    }
}

fn protocol_name_for(payload: &AuthorizationPayload) -> &'static str {
    payload.protocol_name()
}

fn nonce_bytes(payload: &AuthorizationPayload) -> [u8; 32] {
    match payload {
        AuthorizationPayload::WitnessSpend(a) => a.nonce.as_u256().to_be_bytes(),
        AuthorizationPayload::DirectAuth(a) => a.nonce.0,
    }
}

pub(crate) fn facilitator_address(private_key: &B256) -> Result<Address, ()> {
    PrivateKeySigner::from_bytes(private_key).map(|s| s.address()).map_err(|_| ())
}

fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Submits (and waits for confirmation of) the single authorization-spend
/// transaction: `permitWitnessTransferFrom` for witness-spend,
/// `transferWithAuthorization` for direct-auth. This call is never retried
/// on nonce conflicts -- it consumes a user-signed nonce, not one of ours
/// (SPEC_FULL.md §9 "retry loop scope").
async fn submit_authorization_spend(
    rpc_url: &url::Url,
    signer_private_key: &B256,
    chain_id: u64,
    token: Address,
    destination: Address,
    nonce_manager: &PendingNonceManager,
    authorization: &AuthorizationPayload,
    timeout: Duration,
) -> Result<(String, Option<u64>), SettlementError> {
    let signer = PrivateKeySigner::from_bytes(signer_private_key).map_err(|_| SettlementError::NotConfigured)?;
    let facilitator_address = signer.address();
    let wallet = EthereumWallet::from(signer);
    let provider = ProviderBuilder::new().wallet(wallet).connect_http(rpc_url.clone());

    let calldata = match authorization {
        AuthorizationPayload::WitnessSpend(auth) => {
            let sig = auth.signature.0;
            IPermit2::permitWitnessTransferFromCall {
                permit: crate::chain::contracts::PermitTransferFrom {
                    permitted: crate::chain::contracts::TokenPermissions {
                        token: auth.permitted.token,
                        amount: auth.permitted.amount.as_u256(),
                    },
                    nonce: auth.nonce.as_u256(),
                    deadline: auth.deadline.into(),
                },
                transferDetails: crate::chain::contracts::SignatureTransferDetails {
                    to: destination,
                    requestedAmount: auth.permitted.amount.as_u256(),
                },
                owner: facilitator_address,
                witness: B256::from_slice(&alloy_primitives::keccak256(b"X402TransferDetails")[..]),
                witnessTypeString: "X402TransferDetails(address receiver,uint256 validAfter,uint256 validBefore)".into(),
                signature: sig.to_vec().into(),
            }
            .abi_encode()
        }
        AuthorizationPayload::DirectAuth(auth) => {
            let sig = auth.signature.0;
            IEIP3009Token::transferWithAuthorizationCall {
                from: auth.from,
                to: auth.to,
                value: auth.value.as_u256(),
                validAfter: auth.valid_after.into(),
                validBefore: auth.valid_before.into(),
                nonce: B256::from(auth.nonce.0),
                v: sig[64],
                r: B256::from_slice(&sig[0..32]),
                s: B256::from_slice(&sig[32..64]),
            }
            .abi_encode()
        }
    };

    let target = match authorization {
        AuthorizationPayload::WitnessSpend(_) => PERMIT2_ADDRESS,
        // direct-auth calls `transferWithAuthorization` on the token
        // contract itself; the signed transfer's recipient (`destination`)
        // is carried inside the calldata, not as the call target.
        AuthorizationPayload::DirectAuth(_) => token,
    };

    let nonce = nonce_manager
        .next_nonce(&provider, facilitator_address)
        .await
        .map_err(|e| SettlementError::SpendReverted(e.to_string()))?;
    let gas_price = provider.get_gas_price().await.map_err(|e| SettlementError::SpendReverted(e.to_string()))?;

    let request = TransactionRequest::default()
        .with_to(target)
        .with_input(calldata)
        .with_nonce(nonce)
        .with_chain_id(chain_id)
        .with_max_fee_per_gas(gas_price)
        .with_max_priority_fee_per_gas(gas_price / 10);

    // Dry-run against current state before spending gas or the nonce slot
    // on a call that would just revert.
    provider.call(request.clone()).await.map_err(|e| SettlementError::SpendReverted(e.to_string()))?;

    let sent = provider.send_transaction(request).await.map_err(|e| SettlementError::SpendReverted(e.to_string()))?;
    let tx_hash = *sent.tx_hash();

    let receipt = tokio::time::timeout(timeout, sent.get_receipt())
        .await
        .map_err(|_| SettlementError::SpendTimeout)?
        .map_err(|e| SettlementError::SpendReverted(e.to_string()))?;

    if !receipt.status() {
        return Err(SettlementError::SpendReverted("authorization-spend reverted on-chain".into()));
    }

    Ok((format!("0x{}", hex::encode(tx_hash)), receipt.block_number))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_codes_propagate_from_verify_errors() {
        let err = SettlementError::Verify(verifier::VerifyError(ErrorReason::NonceAlreadyUsed));
        assert_eq!(err.reason_code(), ErrorReason::NonceAlreadyUsed);
    }

    #[test]
    fn splitter_stuck_funds_reason_is_transaction_reverted() {
        let err = SettlementError::Splitter(splitter::SplitterError::Reverted("x".into()));
        assert_eq!(err.reason_code(), ErrorReason::TransactionReverted);
    }
}
