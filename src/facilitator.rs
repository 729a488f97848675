//! Top-level facilitator trait (§6): wires the Verifier and Settlement
//! orchestrator behind one interface, matching the teacher's
//! `Facilitator` trait shape (verify/settle/supported), generalized from
//! two schemes (EVM/SVM exact) down to this crate's single exact-EVM scheme.

use crate::config::Config;
use crate::error::FacilitatorError;
use crate::registry::TokenRegistry;
use crate::settlement::{Settlement, SettleOutcome};
use crate::timestamp::UnixTimestamp;
use crate::types::{PaymentRequirements, Scheme, VerifyResponse};
use crate::verifier::{self, Context as VerifyContext};
use std::sync::Arc;

#[derive(Debug, Clone, serde::Serialize)]
pub struct SupportedKind {
    pub scheme: &'static str,
    pub network: String,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct SupportedToken {
    pub address: String,
    pub symbol: &'static str,
    pub decimals: u8,
    #[serde(rename = "feeBps")]
    pub fee_bps: u16,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct SupportedResponse {
    pub kinds: Vec<SupportedKind>,
    pub tokens: Vec<SupportedToken>,
    #[serde(rename = "facilitatorAddress")]
    pub facilitator_address: String,
}

/// Asynchronous interface a facilitator implements: verify, settle, and
/// advertise what it supports (§6 `/verify`, `/settle`, `/supported`).
#[async_trait::async_trait]
pub trait Facilitator: Send + Sync {
    async fn verify(&self, raw_payload: &crate::types::RawPaymentPayload, requirements: &PaymentRequirements) -> Result<VerifyResponse, FacilitatorError>;

    async fn verify_quick(&self, raw_payload: &crate::types::RawPaymentPayload, requirements: &PaymentRequirements) -> Result<VerifyResponse, FacilitatorError>;

    async fn settle(&self, raw_payload: &crate::types::RawPaymentPayload, requirements: &PaymentRequirements) -> Result<SettleOutcome, FacilitatorError>;

    async fn supported(&self) -> SupportedResponse;
}

#[async_trait::async_trait]
impl<T: Facilitator + ?Sized> Facilitator for Arc<T> {
    async fn verify(&self, raw_payload: &crate::types::RawPaymentPayload, requirements: &PaymentRequirements) -> Result<VerifyResponse, FacilitatorError> {
        self.as_ref().verify(raw_payload, requirements).await
    }

    async fn verify_quick(&self, raw_payload: &crate::types::RawPaymentPayload, requirements: &PaymentRequirements) -> Result<VerifyResponse, FacilitatorError> {
        self.as_ref().verify_quick(raw_payload, requirements).await
    }

    async fn settle(&self, raw_payload: &crate::types::RawPaymentPayload, requirements: &PaymentRequirements) -> Result<SettleOutcome, FacilitatorError> {
        self.as_ref().settle(raw_payload, requirements).await
    }

    async fn supported(&self) -> SupportedResponse {
        self.as_ref().supported().await
    }
}

/// The concrete, single-scheme (exact, EVM) facilitator this crate ships.
pub struct ExactEvmFacilitator {
    pub config: Arc<Config>,
    pub registry: Arc<TokenRegistry>,
    pub settlement: Arc<Settlement>,
}

impl ExactEvmFacilitator {
    fn verify_context(&self, requirements: &PaymentRequirements) -> Result<VerifyContext<'_>, FacilitatorError> {
        let chain = self
            .config
            .chain(&requirements.network)
            .map_err(|_| FacilitatorError::NotConfigured(requirements.network.clone()))?;
        let facilitator_address = crate::settlement::facilitator_address(self.config.signer_private_key())
            .map_err(|_| FacilitatorError::NotConfigured(requirements.network.clone()))?;
        let now = UnixTimestamp::try_now().map_err(|_| FacilitatorError::NotConfigured(requirements.network.clone()))?;
        Ok(VerifyContext::new(
            &self.registry,
            self.settlement.replay_store.as_ref(),
            self.settlement.ledger.as_ref(),
            chain.operating_mode,
            chain.splitter_address,
            facilitator_address,
            now,
        ))
    }
}

#[async_trait::async_trait]
impl Facilitator for ExactEvmFacilitator {
    #[tracing::instrument(skip_all, err)]
    async fn verify(&self, raw_payload: &crate::types::RawPaymentPayload, requirements: &PaymentRequirements) -> Result<VerifyResponse, FacilitatorError> {
        let ctx = self.verify_context(requirements)?;
        match verifier::verify(raw_payload, requirements, ctx).await {
            Ok(verified) => Ok(VerifyResponse { is_valid: true, payer: Some(verified.payer.to_string()), invalid_reason: None }),
            Err(err) => Ok(VerifyResponse { is_valid: false, payer: None, invalid_reason: Some(err.reason_code()) }),
        }
    }

    #[tracing::instrument(skip_all, err)]
    async fn verify_quick(&self, raw_payload: &crate::types::RawPaymentPayload, requirements: &PaymentRequirements) -> Result<VerifyResponse, FacilitatorError> {
        let ctx = self.verify_context(requirements)?;
        match verifier::verify_quick(raw_payload, requirements, ctx).await {
            Ok(payer) => Ok(VerifyResponse { is_valid: true, payer: Some(payer.to_string()), invalid_reason: None }),
            Err(err) => Ok(VerifyResponse { is_valid: false, payer: None, invalid_reason: Some(err.reason_code()) }),
        }
    }

    #[tracing::instrument(skip_all, err)]
    async fn settle(&self, raw_payload: &crate::types::RawPaymentPayload, requirements: &PaymentRequirements) -> Result<SettleOutcome, FacilitatorError> {
        Ok(self.settlement.settle(raw_payload, requirements).await?)
    }

    async fn supported(&self) -> SupportedResponse {
        let facilitator_address = crate::settlement::facilitator_address(self.config.signer_private_key())
            .map(|a| a.to_string())
            .unwrap_or_default();
        let kinds = self
            .config
            .chains()
            .keys()
            .map(|network| SupportedKind { scheme: scheme_name(Scheme::Exact), network: network.clone() })
            .collect();
        let tokens = self
            .registry
            .known_tokens()
            .into_iter()
            .map(|t| SupportedToken { address: t.address.to_string(), symbol: t.symbol, decimals: t.decimals, fee_bps: t.fee_bps })
            .collect();
        SupportedResponse { kinds, tokens, facilitator_address }
    }
}

fn scheme_name(scheme: Scheme) -> &'static str {
    match scheme {
        Scheme::Exact => "exact",
    }
}
