//! Verifier (§4.1): decides whether a payment would settle, without
//! spending ledger resources. Grounded on
//! `examples/x402-rs-x402-rs/src/facilitator_local.rs`'s `verify` method
//! (step ordering, normalization idiom) and the signature/registry/replay
//! modules it orchestrates.

use crate::chain::contracts::PERMIT2_ADDRESS;
use crate::chain::provider::LedgerRead;
use crate::config::OperatingMode;
use crate::error::ErrorReason;
use crate::registry::TokenRegistry;
use crate::registry::network::chain_id_for_network;
use crate::replay_store::{NonceLookup, ReplayStore};
use crate::signature::{eip3009, permit2, SignatureError};
use crate::timestamp::UnixTimestamp;
use crate::types::{addresses_equal, AuthorizationPayload, PaymentRequirements, RawPaymentPayload, Scheme};
use alloy_primitives::{Address, U256};

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct VerifyError(pub ErrorReason);

impl VerifyError {
    pub fn reason_code(&self) -> ErrorReason {
        self.0
    }
}

impl From<SignatureError> for VerifyError {
    fn from(_: SignatureError) -> Self {
        VerifyError(ErrorReason::InvalidSignature)
    }
}

/// The result of a successful verification: enough to drive settlement
/// without re-deriving it.
#[derive(Debug, Clone)]
pub struct Verified {
    pub payer: Address,
    pub authorization: AuthorizationPayload,
    pub chain_id: u64,
    pub token: Address,
}

/// Spender accepted for witness-spend authorizations under the configured
/// operating mode (SPEC_FULL.md §9 open question 2).
pub fn accepted_spender(mode: OperatingMode, splitter_address: Option<Address>, facilitator_address: Address) -> Option<Address> {
    match mode {
        OperatingMode::SplitterProxy => splitter_address,
        OperatingMode::Direct => Some(facilitator_address),
    }
}

fn effective_token(payload: &AuthorizationPayload, requirements: &PaymentRequirements) -> Address {
    match payload {
        AuthorizationPayload::WitnessSpend(a) => a.permitted.token,
        AuthorizationPayload::DirectAuth(_) => requirements.asset,
    }
}

fn nonce_bytes(payload: &AuthorizationPayload) -> [u8; 32] {
    match payload {
        AuthorizationPayload::WitnessSpend(a) => a.nonce.as_u256().to_be_bytes(),
        AuthorizationPayload::DirectAuth(a) => a.nonce.0,
    }
}

/// Copies `scheme`/`network`/`x402Version` from the requirements into the
/// raw payload when the payload omits them (§4.1 step 2).
fn normalize(payload: &RawPaymentPayload, requirements: &PaymentRequirements) -> (Scheme, String) {
    let scheme = payload.scheme.unwrap_or(Scheme::Exact);
    let network = payload.network.clone().unwrap_or_else(|| requirements.network.clone());
    (scheme, network)
}

pub struct Context<'a> {
    registry: &'a TokenRegistry,
    replay_store: &'a dyn ReplayStore,
    ledger: &'a dyn LedgerRead,
    operating_mode: OperatingMode,
    splitter_address: Option<Address>,
    facilitator_address: Address,
    now: UnixTimestamp,
}

/// Runs steps 1-7 only: structure, whitelist, spender, signature, time
/// window. Skips receiver/amount/nonce/funds (`/verify/quick`, §6).
pub async fn verify_quick(
    raw_payload: &RawPaymentPayload,
    requirements: &PaymentRequirements,
    ctx: Context<'_>,
) -> Result<Address, VerifyError> {
    let (payload, chain_id) = structural_and_dispatch(raw_payload, requirements, &ctx)?;
    spender_check(&payload, &ctx)?;
    let payer = recover_signer(&payload, requirements, chain_id)?;
    time_window_check(&payload, ctx.now)?;
    Ok(payer)
}

/// Runs the full 11-step procedure (§4.1).
pub async fn verify(
    raw_payload: &RawPaymentPayload,
    requirements: &PaymentRequirements,
    ctx: Context<'_>,
) -> Result<Verified, VerifyError> {
    let (payload, chain_id) = structural_and_dispatch(raw_payload, requirements, &ctx)?;
    spender_check(&payload, &ctx)?;
    let payer = recover_signer(&payload, requirements, chain_id)?;
    time_window_check(&payload, ctx.now)?;

    // Step 8: receiver match.
    let signed_receiver = payload.signed_receiver();
    if !addresses_equal(&signed_receiver.to_string(), &requirements.pay_to.0) {
        return Err(VerifyError(ErrorReason::InvalidAuthorizationTypedDataMessage));
    }

    // Step 9: amount.
    if payload.amount() < requirements.max_amount_required {
        return Err(VerifyError(ErrorReason::InvalidAuthorizationValueTooLow));
    }

    // Step 10: nonce lookup.
    let nonce = nonce_bytes(&payload);
    match ctx.replay_store.is_used(payer, &nonce).await {
        NonceLookup::Used => return Err(VerifyError(ErrorReason::NonceAlreadyUsed)),
        // Fail-safe: an unreachable store is treated as "used" by the
        // orchestrator, not as a green light (SPEC_FULL.md §9).
        NonceLookup::Unknown => return Err(VerifyError(ErrorReason::NonceAlreadyUsed)),
        NonceLookup::Unused => {}
    }

    // Step 11: funds. Allowance before balance (most actionable first).
    let token = effective_token(&payload, requirements);
    if matches!(payload, AuthorizationPayload::WitnessSpend(_)) {
        let allowance = ctx
            .ledger
            .allowance(chain_id, token, payer, PERMIT2_ADDRESS)
            .await
            .map_err(|_| VerifyError(ErrorReason::InsufficientFunds))?;
        if allowance < payload.amount().as_u256() {
            return Err(VerifyError(ErrorReason::OuterAllowanceRequired));
        }
    }
    let balance = ctx
        .ledger
        .balance_of(chain_id, token, payer)
        .await
        .map_err(|_| VerifyError(ErrorReason::InsufficientFunds))?;
    if balance < payload.amount().as_u256() {
        return Err(VerifyError(ErrorReason::InsufficientFunds));
    }

    Ok(Verified { payer, authorization: payload, chain_id, token })
}

fn structural_and_dispatch(
    raw_payload: &RawPaymentPayload,
    requirements: &PaymentRequirements,
    ctx: &Context<'_>,
) -> Result<(AuthorizationPayload, u64), VerifyError> {
    // Step 1: structural checks.
    if requirements.scheme != Scheme::Exact {
        return Err(VerifyError(ErrorReason::InvalidScheme));
    }
    if let Some(v) = raw_payload.x402_version {
        if !v.is_accepted() {
            return Err(VerifyError(ErrorReason::InvalidX402Version));
        }
    }

    // Step 2: normalization.
    let (_scheme, network) = normalize(raw_payload, requirements);
    let chain_id = chain_id_for_network(&network).ok_or(VerifyError(ErrorReason::InvalidNetwork))?;

    // Step 3: dispatch on payload shape.
    let payload = AuthorizationPayload::from_value(&raw_payload.payload).map_err(VerifyError)?;

    // Step 4: token whitelist.
    let token = effective_token(&payload, requirements);
    if !ctx.registry.is_whitelisted(token) {
        return Err(VerifyError(ErrorReason::TokenNotWhitelisted));
    }

    Ok((payload, chain_id))
}

fn spender_check(payload: &AuthorizationPayload, ctx: &Context<'_>) -> Result<(), VerifyError> {
    // Step 5: spender (witness-spend only).
    if let AuthorizationPayload::WitnessSpend(auth) = payload {
        let accepted = accepted_spender(ctx.operating_mode, ctx.splitter_address, ctx.facilitator_address)
            .ok_or(VerifyError(ErrorReason::FacilitatorNotConfigured))?;
        if auth.spender != accepted {
            return Err(VerifyError(ErrorReason::InvalidAuthorizationTypedDataMessage));
        }
    }
    Ok(())
}

fn recover_signer(payload: &AuthorizationPayload, requirements: &PaymentRequirements, chain_id: u64) -> Result<Address, VerifyError> {
    // Step 6: signer recovery.
    match payload {
        AuthorizationPayload::WitnessSpend(auth) => {
            permit2::recover_signer(auth, chain_id).map_err(VerifyError::from)
        }
        AuthorizationPayload::DirectAuth(auth) => {
            let domain = eip3009::domain_for_token(requirements.asset)
                .ok_or(VerifyError(ErrorReason::InvalidAuthorizationTypedDataMessage))?;
            let recovered = eip3009::recover_signer(auth, chain_id, requirements.asset, domain.name, domain.version)?;
            if recovered != auth.from {
                return Err(VerifyError(ErrorReason::InvalidSignatureAddress));
            }
            Ok(recovered)
        }
    }
}

fn time_window_check(payload: &AuthorizationPayload, now: UnixTimestamp) -> Result<(), VerifyError> {
    // Step 7: time window.
    if now < payload.valid_after() {
        return Err(VerifyError(ErrorReason::InvalidAuthorizationValidAfter));
    }
    if now >= payload.valid_before() {
        return Err(VerifyError(ErrorReason::InvalidAuthorizationValidBefore));
    }
    if let AuthorizationPayload::WitnessSpend(auth) = payload {
        if now.seconds_since_epoch() > auth.deadline.seconds_since_epoch() {
            return Err(VerifyError(ErrorReason::InvalidAuthorizationValidBefore));
        }
    }
    Ok(())
}

impl<'a> Context<'a> {
    pub fn new(
        registry: &'a TokenRegistry,
        replay_store: &'a dyn ReplayStore,
        ledger: &'a dyn LedgerRead,
        operating_mode: OperatingMode,
        splitter_address: Option<Address>,
        facilitator_address: Address,
        now: UnixTimestamp,
    ) -> Self {
        Context { registry, replay_store, ledger, operating_mode, splitter_address, facilitator_address, now }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::provider::anyhow_compat;
    use crate::registry::token::TokenRecord;
    use crate::replay_store::InMemoryReplayStore;
    use crate::types::{DirectAuthAuthorization, EvmSignature, HexEncodedNonce};
    use crate::util::money::BoundedAmount;
    use alloy_signer::SignerSync;
    use alloy_signer_local::PrivateKeySigner;
    use async_trait::async_trait;
    use url::Url;

    struct FakeLedger {
        balance: U256,
        allowance: U256,
    }

    #[async_trait]
    impl LedgerRead for FakeLedger {
        async fn balance_of(&self, _chain_id: u64, _token: Address, _owner: Address) -> anyhow_compat::Result<U256> {
            Ok(self.balance)
        }
        async fn allowance(&self, _chain_id: u64, _token: Address, _owner: Address, _spender: Address) -> anyhow_compat::Result<U256> {
            Ok(self.allowance)
        }
    }

    fn usdc() -> Address {
        "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913".parse().unwrap()
    }

    fn registry_with_usdc() -> TokenRegistry {
        let reg = TokenRegistry::new();
        reg.upsert(TokenRecord {
            address: usdc(),
            symbol: "USDC",
            decimals: 6,
            fee_bps: 10,
            fee_exempt: false,
            discount_bps: None,
        });
        reg
    }

    fn direct_auth_requirements(pay_to: Address, max_amount: &str) -> PaymentRequirements {
        PaymentRequirements {
            scheme: Scheme::Exact,
            network: "base".into(),
            max_amount_required: BoundedAmount::parse_nonzero(max_amount).unwrap(),
            resource: Url::parse("https://example.com/resource").unwrap(),
            description: String::new(),
            mime_type: String::new(),
            output_schema: None,
            pay_to: crate::types::MixedAddress(pay_to.to_string()),
            max_timeout_seconds: None,
            asset: usdc(),
            extra: None,
        }
    }

    fn signed_direct_auth(signer: &PrivateKeySigner, to: Address, value: &str) -> DirectAuthAuthorization {
        use crate::chain::contracts::TransferWithAuthorization;
        use alloy_sol_types::{eip712_domain, SolStruct};

        let mut auth = DirectAuthAuthorization {
            from: signer.address(),
            to,
            value: BoundedAmount::parse_nonzero(value).unwrap(),
            valid_after: UnixTimestamp(0),
            valid_before: UnixTimestamp(9_999_999_999),
            nonce: HexEncodedNonce([9u8; 32]),
            signature: EvmSignature([0u8; 65]),
        };
        let domain = eip712_domain! {
            name: "USD Coin",
            version: "2",
            chain_id: 8453u64,
            verifying_contract: usdc(),
        };
        let typed = TransferWithAuthorization {
            from: auth.from,
            to: auth.to,
            value: auth.value.as_u256(),
            validAfter: auth.valid_after.into(),
            validBefore: auth.valid_before.into(),
            nonce: alloy_primitives::B256::from(auth.nonce.0),
        };
        let hash = typed.eip712_signing_hash(&domain);
        let sig = signer.sign_hash_sync(&hash).unwrap();
        auth.signature = EvmSignature(sig.as_bytes());
        auth
    }

    #[tokio::test]
    async fn verify_accepts_well_formed_direct_auth_with_sufficient_funds() {
        let signer = PrivateKeySigner::random();
        let requirements = direct_auth_requirements(Address::repeat_byte(0xCA), "1000000");
        let auth = signed_direct_auth(&signer, Address::repeat_byte(0xCA), "1000000");
        let raw = RawPaymentPayload { x402_version: None, scheme: None, network: None, payload: serde_json::to_value(&auth).unwrap() };

        let registry = registry_with_usdc();
        let replay_store = InMemoryReplayStore::new();
        let ledger = FakeLedger { balance: U256::from(2_000_000u64), allowance: U256::ZERO };
        let ctx = Context::new(
            &registry,
            &replay_store,
            &ledger,
            OperatingMode::Direct,
            None,
            Address::repeat_byte(0xFA),
            UnixTimestamp(1000),
        );

        let outcome = verify(&raw, &requirements, ctx).await.unwrap();
        assert_eq!(outcome.payer, signer.address());
    }

    #[tokio::test]
    async fn verify_rejects_insufficient_balance() {
        let signer = PrivateKeySigner::random();
        let requirements = direct_auth_requirements(Address::repeat_byte(0xCA), "1000000");
        let auth = signed_direct_auth(&signer, Address::repeat_byte(0xCA), "1000000");
        let raw = RawPaymentPayload { x402_version: None, scheme: None, network: None, payload: serde_json::to_value(&auth).unwrap() };

        let registry = registry_with_usdc();
        let replay_store = InMemoryReplayStore::new();
        let ledger = FakeLedger { balance: U256::from(1u64), allowance: U256::ZERO };
        let ctx = Context::new(
            &registry,
            &replay_store,
            &ledger,
            OperatingMode::Direct,
            None,
            Address::repeat_byte(0xFA),
            UnixTimestamp(1000),
        );

        let err = verify(&raw, &requirements, ctx).await.unwrap_err();
        assert_eq!(err.reason_code(), ErrorReason::InsufficientFunds);
    }

    #[tokio::test]
    async fn verify_rejects_already_used_nonce() {
        let signer = PrivateKeySigner::random();
        let requirements = direct_auth_requirements(Address::repeat_byte(0xCA), "1000000");
        let auth = signed_direct_auth(&signer, Address::repeat_byte(0xCA), "1000000");
        let raw = RawPaymentPayload { x402_version: None, scheme: None, network: None, payload: serde_json::to_value(&auth).unwrap() };

        let registry = registry_with_usdc();
        let replay_store = InMemoryReplayStore::new();
        replay_store.mark_used(signer.address(), &auth.nonce.0, usdc(), "0xabc").await.unwrap();
        let ledger = FakeLedger { balance: U256::from(2_000_000u64), allowance: U256::ZERO };
        let ctx = Context::new(
            &registry,
            &replay_store,
            &ledger,
            OperatingMode::Direct,
            None,
            Address::repeat_byte(0xFA),
            UnixTimestamp(1000),
        );

        let err = verify(&raw, &requirements, ctx).await.unwrap_err();
        assert_eq!(err.reason_code(), ErrorReason::NonceAlreadyUsed);
    }

    #[test]
    fn accepted_spender_follows_operating_mode() {
        let facilitator = Address::repeat_byte(0xFA);
        let splitter = Address::repeat_byte(0x5B);
        assert_eq!(accepted_spender(OperatingMode::Direct, Some(splitter), facilitator), Some(facilitator));
        assert_eq!(accepted_spender(OperatingMode::SplitterProxy, Some(splitter), facilitator), Some(splitter));
        assert_eq!(accepted_spender(OperatingMode::SplitterProxy, None, facilitator), None);
    }
}
