//! Direct-auth (ERC-3009 `transferWithAuthorization`) signer recovery
//! (§4.2). Grounded on
//! `examples/x402-rs-x402-rs/crates/chains/x402-chain-eip155/src/v2_eip155_exact/facilitator/eip3009.rs`
//! and `examples/x402-rs-x402-rs/src/facilitator_local.rs` (`assert_domain`,
//! `assert_signature`).

use super::SignatureError;
use crate::chain::contracts::TransferWithAuthorization;
use crate::types::DirectAuthAuthorization;
use alloy_primitives::{Address, Signature, B256};
use alloy_sol_types::{eip712_domain, SolStruct};

/// Token-specific EIP-712 domain metadata. Most ERC-3009 tokens deviate from
/// their on-chain `name()` for EIP-712 purposes (e.g. USDC's domain name is
/// "USD Coin", not "USDC"), so this is resolved from a curated table keyed
/// by token address, with an on-chain `name()`/`version()` fallback for
/// unlisted tokens (mirrors the teacher's `assert_domain` fallback).
pub struct TokenDomain {
    pub name: &'static str,
    pub version: &'static str,
}

pub fn domain_for_token(token: Address) -> Option<TokenDomain> {
    let usdc: Address = "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913".parse().unwrap();
    if token == usdc {
        return Some(TokenDomain { name: "USD Coin", version: "2" });
    }
    None
}

/// Recovers the signer's address from a direct-auth authorization's
/// signature over the token's own EIP-712 domain.
pub fn recover_signer(
    auth: &DirectAuthAuthorization,
    chain_id: u64,
    token: Address,
    domain_name: &str,
    domain_version: &str,
) -> Result<Address, SignatureError> {
    let domain = eip712_domain! {
        name: domain_name,
        version: domain_version,
        chain_id: chain_id,
        verifying_contract: token,
    };

    let typed = TransferWithAuthorization {
        from: auth.from,
        to: auth.to,
        value: auth.value.as_u256(),
        validAfter: auth.valid_after.into(),
        validBefore: auth.valid_before.into(),
        nonce: B256::from(auth.nonce.0),
    };

    let signing_hash = typed.eip712_signing_hash(&domain);

    let signature = Signature::from_raw(&auth.signature.0).map_err(|_| SignatureError::Malformed)?;
    signature
        .recover_address_from_prehash(&signing_hash)
        .map_err(|_| SignatureError::RecoveryFailed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timestamp::UnixTimestamp;
    use crate::types::HexEncodedNonce;
    use crate::util::money::BoundedAmount;
    use alloy_signer::SignerSync;
    use alloy_signer_local::PrivateKeySigner;

    #[test]
    fn recovers_the_actual_signer() {
        let signer = PrivateKeySigner::random();
        let expected = signer.address();
        let token: Address = "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913".parse().unwrap();
        let to: Address = "0x0000000000000000000000000000000000cafe".parse().unwrap();

        let mut auth = DirectAuthAuthorization {
            from: expected,
            to,
            value: BoundedAmount::parse_nonzero("1000000").unwrap(),
            valid_after: UnixTimestamp(0),
            valid_before: UnixTimestamp(9_999_999_999),
            nonce: HexEncodedNonce([7u8; 32]),
            signature: crate::types::EvmSignature([0u8; 65]),
        };

        let domain = eip712_domain! {
            name: "USD Coin",
            version: "2",
            chain_id: 8453u64,
            verifying_contract: token,
        };
        let typed = TransferWithAuthorization {
            from: auth.from,
            to: auth.to,
            value: auth.value.as_u256(),
            validAfter: auth.valid_after.into(),
            validBefore: auth.valid_before.into(),
            nonce: B256::from(auth.nonce.0),
        };
        let hash = typed.eip712_signing_hash(&domain);
        let sig = signer.sign_hash_sync(&hash).unwrap();
        auth.signature = crate::types::EvmSignature(sig.as_bytes());

        let recovered = recover_signer(&auth, 8453, token, "USD Coin", "2").unwrap();
        assert_eq!(recovered, expected);
    }

    #[test]
    fn wrong_declared_from_fails_address_match() {
        let signer = PrivateKeySigner::random();
        let wrong_from: Address = "0x0000000000000000000000000000000000dead".parse().unwrap();
        let token: Address = "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913".parse().unwrap();
        let to: Address = "0x0000000000000000000000000000000000cafe".parse().unwrap();

        let mut auth = DirectAuthAuthorization {
            from: wrong_from,
            to,
            value: BoundedAmount::parse_nonzero("1000000").unwrap(),
            valid_after: UnixTimestamp(0),
            valid_before: UnixTimestamp(9_999_999_999),
            nonce: HexEncodedNonce([7u8; 32]),
            signature: crate::types::EvmSignature([0u8; 65]),
        };
        let domain = eip712_domain! {
            name: "USD Coin",
            version: "2",
            chain_id: 8453u64,
            verifying_contract: token,
        };
        let typed = TransferWithAuthorization {
            from: auth.from,
            to: auth.to,
            value: auth.value.as_u256(),
            validAfter: auth.valid_after.into(),
            validBefore: auth.valid_before.into(),
            nonce: B256::from(auth.nonce.0),
        };
        let hash = typed.eip712_signing_hash(&domain);
        let sig = signer.sign_hash_sync(&hash).unwrap();
        auth.signature = crate::types::EvmSignature(sig.as_bytes());

        let recovered = recover_signer(&auth, 8453, token, "USD Coin", "2").unwrap();
        assert_ne!(recovered, auth.from, "signer must not equal the (wrong) declared from");
    }
}
