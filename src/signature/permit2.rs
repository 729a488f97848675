//! Witness-spend (Permit2-style) signer recovery (§4.2). Grounded on
//! `examples/x402-rs-x402-rs/crates/chains/x402-chain-eip155/src/v2_eip155_exact/facilitator/permit2.rs`,
//! but completed: the teacher's own `verify_permit2_payment` is an
//! unfinished `todo!()` stub. The EIP-712 hash + recovery pattern here
//! mirrors the working `eip3009.rs` sibling in that same tree.

use super::SignatureError;
use crate::chain::contracts::{PermitWitnessTransferFrom, TokenPermissions, X402TransferDetails, PERMIT2_ADDRESS};
use crate::types::WitnessSpendAuthorization;
use alloy_primitives::{Address, Signature};
use alloy_sol_types::{eip712_domain, SolStruct};

/// Recovers the payer's address from a witness-spend authorization's
/// signature, over the Permit2 domain `{name: "Permit2", chainId,
/// verifyingContract: PERMIT2_ADDRESS}` (§4.2).
pub fn recover_signer(auth: &WitnessSpendAuthorization, chain_id: u64) -> Result<Address, SignatureError> {
    let domain = eip712_domain! {
        name: "Permit2",
        chain_id: chain_id,
        verifying_contract: PERMIT2_ADDRESS,
    };

    let typed = PermitWitnessTransferFrom {
        permitted: TokenPermissions {
            token: auth.permitted.token,
            amount: auth.permitted.amount.as_u256(),
        },
        spender: auth.spender,
        nonce: auth.nonce.as_u256(),
        deadline: auth.deadline.into(),
        witness: X402TransferDetails {
            receiver: auth.witness.receiver,
            validAfter: auth.witness.valid_after.into(),
            validBefore: auth.witness.valid_before.into(),
        },
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
    use crate::types::{TokenPermissions as WireTokenPermissions, Witness};
    use crate::util::money::BoundedAmount;
    use alloy_signer::SignerSync;
    use alloy_signer_local::PrivateKeySigner;

    #[test]
    fn recovers_the_actual_signer() {
        let signer = PrivateKeySigner::random();
        let expected = signer.address();

        let token: Address = "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913".parse().unwrap();
        let spender: Address = "0x0000000000000000000000000000000000beef".parse().unwrap();
        let receiver: Address = "0x0000000000000000000000000000000000cafe".parse().unwrap();

        let mut auth = WitnessSpendAuthorization {
            permitted: WireTokenPermissions {
                token,
                amount: BoundedAmount::parse_nonzero("1000000").unwrap(),
            },
            spender,
            nonce: BoundedAmount::parse_nonzero("1").unwrap(),
            deadline: UnixTimestamp(9_999_999_999),
            witness: Witness {
                receiver,
                valid_after: UnixTimestamp(0),
                valid_before: UnixTimestamp(9_999_999_999),
            },
            signature: crate::types::EvmSignature([0u8; 65]),
        };

        let domain = eip712_domain! {
            name: "Permit2",
            chain_id: 8453u64,
            verifying_contract: PERMIT2_ADDRESS,
        };
        let typed = PermitWitnessTransferFrom {
            permitted: TokenPermissions {
                token: auth.permitted.token,
                amount: auth.permitted.amount.as_u256(),
            },
            spender: auth.spender,
            nonce: auth.nonce.as_u256(),
            deadline: auth.deadline.into(),
            witness: X402TransferDetails {
                receiver: auth.witness.receiver,
                validAfter: auth.witness.valid_after.into(),
                validBefore: auth.witness.valid_before.into(),
            },
        };
        let hash = typed.eip712_signing_hash(&domain);
        let sig = signer.sign_hash_sync(&hash).unwrap();
        auth.signature = crate::types::EvmSignature(sig.as_bytes());

        let recovered = recover_signer(&auth, 8453).unwrap();
        assert_eq!(recovered, expected);
    }
}
