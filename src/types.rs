//! Wire types: newtypes with regex-validated custom (de)serialization, the
//! sum-typed [`AuthorizationPayload`] (SPEC_FULL.md §9 "sum-typed payload"
//! redesign flag), payment requirements, and the verify/settle request and
//! response shapes.

use crate::error::ErrorReason;
use crate::timestamp::UnixTimestamp;
use crate::util::money::BoundedAmount;
use alloy_primitives::{Address, U256};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use url::Url;

static HEX_SIGNATURE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^0x[0-9a-fA-F]{130}$").unwrap());
static HEX_32: Lazy<Regex> = Lazy::new(|| Regex::new(r"^0x[0-9a-fA-F]{64}$").unwrap());
static MIXED_ADDRESS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(0x[a-fA-F0-9]{40}|[A-Za-z0-9][A-Za-z0-9-]{0,34}[A-Za-z0-9])$").unwrap());

/// Accepted protocol versions (§6 "Accepted versions: 1 and 2").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct X402Version(pub u8);

impl X402Version {
    pub fn is_accepted(self) -> bool {
        self.0 == 1 || self.0 == 2
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    Exact,
}

/// A 65-byte ECDSA signature, `0x` + 130 hex chars.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvmSignature(pub [u8; 65]);

impl Serialize for EvmSignature {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format!("0x{}", hex::encode(self.0)))
    }
}

impl<'de> Deserialize<'de> for EvmSignature {
    fn deserialize<D>(d: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(d)?;
        if !HEX_SIGNATURE.is_match(&s) {
            return Err(serde::de::Error::custom("signature must be 0x + 130 hex chars"));
        }
        let bytes = hex::decode(&s[2..]).map_err(serde::de::Error::custom)?;
        let mut out = [0u8; 65];
        out.copy_from_slice(&bytes);
        Ok(EvmSignature(out))
    }
}

/// A 32-byte opaque nonce tag used by the direct-auth protocol, `0x` + 64 hex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HexEncodedNonce(pub [u8; 32]);

impl Serialize for HexEncodedNonce {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format!("0x{}", hex::encode(self.0)))
    }
}

impl<'de> Deserialize<'de> for HexEncodedNonce {
    fn deserialize<D>(d: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(d)?;
        if !HEX_32.is_match(&s) {
            return Err(serde::de::Error::custom("nonce must be 0x + 64 hex chars"));
        }
        let bytes = hex::decode(&s[2..]).map_err(serde::de::Error::custom)?;
        let mut out = [0u8; 32];
        out.copy_from_slice(&bytes);
        Ok(HexEncodedNonce(out))
    }
}

impl From<HexEncodedNonce> for U256 {
    fn from(value: HexEncodedNonce) -> Self {
        U256::from_be_bytes(value.0)
    }
}

/// A transaction hash, `0x` + 64 hex.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionHash(pub [u8; 32]);

impl fmt::Display for TransactionHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl Serialize for TransactionHash {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for TransactionHash {
    fn deserialize<D>(d: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(d)?;
        if !HEX_32.is_match(&s) {
            return Err(serde::de::Error::custom("transaction hash must be 0x + 64 hex chars"));
        }
        let bytes = hex::decode(&s[2..]).map_err(serde::de::Error::custom)?;
        let mut out = [0u8; 32];
        out.copy_from_slice(&bytes);
        Ok(TransactionHash(out))
    }
}

/// An address that may be an EVM hex address or a vendor-specific alias.
/// Most of this codebase works with resolved EVM [`Address`]es; this newtype
/// exists at the HTTP boundary where `payTo`/`extra.actualRecipient` may
/// arrive in either shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MixedAddress(pub String);

impl<'de> Deserialize<'de> for MixedAddress {
    fn deserialize<D>(d: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(d)?;
        if !MIXED_ADDRESS.is_match(&s) {
            return Err(serde::de::Error::custom("not a recognizable address"));
        }
        Ok(MixedAddress(s))
    }
}

impl MixedAddress {
    pub fn as_evm_address(&self) -> Option<Address> {
        self.0.parse().ok()
    }
}

impl From<Address> for MixedAddress {
    fn from(value: Address) -> Self {
        MixedAddress(value.to_string())
    }
}

/// Case-insensitively compares two address-like strings, per §4.1 step 8
/// ("the signed receiver ... must equal `requirements.payTo` (case-insensitive)").
pub fn addresses_equal(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

// --- Authorization payload (sum type) -------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenPermissions {
    pub token: Address,
    pub amount: BoundedAmount,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Witness {
    pub receiver: Address,
    #[serde(rename = "validAfter")]
    pub valid_after: UnixTimestamp,
    #[serde(rename = "validBefore")]
    pub valid_before: UnixTimestamp,
}

/// A Permit2-style witness-spend authorization (§3, §4.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WitnessSpendAuthorization {
    pub permitted: TokenPermissions,
    pub spender: Address,
    /// A Permit2 nonce is a `uint256`, encoded as a decimal string on the
    /// wire (unlike the direct-auth protocol's 32-byte opaque nonce tag).
    pub nonce: BoundedAmount,
    pub deadline: UnixTimestamp,
    pub witness: Witness,
    pub signature: EvmSignature,
}

/// An ERC-3009-style direct authorization (§3, §4.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectAuthAuthorization {
    pub from: Address,
    pub to: Address,
    pub value: BoundedAmount,
    #[serde(rename = "validAfter")]
    pub valid_after: UnixTimestamp,
    #[serde(rename = "validBefore")]
    pub valid_before: UnixTimestamp,
    pub nonce: HexEncodedNonce,
    pub signature: EvmSignature,
}

/// The two authorization variants, modeled as a tagged sum rather than an
/// ad-hoc field-presence test scattered across modules (SPEC_FULL.md §9).
/// Downstream code matches on this enum once and stays variant-specific.
#[derive(Debug, Clone)]
pub enum AuthorizationPayload {
    WitnessSpend(WitnessSpendAuthorization),
    DirectAuth(DirectAuthAuthorization),
}

impl AuthorizationPayload {
    /// Shape-detecting constructor (§4.1 step 3): `permitted` present means
    /// witness-spend; `from`/`to`/`value` present and no `permitted` means
    /// direct-auth; anything else is malformed.
    pub fn from_value(value: &serde_json::Value) -> Result<Self, ErrorReason> {
        let obj = value.as_object().ok_or(ErrorReason::InvalidPayload)?;
        if obj.contains_key("permitted") {
            let auth: WitnessSpendAuthorization =
                serde_json::from_value(value.clone()).map_err(|_| ErrorReason::InvalidPayload)?;
            Ok(AuthorizationPayload::WitnessSpend(auth))
        } else if obj.contains_key("from") && obj.contains_key("to") && obj.contains_key("value") {
            let auth: DirectAuthAuthorization =
                serde_json::from_value(value.clone()).map_err(|_| ErrorReason::InvalidPayload)?;
            Ok(AuthorizationPayload::DirectAuth(auth))
        } else {
            Err(ErrorReason::InvalidPayload)
        }
    }

    pub fn protocol_name(&self) -> &'static str {
        match self {
            AuthorizationPayload::WitnessSpend(_) => "witness-spend",
            AuthorizationPayload::DirectAuth(_) => "direct-auth",
        }
    }

    /// The claimed amount, before any verification.
    pub fn amount(&self) -> BoundedAmount {
        match self {
            AuthorizationPayload::WitnessSpend(a) => a.permitted.amount,
            AuthorizationPayload::DirectAuth(a) => a.value,
        }
    }

    /// The receiver named inside the signed authorization itself (the
    /// witness's `receiver`, or the direct-auth `to`).
    pub fn signed_receiver(&self) -> Address {
        match self {
            AuthorizationPayload::WitnessSpend(a) => a.witness.receiver,
            AuthorizationPayload::DirectAuth(a) => a.to,
        }
    }

    pub fn valid_after(&self) -> UnixTimestamp {
        match self {
            AuthorizationPayload::WitnessSpend(a) => a.witness.valid_after,
            AuthorizationPayload::DirectAuth(a) => a.valid_after,
        }
    }

    pub fn valid_before(&self) -> UnixTimestamp {
        match self {
            AuthorizationPayload::WitnessSpend(a) => a.witness.valid_before,
            AuthorizationPayload::DirectAuth(a) => a.valid_before,
        }
    }
}

// --- Payment requirements --------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRequirementsExtra {
    #[serde(default, rename = "actualRecipient")]
    pub actual_recipient: Option<MixedAddress>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRequirements {
    pub scheme: Scheme,
    pub network: String,
    #[serde(rename = "maxAmountRequired")]
    pub max_amount_required: BoundedAmount,
    pub resource: Url,
    #[serde(default)]
    pub description: String,
    #[serde(default, rename = "mimeType")]
    pub mime_type: String,
    #[serde(default, rename = "outputSchema")]
    pub output_schema: Option<serde_json::Value>,
    #[serde(rename = "payTo")]
    pub pay_to: MixedAddress,
    #[serde(default, rename = "maxTimeoutSeconds")]
    pub max_timeout_seconds: Option<u64>,
    pub asset: Address,
    #[serde(default)]
    pub extra: Option<PaymentRequirementsExtra>,
}

impl PaymentRequirements {
    pub fn actual_recipient(&self) -> Option<Address> {
        self.extra
            .as_ref()
            .and_then(|e| e.actual_recipient.as_ref())
            .and_then(|a| a.as_evm_address())
    }
}

// --- Verify / settle request & response envelopes --------------------------

/// Accepts both `payload` and `paymentPayload` (§6 "Request compatibility"),
/// and both nested and top-level `x402Version`.
#[derive(Debug, Clone, Deserialize)]
pub struct VerifyRequest {
    #[serde(default, rename = "x402Version")]
    pub x402_version: Option<X402Version>,
    #[serde(default)]
    pub payload: Option<RawPaymentPayload>,
    #[serde(default, rename = "paymentPayload")]
    pub payment_payload: Option<RawPaymentPayload>,
    #[serde(rename = "paymentRequirements")]
    pub payment_requirements: PaymentRequirements,
}

pub type SettleRequest = VerifyRequest;

impl VerifyRequest {
    pub fn take_payload(&self) -> Option<&RawPaymentPayload> {
        self.payload.as_ref().or(self.payment_payload.as_ref())
    }
}

/// The nested payload envelope, as actually signed/sent by clients. Its
/// `scheme`/`network`/`x402Version` fields are optional at this layer
/// because older clients omit them and rely on the requirements to supply
/// them (§4.1 step 2 "Normalization").
#[derive(Debug, Clone, Deserialize)]
pub struct RawPaymentPayload {
    #[serde(default, rename = "x402Version")]
    pub x402_version: Option<X402Version>,
    #[serde(default)]
    pub scheme: Option<Scheme>,
    #[serde(default)]
    pub network: Option<String>,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct VerifyResponse {
    #[serde(rename = "isValid")]
    pub is_valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "invalidReason")]
    pub invalid_reason: Option<ErrorReason>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SettleResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "ledgerTxId")]
    pub ledger_tx_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "blockNumber")]
    pub block_number: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fee: Option<String>,
    pub protocol: &'static str,
    #[serde(rename = "transactionId")]
    pub transaction_id: String,
    #[serde(skip_serializing_if = "Option::is_none", rename = "errorReason")]
    pub error_reason: Option<ErrorReason>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorReason,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_witness_spend_shape() {
        let v = serde_json::json!({
            "permitted": {"token": "0x0000000000000000000000000000000000000001", "amount": "1"},
            "spender": "0x0000000000000000000000000000000000000002",
            "nonce": "1",
            "deadline": "1",
            "witness": {"receiver": "0x0000000000000000000000000000000000000003", "validAfter": "0", "validBefore": "99999999999"},
            "signature": format!("0x{}", "11".repeat(65)),
        });
        let payload = AuthorizationPayload::from_value(&v).unwrap();
        assert_eq!(payload.protocol_name(), "witness-spend");
    }

    #[test]
    fn detects_direct_auth_shape() {
        let v = serde_json::json!({
            "from": "0x0000000000000000000000000000000000000001",
            "to": "0x0000000000000000000000000000000000000002",
            "value": "1",
            "validAfter": "0",
            "validBefore": "99999999999",
            "nonce": format!("0x{}", "22".repeat(32)),
            "signature": format!("0x{}", "11".repeat(65)),
        });
        let payload = AuthorizationPayload::from_value(&v).unwrap();
        assert_eq!(payload.protocol_name(), "direct-auth");
    }

    #[test]
    fn rejects_malformed_shape() {
        let v = serde_json::json!({"foo": "bar"});
        assert_eq!(AuthorizationPayload::from_value(&v).unwrap_err(), ErrorReason::InvalidPayload);
    }

    #[test]
    fn addresses_equal_ignores_case() {
        assert!(addresses_equal(
            "0xAbCd000000000000000000000000000000000F",
            "0xabcd000000000000000000000000000000000f"
        ));
    }
}
