//! Closed, wire-stable error taxonomy for verification and settlement.
//!
//! Internal errors (RPC failures, store outages) are reduced to the closest
//! [`ErrorReason`] before crossing the HTTP boundary; raw internal text never
//! reaches external clients.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Closed set of reason codes returned to callers. Stable over the wire:
/// never rename a variant, only add new ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorReason {
    InvalidPayload,
    InvalidPaymentRequirements,
    InvalidScheme,
    InvalidNetwork,
    InvalidX402Version,
    InvalidAuthorizationValue,
    InvalidAuthorizationValueTooLow,
    InvalidAuthorizationValidAfter,
    InvalidAuthorizationValidBefore,
    InvalidAuthorizationTypedDataMessage,
    InvalidSignature,
    InvalidSignatureAddress,
    NonceAlreadyUsed,
    OuterAllowanceRequired,
    TokenNotWhitelisted,
    InsufficientFunds,
    // Settlement-only reasons.
    TransactionReverted,
    TransactionTimeout,
    FacilitatorNotConfigured,
}

impl ErrorReason {
    /// True for reasons that may legitimately occur after a successful
    /// `verify` call races with on-chain state (funds/timing), as opposed to
    /// structural/signature/scheme reasons that `verify` should have caught.
    pub fn is_funds_or_timing(self) -> bool {
        matches!(
            self,
            ErrorReason::NonceAlreadyUsed
                | ErrorReason::OuterAllowanceRequired
                | ErrorReason::InsufficientFunds
                | ErrorReason::InvalidAuthorizationValidAfter
                | ErrorReason::InvalidAuthorizationValidBefore
                | ErrorReason::TransactionReverted
                | ErrorReason::TransactionTimeout
        )
    }

    /// HTTP status this reason maps to when surfaced directly (§6 response
    /// status conventions). Most verify/settle reasons are carried inside a
    /// 200 response body (`isValid`/`success` flags); only a few reasons get
    /// a distinct status code.
    pub fn http_status(self) -> u16 {
        match self {
            ErrorReason::OuterAllowanceRequired => 412,
            ErrorReason::FacilitatorNotConfigured => 503,
            _ => 200,
        }
    }
}

impl fmt::Display for ErrorReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Round-trip through serde_json to recover the snake_case wire name
        // rather than duplicating it in a second match arm.
        let json = serde_json::to_string(self).unwrap_or_default();
        write!(f, "{}", json.trim_matches('"'))
    }
}

/// Top-level error for facilitator-wide operations that haven't yet been
/// narrowed to a module-specific error type.
#[derive(Debug, thiserror::Error)]
pub enum FacilitatorError {
    #[error("verification failed: {0}")]
    Verify(#[from] crate::verifier::VerifyError),
    #[error("settlement failed: {0}")]
    Settlement(#[from] crate::settlement::SettlementError),
    #[error("facilitator not configured for network {0}")]
    NotConfigured(String),
}

impl FacilitatorError {
    pub fn reason_code(&self) -> ErrorReason {
        match self {
            FacilitatorError::Verify(e) => e.reason_code(),
            FacilitatorError::Settlement(e) => e.reason_code(),
            FacilitatorError::NotConfigured(_) => ErrorReason::FacilitatorNotConfigured,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_display_is_snake_case() {
        assert_eq!(ErrorReason::NonceAlreadyUsed.to_string(), "nonce_already_used");
        assert_eq!(ErrorReason::InvalidSignatureAddress.to_string(), "invalid_signature_address");
        assert_eq!(ErrorReason::OuterAllowanceRequired.to_string(), "outer_allowance_required");
    }

    #[test]
    fn allowance_required_maps_to_412() {
        assert_eq!(ErrorReason::OuterAllowanceRequired.http_status(), 412);
        assert_eq!(ErrorReason::InsufficientFunds.http_status(), 200);
    }
}
