pub mod eip3009;
pub mod permit2;

#[derive(Debug, thiserror::Error)]
pub enum SignatureError {
    #[error("malformed signature bytes")]
    Malformed,
    #[error("signature does not recover to a valid address")]
    RecoveryFailed,
}
