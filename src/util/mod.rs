pub mod money;
pub mod redact;

pub use money::BoundedAmount;
pub use redact::Redacted;
