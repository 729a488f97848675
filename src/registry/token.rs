//! Fee / token registry (§4.7): resolves `address -> fee policy`
//! deterministically and provides curated token metadata. Grounded on the
//! teacher's `known.rs` curated-static-list idiom, with a `DashMap` overlay
//! for the admin-mutable path (§3 "optionally mutable by an admin path").

use crate::util::money::{net_and_fee, BoundedAmount, FeeBps, MAX_FEE_BPS};
use alloy_primitives::Address;
use dashmap::DashMap;
use once_cell::sync::Lazy;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenRecord {
    pub address: Address,
    pub symbol: &'static str,
    pub decimals: u8,
    pub fee_bps: u16,
    pub fee_exempt: bool,
    pub discount_bps: Option<u16>,
}

/// Seed list: Base mainnet/testnet USDC, matching the teacher's
/// `USDC_BASE`/`USDC_BASE_SEPOLIA` deployments (`network.rs`).
static SEED_TOKENS: Lazy<Vec<TokenRecord>> = Lazy::new(|| {
    vec![
        TokenRecord {
            address: "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913".parse().unwrap(),
            symbol: "USDC",
            decimals: 6,
            fee_bps: 10,
            fee_exempt: false,
            discount_bps: None,
        },
        TokenRecord {
            address: "0x036CbD53842c5426634e7929541eC2318f3dCF7e".parse().unwrap_or_default(),
            symbol: "USDC-sepolia",
            decimals: 6,
            fee_bps: 10,
            fee_exempt: false,
            discount_bps: None,
        },
    ]
});

/// Read-mostly registry: the seed list is process-static; admin mutations
/// land in the overlay map and take precedence (§5 "read-mostly; admin
/// mutations are rare and need no synchronization beyond what the backing
/// container provides" -- `DashMap` is that container).
pub struct TokenRegistry {
    overlay: DashMap<Address, TokenRecord>,
}

impl TokenRegistry {
    pub fn new() -> Self {
        TokenRegistry {
            overlay: DashMap::new(),
        }
    }

    pub fn by_address(&self, addr: Address) -> Option<TokenRecord> {
        if let Some(entry) = self.overlay.get(&addr) {
            return Some(entry.clone());
        }
        SEED_TOKENS.iter().find(|t| t.address == addr).cloned()
    }

    pub fn by_symbol(&self, symbol: &str) -> Option<TokenRecord> {
        for entry in self.overlay.iter() {
            if entry.symbol.eq_ignore_ascii_case(symbol) {
                return Some(entry.clone());
            }
        }
        SEED_TOKENS
            .iter()
            .find(|t| t.symbol.eq_ignore_ascii_case(symbol))
            .cloned()
    }

    /// `Some(0)` when fee-exempt, `Some(bps)` otherwise, `None` for an
    /// unknown token -- the Rust analogue of the spec's `-1` sentinel;
    /// callers MUST reject a `None`.
    pub fn fee_bps(&self, addr: Address) -> Option<u16> {
        self.by_address(addr).map(|t| if t.fee_exempt { 0 } else { t.fee_bps.min(MAX_FEE_BPS) })
    }

    pub fn is_whitelisted(&self, addr: Address) -> bool {
        self.by_address(addr).is_some()
    }

    /// Admin path: insert or replace a token record.
    pub fn upsert(&self, record: TokenRecord) {
        self.overlay.insert(record.address, record);
    }

    pub fn net_and_fee_for(&self, addr: Address, amount: BoundedAmount) -> Option<(BoundedAmount, BoundedAmount)> {
        let bps = self.fee_bps(addr)?;
        Some(net_and_fee(amount, FeeBps(bps)))
    }

    /// All known tokens, seed list first then overlay additions (§6 `/supported`).
    pub fn known_tokens(&self) -> Vec<TokenRecord> {
        let mut tokens: Vec<TokenRecord> = SEED_TOKENS.clone();
        for entry in self.overlay.iter() {
            if !tokens.iter().any(|t| t.address == entry.address) {
                tokens.push(entry.clone());
            }
        }
        tokens
    }
}

impl Default for TokenRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usdc() -> Address {
        "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913".parse().unwrap()
    }

    #[test]
    fn resolves_seeded_token() {
        let reg = TokenRegistry::new();
        let record = reg.by_address(usdc()).unwrap();
        assert_eq!(record.symbol, "USDC");
        assert_eq!(reg.fee_bps(usdc()), Some(10));
    }

    #[test]
    fn unknown_token_is_none() {
        let reg = TokenRegistry::new();
        let unknown: Address = "0x0000000000000000000000000000000000dEaD".parse().unwrap();
        assert_eq!(reg.fee_bps(unknown), None);
        assert!(!reg.is_whitelisted(unknown));
    }

    #[test]
    fn fee_exempt_overlay_zeroes_effective_bps() {
        let reg = TokenRegistry::new();
        reg.upsert(TokenRecord {
            address: usdc(),
            symbol: "USDC",
            decimals: 6,
            fee_bps: 25,
            fee_exempt: true,
            discount_bps: None,
        });
        assert_eq!(reg.fee_bps(usdc()), Some(0));
    }
}
