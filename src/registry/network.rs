//! Known EVM networks, identified by CAIP-2 `namespace:reference` (§GLOSSARY).
//! Trimmed from the teacher's multi-chain `known.rs` to the EVM networks this
//! facilitator supports; the curated-list + `Lazy<HashMap>` lookup idiom is
//! kept verbatim.

use once_cell::sync::Lazy;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkInfo {
    pub name: &'static str,
    pub chain_id: u64,
}

static KNOWN_NETWORKS: &[NetworkInfo] = &[
    NetworkInfo { name: "base", chain_id: 8453 },
    NetworkInfo { name: "base-sepolia", chain_id: 84532 },
    NetworkInfo { name: "eip155:8453", chain_id: 8453 },
    NetworkInfo { name: "eip155:84532", chain_id: 84532 },
    NetworkInfo { name: "polygon", chain_id: 137 },
    NetworkInfo { name: "avalanche", chain_id: 43114 },
];

static NAME_TO_CHAIN_ID: Lazy<HashMap<&'static str, u64>> =
    Lazy::new(|| KNOWN_NETWORKS.iter().map(|n| (n.name, n.chain_id)).collect());

/// Resolves a CAIP-2 id or a vendor alias (§3 "network (CAIP-2 or vendor
/// alias)") to a numeric EVM chain id. Returns `None` for unknown networks,
/// which the verifier turns into `invalid_network`.
pub fn chain_id_for_network(network: &str) -> Option<u64> {
    NAME_TO_CHAIN_ID.get(network).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_known_aliases() {
        assert_eq!(chain_id_for_network("base"), Some(8453));
        assert_eq!(chain_id_for_network("eip155:8453"), Some(8453));
        assert_eq!(chain_id_for_network("unknown-network"), None);
    }
}
