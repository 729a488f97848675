//! Discovery catalog (§6 `GET /discovery/resources`): a registry of priced
//! endpoints this facilitator's operator advertises, independent of any
//! single verify/settle call. Grounded on the resource/pagination shape in
//! `examples/coinbase-x402/rust/src/types.rs`'s `DiscoveryResponse`, adapted
//! from a client-side deserialization target to a server-side registry.

use crate::types::PaymentRequirements;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, Serialize)]
pub struct DiscoveryResource {
    pub resource: String,
    pub r#type: String,
    #[serde(rename = "x402Version")]
    pub x402_version: u8,
    pub accepts: Vec<PaymentRequirements>,
    #[serde(rename = "lastUpdated")]
    pub last_updated: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PaginationInfo {
    pub limit: u32,
    pub offset: u32,
    pub total: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct DiscoveryResponse {
    #[serde(rename = "x402Version")]
    pub x402_version: u8,
    pub items: Vec<DiscoveryResource>,
    pub pagination: PaginationInfo,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DiscoveryFilters {
    pub resource_type: Option<&'static str>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

/// Read-mostly catalog of advertised resources, keyed by resource URL.
/// Populated out-of-band (an admin path or a config file this crate doesn't
/// itself define), matching the token registry's overlay idiom.
#[derive(Default)]
pub struct DiscoveryCatalog {
    inner: DashMap<String, DiscoveryResource>,
}

impl DiscoveryCatalog {
    pub fn new() -> Self {
        DiscoveryCatalog { inner: DashMap::new() }
    }

    pub fn publish(&self, resource: DiscoveryResource) {
        self.inner.insert(resource.resource.clone(), resource);
    }

    pub fn unpublish(&self, resource: &str) -> bool {
        self.inner.remove(resource).is_some()
    }

    pub fn list(self: &Arc<Self>, filters: DiscoveryFilters) -> DiscoveryResponse {
        let mut items: Vec<DiscoveryResource> = self
            .inner
            .iter()
            .filter(|e| filters.resource_type.is_none_or(|t| e.r#type == t))
            .map(|e| e.clone())
            .collect();
        items.sort_by(|a, b| a.resource.cmp(&b.resource));
        let total = items.len() as u32;
        let offset = filters.offset.unwrap_or(0);
        let limit = filters.limit.unwrap_or(100);
        let page: Vec<DiscoveryResource> = items.into_iter().skip(offset as usize).take(limit as usize).collect();
        DiscoveryResponse { x402_version: 2, items: page, pagination: PaginationInfo { limit, offset, total } }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MixedAddress, Scheme};
    use alloy_primitives::Address;
    use url::Url;

    fn sample(resource: &str) -> DiscoveryResource {
        DiscoveryResource {
            resource: resource.into(),
            r#type: "http".into(),
            x402_version: 2,
            accepts: vec![PaymentRequirements {
                scheme: Scheme::Exact,
                network: "base".into(),
                max_amount_required: crate::util::money::BoundedAmount::parse_nonzero("1000000").unwrap(),
                resource: Url::parse(resource).unwrap(),
                description: String::new(),
                mime_type: String::new(),
                output_schema: None,
                pay_to: MixedAddress(Address::repeat_byte(0xAB).to_string()),
                max_timeout_seconds: None,
                asset: Address::repeat_byte(0xCD),
                extra: None,
            }],
            last_updated: 0,
        }
    }

    #[test]
    fn publish_list_unpublish_round_trip() {
        let catalog = Arc::new(DiscoveryCatalog::new());
        catalog.publish(sample("https://example.com/a"));
        catalog.publish(sample("https://example.com/b"));

        let response = catalog.list(DiscoveryFilters::default());
        assert_eq!(response.pagination.total, 2);
        assert_eq!(response.items.len(), 2);

        assert!(catalog.unpublish("https://example.com/a"));
        let response = catalog.list(DiscoveryFilters::default());
        assert_eq!(response.pagination.total, 1);
    }

    #[test]
    fn filters_by_type_and_paginates() {
        let catalog = Arc::new(DiscoveryCatalog::new());
        catalog.publish(sample("https://example.com/a"));
        catalog.publish(sample("https://example.com/b"));

        let response = catalog.list(DiscoveryFilters { resource_type: Some("api"), limit: None, offset: None });
        assert_eq!(response.pagination.total, 0);

        let response = catalog.list(DiscoveryFilters { resource_type: Some("http"), limit: Some(1), offset: Some(1) });
        assert_eq!(response.pagination.total, 2);
        assert_eq!(response.items.len(), 1);
        assert_eq!(response.items[0].resource, "https://example.com/b");
    }
}
