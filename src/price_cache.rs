//! Price cache (§4.8): non-authoritative USD<->token conversion quotes.
//! Deliberately unreachable from any settlement-math path (SPEC_FULL.md §9
//! "pricing vs. settlement isolation") -- nothing in `settlement.rs` or
//! `verifier.rs` imports this module.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

const REFRESH_INTERVAL: Duration = Duration::from_secs(5 * 60);
/// Hardcoded fallback for a token with no prior quote at all.
const FALLBACK_USD_PRICE: f64 = 0.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PriceSource {
    Live,
    Stale,
    Fallback,
}

#[derive(Debug, Clone, Copy)]
pub struct PriceQuote {
    pub usd_price: f64,
    pub source: PriceSource,
    pub as_of: Instant,
}

/// A pluggable upstream price source (an exchange-rate API, a DEX oracle,
/// ...). Kept abstract since the spec treats the oracle as an external
/// collaborator (§1 "Out of scope").
#[async_trait::async_trait]
pub trait PriceSourceClient: Send + Sync {
    async fn fetch_usd_price(&self, symbol: &str) -> Option<f64>;
}

/// Thin `reqwest` client against a Coinbase-style exchange-rate endpoint
/// (`GET {base_url}/{symbol}` -> `{"usd": <price>}`). Swappable: any other
/// upstream need only implement [`PriceSourceClient`].
pub struct HttpPriceSourceClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpPriceSourceClient {
    pub fn new(base_url: String) -> Self {
        HttpPriceSourceClient { http: reqwest::Client::new(), base_url }
    }
}

#[derive(serde::Deserialize)]
struct ExchangeRateResponse {
    usd: f64,
}

#[async_trait::async_trait]
impl PriceSourceClient for HttpPriceSourceClient {
    async fn fetch_usd_price(&self, symbol: &str) -> Option<f64> {
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), symbol);
        let response = self.http.get(url).send().await.ok()?;
        response.json::<ExchangeRateResponse>().await.ok().map(|r| r.usd)
    }
}

pub struct PriceCache {
    quotes: Arc<DashMap<String, PriceQuote>>,
    client: Arc<dyn PriceSourceClient>,
    stablecoins: Vec<String>,
}

impl PriceCache {
    pub fn new(client: Arc<dyn PriceSourceClient>, stablecoins: Vec<String>) -> Self {
        PriceCache {
            quotes: Arc::new(DashMap::new()),
            client,
            stablecoins,
        }
    }

    /// Stablecoins are hardcoded to $1 and never refreshed (§4.8).
    fn is_stablecoin(&self, symbol: &str) -> bool {
        self.stablecoins.iter().any(|s| s.eq_ignore_ascii_case(symbol))
    }

    /// Returns a quote, or `None` if no price has ever been obtained for
    /// this symbol and it isn't a stablecoin (§4.8 "Conversion routines
    /// return `null` when no price exists").
    pub fn quote(&self, symbol: &str) -> Option<PriceQuote> {
        if self.is_stablecoin(symbol) {
            return Some(PriceQuote { usd_price: 1.0, source: PriceSource::Live, as_of: Instant::now() });
        }
        self.quotes.get(symbol).map(|q| *q)
    }

    /// Refreshes one symbol; on failure, retains the prior value but reports
    /// it as `Stale` rather than dropping it (§4.8).
    pub async fn refresh(&self, symbol: &str) {
        if self.is_stablecoin(symbol) {
            return;
        }
        match self.client.fetch_usd_price(symbol).await {
            Some(price) => {
                self.quotes.insert(
                    symbol.to_string(),
                    PriceQuote { usd_price: price, source: PriceSource::Live, as_of: Instant::now() },
                );
            }
            None => {
                let fallback = self.quotes.get(symbol).map(|q| q.usd_price).unwrap_or(FALLBACK_USD_PRICE);
                self.quotes.insert(
                    symbol.to_string(),
                    PriceQuote { usd_price: fallback, source: PriceSource::Stale, as_of: Instant::now() },
                );
            }
        }
    }

    /// Spawns the background refresh loop (§4.8 "refreshed on a fixed
    /// interval (~5 min)"). Detached from any single request's lifetime.
    pub fn spawn_refresh_loop(self: Arc<Self>, symbols: Vec<String>) {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(REFRESH_INTERVAL);
            loop {
                interval.tick().await;
                for symbol in &symbols {
                    self.refresh(symbol).await;
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedClient(Option<f64>);

    #[async_trait::async_trait]
    impl PriceSourceClient for FixedClient {
        async fn fetch_usd_price(&self, _symbol: &str) -> Option<f64> {
            self.0
        }
    }

    #[tokio::test]
    async fn stablecoins_are_hardcoded_to_one_dollar() {
        let cache = PriceCache::new(Arc::new(FixedClient(Some(0.5))), vec!["USDC".into()]);
        let quote = cache.quote("USDC").unwrap();
        assert_eq!(quote.usd_price, 1.0);
    }

    #[tokio::test]
    async fn unknown_token_returns_none_before_first_refresh() {
        let cache = PriceCache::new(Arc::new(FixedClient(Some(2.0))), vec![]);
        assert!(cache.quote("WETH").is_none());
        cache.refresh("WETH").await;
        assert_eq!(cache.quote("WETH").unwrap().usd_price, 2.0);
    }

    #[tokio::test]
    async fn refresh_failure_retains_prior_value_as_stale() {
        let cache = PriceCache::new(Arc::new(FixedClient(Some(3.0))), vec![]);
        cache.refresh("WETH").await;
        let failing = PriceCache::new(Arc::new(FixedClient(None)), vec![]);
        failing.quotes.insert("WETH".into(), cache.quote("WETH").unwrap());
        failing.refresh("WETH").await;
        let quote = failing.quote("WETH").unwrap();
        assert_eq!(quote.usd_price, 3.0);
        assert_eq!(quote.source, PriceSource::Stale);
    }
}
