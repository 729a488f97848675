//! x402 Facilitator HTTP entrypoint.
//!
//! This binary launches an Axum-based HTTP server that exposes the x402
//! protocol interface for payment verification and settlement via
//! Ethereum-compatible networks, plus the ambient operator surface (audit
//! log, webhooks, discovery catalog) around it.
//!
//! Endpoints:
//! - `GET /supported` - supported kinds/tokens
//! - `POST /verify`, `POST /verify/quick` - verify a payment payload
//! - `POST /settle` - settle an accepted payment payload on-chain
//! - `GET /settle/recent`, `GET /settle/stats` - audit log views
//! - `POST /webhooks`, `GET /webhooks`, `DELETE /webhooks/:id` - webhook CRUD
//! - `GET /discovery/resources` - advertised priced resources
//! - `GET /health` - liveness/readiness
//!
//! This server includes:
//! - Structured tracing via `TraceLayer`
//! - CORS support for cross-origin clients
//! - Per-source-IP rate limiting
//! - An Ethereum provider cache for per-network RPC routing
//!
//! Environment:
//! - `.env` values loaded at startup
//! - `HOST`, `PORT` control binding address
//! - `RUST_LOG` controls tracing verbosity

mod audit_log;
mod chain;
mod config;
mod discovery;
mod error;
mod facilitator;
mod handlers;
mod price_cache;
mod rate_limit;
mod registry;
mod replay_store;
mod settlement;
mod sig_down;
mod signature;
mod splitter;
mod telemetry;
mod timestamp;
mod types;
mod util;
mod verifier;
mod webhook;

use axum::Router;
use axum::http::Method;
use dotenvy::dotenv;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use tower_http::cors;

use crate::audit_log::{AuditLog, InMemoryAuditLog, SqliteAuditLog};
use crate::chain::{PendingNonceManager, ProviderCache};
use crate::chain::provider::ChainLedger;
use crate::config::Config;
use crate::discovery::DiscoveryCatalog;
use crate::facilitator::ExactEvmFacilitator;
use crate::handlers::AppState;
use crate::price_cache::{HttpPriceSourceClient, PriceCache};
use crate::rate_limit::RateLimitLayer;
use crate::registry::TokenRegistry;
use crate::replay_store::{InMemoryReplayStore, ReplayStore, SqliteReplayStore};
use crate::settlement::Settlement;
use crate::sig_down::SigDown;
use crate::telemetry::Telemetry;
use crate::webhook::WebhookRegistry;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    let telemetry = Telemetry::new()
        .with_name(env!("CARGO_PKG_NAME"))
        .with_version(env!("CARGO_PKG_VERSION"))
        .register();

    let config = Arc::new(Config::load()?);

    let providers = ProviderCache::from_config(&config)?;
    let ledger: Arc<dyn crate::chain::provider::LedgerRead> = Arc::new(ChainLedger::new(providers));

    let registry = Arc::new(TokenRegistry::new());

    let (replay_store, audit_log): (Arc<dyn ReplayStore>, Arc<dyn AuditLog>) = match config.durable_store_url() {
        Some(url) => (Arc::new(SqliteReplayStore::open(url)?), Arc::new(SqliteAuditLog::open(url)?)),
        None => {
            if config.is_production() {
                tracing::warn!("no durable_store_url configured in production; replay/audit state is in-memory only");
            }
            (Arc::new(InMemoryReplayStore::new()), Arc::new(InMemoryAuditLog::new()))
        }
    };

    let webhooks = Arc::new(WebhookRegistry::new());
    let discovery = Arc::new(DiscoveryCatalog::new());

    let price_source = Arc::new(HttpPriceSourceClient::new(
        std::env::var("PRICE_FEED_URL").unwrap_or_else(|_| "https://api.coinbase.com/v2/exchange-rates".into()),
    ));
    let price_cache = Arc::new(PriceCache::new(price_source, vec!["USDC".into(), "USDC-sepolia".into()]));
    price_cache.clone().spawn_refresh_loop(vec!["ETH".into()]);

    let settlement = Arc::new(Settlement {
        config: config.clone(),
        registry: registry.clone(),
        replay_store,
        audit_log: audit_log.clone(),
        ledger,
        nonce_manager: PendingNonceManager::new(),
        webhooks: webhooks.clone(),
    });

    let facilitator = Arc::new(ExactEvmFacilitator { config: config.clone(), registry, settlement });

    let state = AppState {
        facilitator,
        audit_log,
        webhooks,
        discovery,
        ready: Arc::new(AtomicBool::new(true)),
    };

    let rate_limiter = RateLimitLayer::new(120);

    let http_endpoints = Router::new()
        .merge(handlers::routes(state))
        .layer(telemetry.http_tracing())
        .layer(rate_limiter)
        .layer(
            cors::CorsLayer::new()
                .allow_origin(cors::Any)
                .allow_methods([Method::GET, Method::POST, Method::DELETE])
                .allow_headers(cors::Any),
        )
        .into_make_service_with_connect_info::<SocketAddr>();

    let addr = SocketAddr::new(config.host(), config.port());
    tracing::info!("Starting server at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap_or_else(|e| {
        tracing::error!("Failed to bind to {}: {}", addr, e);
        std::process::exit(1);
    });

    let sig_down = SigDown::try_new()?;
    let cancellation_token = sig_down.cancellation_token();
    let graceful_shutdown = async move { cancellation_token.cancelled().await };

    axum::serve(listener, http_endpoints)
        .with_graceful_shutdown(graceful_shutdown)
        .await?;

    Ok(())
}
