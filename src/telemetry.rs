//! Structured logging setup (§10.1). Deliberately simplified from the
//! teacher's OpenTelemetry/OTLP pipeline to plain `tracing` +
//! `tracing-subscriber`; see DESIGN.md "Dropped teacher dependencies".

use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

pub struct Telemetry {
    name: &'static str,
    version: &'static str,
}

impl Telemetry {
    pub fn new() -> Self {
        Telemetry {
            name: "x402-facilitator",
            version: "0.0.0",
        }
    }

    pub fn with_name(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }

    pub fn with_version(mut self, version: &'static str) -> Self {
        self.version = version;
        self
    }

    /// Installs the global `tracing` subscriber. Call once at process start.
    pub fn register(self) -> Self {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init();
        tracing::info!(name = self.name, version = self.version, "telemetry initialized");
        self
    }

    /// A `tower-http` layer that emits a span per HTTP request.
    pub fn http_tracing(&self) -> TraceLayer<tower_http::classify::SharedClassifier<tower_http::classify::ServerErrorsAsFailures>> {
        TraceLayer::new_for_http()
    }
}

impl Default for Telemetry {
    fn default() -> Self {
        Self::new()
    }
}
