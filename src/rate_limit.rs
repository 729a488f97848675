//! Per-source ingress rate limiting (§5 "Rate limiting", §10.5): a `tower`
//! `Layer`/`Service` pair outside the Verifier/Settlement modules, gating
//! HTTP entry only. Grounded on the general `tower::Layer` + wrapped-service
//! idiom used by `tower-http`'s own layers (as composed in the teacher's
//! `main.rs` alongside `CorsLayer`/`TraceLayer`); this crate owns a small
//! token-bucket implementation rather than pulling in `governor`, since the
//! spec scopes full distributed rate limiting out (single-process buckets
//! are enough to make 429 a reachable status).

use axum::extract::ConnectInfo;
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use dashmap::DashMap;
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tower::{Layer, Service};

#[derive(Debug, Clone, Copy)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

impl Bucket {
    fn new(capacity: f64) -> Self {
        Bucket { tokens: capacity, last_refill: Instant::now() }
    }

    fn try_take(&mut self, capacity: f64, refill_per_sec: f64) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * refill_per_sec).min(capacity);
        self.last_refill = now;
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Per-`IpAddr` token buckets, shared across all requests. `capacity` caps
/// burst size; `refill_per_sec` is the sustained rate.
#[derive(Clone)]
pub struct RateLimitLayer {
    buckets: Arc<DashMap<IpAddr, Bucket>>,
    capacity: f64,
    refill_per_sec: f64,
}

impl RateLimitLayer {
    pub fn new(requests_per_minute: u32) -> Self {
        let capacity = requests_per_minute.max(1) as f64;
        RateLimitLayer {
            buckets: Arc::new(DashMap::new()),
            capacity,
            refill_per_sec: capacity / 60.0,
        }
    }

    /// Periodically called (or relied on via a bounded bucket count) to
    /// avoid unbounded growth from one-off source addresses. Kept cheap:
    /// only evicts buckets idle for longer than `idle_for`.
    pub fn evict_idle(&self, idle_for: Duration) {
        let now = Instant::now();
        self.buckets.retain(|_, b| now.duration_since(b.last_refill) < idle_for);
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService { inner, limiter: self.clone() }
    }
}

#[derive(Clone)]
pub struct RateLimitService<S> {
    inner: S,
    limiter: RateLimitLayer,
}

impl<S, B> Service<Request<B>> for RateLimitService<S>
where
    S: Service<Request<B>, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
    B: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Response, S::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<B>) -> Self::Future {
        let source = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|c| c.0.ip())
            .unwrap_or(IpAddr::from([0, 0, 0, 0]));

        let allowed = {
            let mut entry = self.limiter.buckets.entry(source).or_insert_with(|| Bucket::new(self.limiter.capacity));
            entry.try_take(self.limiter.capacity, self.limiter.refill_per_sec)
        };

        if !allowed {
            return Box::pin(async move { Ok(rate_limited_response()) });
        }

        let mut inner = self.inner.clone();
        Box::pin(async move { inner.call(request).await })
    }
}

fn rate_limited_response() -> Response {
    (StatusCode::TOO_MANY_REQUESTS, axum::Json(serde_json::json!({ "error": "rate_limit_exceeded" }))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_drains_and_refills() {
        let mut bucket = Bucket::new(2.0);
        assert!(bucket.try_take(2.0, 1.0));
        assert!(bucket.try_take(2.0, 1.0));
        assert!(!bucket.try_take(2.0, 1.0));
    }

    #[test]
    fn evict_idle_removes_stale_buckets() {
        let layer = RateLimitLayer::new(60);
        layer.buckets.insert(IpAddr::from([127, 0, 0, 1]), Bucket::new(60.0));
        layer.evict_idle(Duration::from_secs(0));
        assert!(layer.buckets.is_empty());
    }
}
