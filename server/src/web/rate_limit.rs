use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::extract::Request;
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::engine::rate_limiter::RateLimiter;

/// Per-IP rate limiters for different endpoint tiers.
pub struct ApiRateLimiters {
    /// Password entry: tight limit against guessing room passwords.
    /// Burst of 10, refill 1 per 6 seconds (~10/minute).
    pub join: RateLimiter,
    /// History and presence reads. Burst of 60, refill 1 per second.
    pub api: RateLimiter,
    /// WebSocket connections: prevent connection storms.
    /// Burst of 5, refill 1 per 12 seconds (~5/minute).
    pub ws: RateLimiter,
}

impl Default for ApiRateLimiters {
    fn default() -> Self {
        Self {
            join: RateLimiter::new(10, 6.0),
            api: RateLimiter::new(60, 1.0),
            ws: RateLimiter::new(5, 12.0),
        }
    }
}

impl ApiRateLimiters {
    fn prune(&self, idle_for: Duration) {
        self.join.prune(idle_for);
        self.api.prune(idle_for);
        self.ws.prune(idle_for);
    }
}

/// Periodically forget idle client buckets so the maps don't grow forever.
pub async fn run_limiter_pruner(limiters: Arc<ApiRateLimiters>, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(Duration::from_secs(300));
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                // A bucket idle this long has refilled completely in every tier.
                limiters.prune(Duration::from_secs(600));
                debug!(
                    join = limiters.join.tracked_keys(),
                    api = limiters.api.tracked_keys(),
                    ws = limiters.ws.tracked_keys(),
                    "pruned rate limiter buckets"
                );
            }
        }
    }
}

/// Extract client IP from request, only trusting proxy headers from loopback.
///
/// When the direct peer is a loopback address the connection is coming
/// through a local reverse proxy and X-Forwarded-For / X-Real-IP are used.
/// Otherwise the actual peer IP is used so the headers can't be spoofed.
fn client_ip(req: &Request<Body>) -> String {
    let peer_ip = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|c| c.0.ip());
    let from_loopback = peer_ip.is_some_and(|ip| ip.is_loopback());

    if from_loopback {
        if let Some(forwarded) = req.headers().get("x-forwarded-for")
            && let Ok(val) = forwarded.to_str()
            && let Some(first) = val.split(',').next()
        {
            return first.trim().to_string();
        }

        if let Some(real_ip) = req.headers().get("x-real-ip")
            && let Ok(val) = real_ip.to_str()
        {
            return val.trim().to_string();
        }
    }

    peer_ip
        .map(|ip| ip.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

async fn limit(
    req: Request<Body>,
    next: Next,
    pick: fn(&ApiRateLimiters) -> &RateLimiter,
    message: &'static str,
) -> Response {
    if let Some(limiters) = req.extensions().get::<Arc<ApiRateLimiters>>() {
        let ip = client_ip(&req);
        if !pick(limiters).check(&ip) {
            debug!(%ip, "rate limited");
            return (StatusCode::TOO_MANY_REQUESTS, message).into_response();
        }
    }
    next.run(req).await
}

/// Middleware for the room password endpoint.
pub async fn join_rate_limit(req: Request<Body>, next: Next) -> Response {
    limit(req, next, |l| &l.join, "Too many attempts. Please try again later.").await
}

/// Middleware for general API rate limiting.
pub async fn api_rate_limit(req: Request<Body>, next: Next) -> Response {
    limit(req, next, |l| &l.api, "Rate limit exceeded. Please try again later.").await
}

/// Middleware for WebSocket connection rate limiting.
pub async fn ws_rate_limit(req: Request<Body>, next: Next) -> Response {
    limit(req, next, |l| &l.ws, "Too many connections. Please try again later.").await
}
