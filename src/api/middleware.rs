// Request Middleware
//
// Origin allow-list, per-IP sliding-window rate limiting, and request
// counting. Applied to the whole router; `/metrics` and `/api/health` are
// exempt from origin checks and rate limiting so scrapers and probes keep
// working.

use axum::extract::{ConnectInfo, MatchedPath, Request};
use axum::http::{HeaderMap, HeaderValue};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Extension;
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::helpers::{forbidden, too_many_requests};
use super::AppState;
use crate::metrics;

/// Which budget a request draws from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateTier {
    /// Holder-fetching analysis endpoints
    Analysis,
    Api,
}

impl RateTier {
    pub fn for_path(path: &str) -> Self {
        if path.starts_with("/api/analyze") {
            RateTier::Analysis
        } else {
            RateTier::Api
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            RateTier::Analysis => "analysis",
            RateTier::Api => "api",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    pub limit: usize,
    pub remaining: usize,
    /// Seconds until the oldest hit leaves the window
    pub reset_secs: u64,
}

/// Sliding-window counter keyed by (tier, client)
pub struct RateLimiter {
    window: Duration,
    analysis_limit: usize,
    api_limit: usize,
    hits: Mutex<HashMap<(RateTier, String), VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new(window: Duration, analysis_limit: usize, api_limit: usize) -> Self {
        Self {
            window,
            analysis_limit,
            api_limit,
            hits: Mutex::new(HashMap::new()),
        }
    }

    fn limit(&self, tier: RateTier) -> usize {
        match tier {
            RateTier::Analysis => self.analysis_limit,
            RateTier::Api => self.api_limit,
        }
    }

    /// Count one request from `client`; rejected requests are not counted
    pub async fn check(&self, tier: RateTier, client: &str) -> RateDecision {
        let limit = self.limit(tier);
        let now = Instant::now();
        let mut hits = self.hits.lock().await;

        let window = hits.entry((tier, client.to_string())).or_default();
        while let Some(oldest) = window.front() {
            if now.duration_since(*oldest) >= self.window {
                window.pop_front();
            } else {
                break;
            }
        }

        let reset_secs = window
            .front()
            .map(|oldest| (self.window - now.duration_since(*oldest)).as_secs().max(1))
            .unwrap_or(self.window.as_secs());

        if window.len() >= limit {
            return RateDecision {
                allowed: false,
                limit,
                remaining: 0,
                reset_secs,
            };
        }

        window.push_back(now);
        RateDecision {
            allowed: true,
            limit,
            remaining: limit - window.len(),
            reset_secs,
        }
    }

    /// Drop clients with no hits inside the window
    pub async fn prune(&self) {
        let now = Instant::now();
        let window = self.window;
        self.hits.lock().await.retain(|_, hits| {
            hits.back()
                .map(|last| now.duration_since(*last) < window)
                .unwrap_or(false)
        });
    }

    pub async fn tracked_clients(&self) -> usize {
        self.hits.lock().await.len()
    }
}

/// Client IP: first `X-Forwarded-For` entry, then the socket peer
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|ip| ip.trim().to_string())
        .filter(|ip| !ip.is_empty())
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

/// True when `origin` may call the API. An empty allow-list allows all,
/// and requests without an `Origin` header (non-browser) pass.
pub fn origin_allowed(allowed: &[String], origin: Option<&str>) -> bool {
    if allowed.is_empty() {
        return true;
    }
    match origin {
        None => true,
        Some(origin) => {
            let origin = origin.trim_end_matches('/');
            allowed
                .iter()
                .any(|a| a == "*" || a.trim_end_matches('/').eq_ignore_ascii_case(origin))
        }
    }
}

fn is_exempt(path: &str) -> bool {
    path == "/metrics" || path == "/api/health"
}

pub async fn check_origin(
    Extension(state): Extension<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path();
    if !is_exempt(path) {
        let origin = request
            .headers()
            .get("origin")
            .and_then(|v| v.to_str().ok());
        if !origin_allowed(&state.settings.server.allowed_origins, origin) {
            warn!(origin = origin.unwrap_or(""), path = path, "Rejected request from disallowed origin");
            return forbidden("Forbidden").into_response();
        }
    }
    next.run(request).await
}

pub async fn rate_limit(
    Extension(state): Extension<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    if is_exempt(&path) {
        return next.run(request).await;
    }

    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let client = client_ip(request.headers(), peer);
    let tier = RateTier::for_path(&path);
    let decision = state.rate_limiter.check(tier, &client).await;

    let mut response = if decision.allowed {
        next.run(request).await
    } else {
        debug!(client = %client, tier = tier.label(), path = %path, "Rate limit exceeded");
        metrics::increment_rate_limited(tier.label());
        too_many_requests(decision.reset_secs)
    };

    let headers = response.headers_mut();
    headers.insert("x-ratelimit-limit", HeaderValue::from(decision.limit));
    headers.insert("x-ratelimit-remaining", HeaderValue::from(decision.remaining));
    headers.insert("x-ratelimit-reset", HeaderValue::from(decision.reset_secs));
    response
}

/// Count requests by route template and status
pub async fn track_requests(request: Request, next: Next) -> Response {
    let endpoint = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    let response = next.run(request).await;
    metrics::increment_http_requests(&endpoint, response.status().as_u16());
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_sliding_window() {
        let limiter = RateLimiter::new(Duration::from_secs(60), 2, 5);

        assert!(limiter.check(RateTier::Analysis, "1.2.3.4").await.allowed);
        tokio::time::advance(Duration::from_secs(30)).await;
        let second = limiter.check(RateTier::Analysis, "1.2.3.4").await;
        assert!(second.allowed);
        assert_eq!(second.remaining, 0);

        let third = limiter.check(RateTier::Analysis, "1.2.3.4").await;
        assert!(!third.allowed);
        assert_eq!(third.reset_secs, 30);

        // Other clients and tiers have their own budget
        assert!(limiter.check(RateTier::Analysis, "5.6.7.8").await.allowed);
        assert!(limiter.check(RateTier::Api, "1.2.3.4").await.allowed);

        // The first hit leaves the window
        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(limiter.check(RateTier::Analysis, "1.2.3.4").await.allowed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_prune_forgets_idle_clients() {
        let limiter = RateLimiter::new(Duration::from_secs(60), 10, 60);
        limiter.check(RateTier::Api, "1.2.3.4").await;
        assert_eq!(limiter.tracked_clients().await, 1);

        tokio::time::advance(Duration::from_secs(61)).await;
        limiter.prune().await;
        assert_eq!(limiter.tracked_clients().await, 0);
    }

    #[test]
    fn test_tier_for_path() {
        assert_eq!(RateTier::for_path("/api/analyze-combined-overlap/stream"), RateTier::Analysis);
        assert_eq!(RateTier::for_path("/api/analyze-erc20-overlap"), RateTier::Analysis);
        assert_eq!(RateTier::for_path("/api/health"), RateTier::Api);
    }

    #[test]
    fn test_client_ip_prefers_forwarded_for() {
        let mut headers = HeaderMap::new();
        let peer: SocketAddr = "10.0.0.1:5555".parse().unwrap();
        assert_eq!(client_ip(&headers, Some(peer)), "10.0.0.1");

        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.7, 10.0.0.1"));
        assert_eq!(client_ip(&headers, Some(peer)), "203.0.113.7");
        assert_eq!(client_ip(&HeaderMap::new(), None), "unknown");
    }

    #[test]
    fn test_origin_allow_list() {
        let allowed = vec!["https://ghostcontext.app".to_string()];
        assert!(origin_allowed(&[], Some("https://evil.example")));
        assert!(origin_allowed(&allowed, Some("https://ghostcontext.app/")));
        assert!(origin_allowed(&allowed, None));
        assert!(!origin_allowed(&allowed, Some("https://evil.example")));
    }
}
