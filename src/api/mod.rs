// API Module
//
// axum router for the analysis service. Handlers share one `AppState`
// through an `Extension`; each concern lives in its own submodule.

pub mod analyze;
pub mod health;
pub mod helpers;
pub mod middleware;
pub mod types;

pub use analyze::*;
pub use health::*;
pub use helpers::*;
pub use middleware::{RateLimiter, RateTier};
pub use types::*;

use axum::http::{header, HeaderValue, Method};
use axum::routing::{get, post};
use axum::{Extension, Router};
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::warn;

use crate::aggregator::{AggregatorConfig, OverlapAggregator};
use crate::cache::HolderCache;
use crate::compiler::ThresholdRule;
use crate::config::{ServerSettings, Settings};
use crate::constants::RATE_LIMIT_WINDOW;
use crate::holders::HolderSources;

/// Shared by every handler
pub struct AppState {
    pub settings: Settings,
    pub aggregator: OverlapAggregator,
    /// Same sources and cache, ERC-20 ranking (any overlap, smaller K)
    pub erc20_aggregator: OverlapAggregator,
    pub cache: Arc<HolderCache>,
    pub rate_limiter: RateLimiter,
    pub started: Instant,
}

impl AppState {
    pub fn new(settings: Settings, sources: HolderSources, cache: Arc<HolderCache>) -> Self {
        let aggregator = OverlapAggregator::new(
            sources,
            Arc::clone(&cache),
            AggregatorConfig::from_settings(&settings),
        );
        let erc20_aggregator =
            aggregator.with_ranking(settings.analysis.erc20_top_k, ThresholdRule::any_overlap());
        let rate_limiter = RateLimiter::new(
            RATE_LIMIT_WINDOW,
            settings.rate_limit.analysis_per_minute,
            settings.rate_limit.api_per_minute,
        );

        Self {
            settings,
            aggregator,
            erc20_aggregator,
            cache,
            rate_limiter,
            started: Instant::now(),
        }
    }
}

/// CORS for the configured origins, or any origin when none are configured
pub fn cors_layer(server: &ServerSettings) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    let origins: Vec<HeaderValue> = server
        .allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(origin = %origin, error = %e, "Ignoring unparsable CORS origin");
                None
            }
        })
        .collect();

    if origins.is_empty() {
        layer.allow_origin(Any)
    } else {
        layer.allow_origin(AllowOrigin::list(origins))
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.settings.server);

    Router::new()
        .route("/api/analyze-combined-overlap", post(analyze_combined_overlap))
        .route("/api/analyze-combined-overlap/stream", post(analyze_combined_overlap_stream))
        .route("/api/analyze-erc20-overlap", post(analyze_erc20_overlap))
        .route("/api/health", get(health_check))
        .route("/metrics", get(metrics_handler))
        .layer(axum::middleware::from_fn(middleware::rate_limit))
        .layer(axum::middleware::from_fn(middleware::check_origin))
        .layer(axum::middleware::from_fn(middleware::track_requests))
        .layer(Extension(state))
        .layer(cors)
}
