// Health and Metrics Endpoints

use axum::http::header::CONTENT_TYPE;
use axum::response::IntoResponse;
use axum::{Extension, Json};
use std::sync::Arc;

use super::types::{HealthStatus, ProviderStatus};
use super::AppState;
use crate::metrics::gather_metrics;

/// GET /api/health
/// Liveness plus a summary of what is configured.
///
/// **NO CACHE**: health checks should reflect the current process
pub async fn health_check(Extension(state): Extension<Arc<AppState>>) -> Json<HealthStatus> {
    let providers = &state.settings.providers;
    let provider_status = ProviderStatus {
        alchemy: providers.alchemy_api_key.is_some() || !providers.alchemy_network_keys.is_empty(),
        poap: providers.poap_api_key.is_some(),
        moralis: providers.moralis_api_key.is_some(),
    };

    let mut warnings = Vec::new();
    if !provider_status.alchemy {
        warnings.push("No Alchemy API key configured; NFT assets will be skipped".to_string());
    }
    if !provider_status.poap {
        warnings.push("No POAP API key configured; POAP assets will be skipped".to_string());
    }
    if !provider_status.moralis {
        warnings.push("No Moralis API key configured; ERC-20 assets will be skipped".to_string());
    }

    Json(HealthStatus {
        status: "ok".to_string(),
        service: "ghostcontext".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.started.elapsed().as_secs(),
        providers: provider_status,
        cache: state.cache.get_stats().await,
        warnings,
    })
}

/// GET /metrics
/// Prometheus text exposition.
pub async fn metrics_handler() -> impl IntoResponse {
    (
        [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        gather_metrics(),
    )
}
