use std::net::SocketAddr;
use std::sync::Arc;

use ghostcontext::api::{self, AppState};
use ghostcontext::cache::HolderCache;
use ghostcontext::config::{init_global_config, Settings};
use ghostcontext::constants::RATE_LIMIT_WINDOW;
use ghostcontext::holders::HolderSources;
use ghostcontext::metrics;
use ghostcontext::telemetry::{init_tracing, TelemetryConfig};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_global_config("config.toml")?;
    init_tracing(TelemetryConfig::default())?;
    metrics::init_metrics().map_err(|e| e.to_string())?;

    let settings = Settings::from_global()?;

    let sources = HolderSources::from_settings(&settings)?;
    let cache = if settings.cache.enabled {
        HolderCache::new(settings.cache.capacity, settings.holder_ttl())
    } else {
        HolderCache::disabled()
    };

    info!(
        bind = %settings.server.bind,
        concurrency = settings.analysis.concurrency,
        max_holders = settings.analysis.max_holders_per_asset,
        top_k = settings.analysis.top_k,
        cache = cache.is_enabled(),
        origins = settings.server.allowed_origins.len(),
        "Starting ghostcontext"
    );
    if settings.providers.alchemy_api_key.is_none() && settings.providers.alchemy_network_keys.is_empty() {
        warn!("No Alchemy API key configured; NFT holders cannot be fetched");
    }

    let bind = settings.server.bind.clone();
    let state = Arc::new(AppState::new(settings, sources, Arc::new(cache)));

    // Forget rate-limit windows of clients that went quiet
    let pruned = Arc::clone(&state);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(RATE_LIMIT_WINDOW);
        loop {
            interval.tick().await;
            pruned.rate_limiter.prune().await;
        }
    });

    let app = api::router(state);
    let listener = tokio::net::TcpListener::bind(bind.as_str()).await?;
    info!(addr = %listener.local_addr()?, "Listening");

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
