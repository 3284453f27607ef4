/// Metrics Module - Prometheus Instrumentation
///
/// - Prometheus registry shared by the whole process
/// - Provider, holder fetch, cache and analysis metrics
/// - Small helper API so call sites never touch label vectors directly
/// - Standard histogram buckets
///
/// Label values are bounded: provider names, asset class labels, error
/// kinds and route templates. Never label by wallet or asset address.

use lazy_static::lazy_static;
use once_cell::sync::OnceCell;
use prometheus::{
    Encoder, Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts,
    Registry, TextEncoder,
};
use std::time::Instant;

/// Standard latency buckets for histograms (seconds)
const LATENCY_BUCKETS: &[f64] = &[0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0];

lazy_static! {
    /// Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // ========================================================================
    // 1. PROVIDERS
    // ========================================================================

    /// Retries issued by the retry layer
    /// Labels: provider (alchemy, poap, moralis), reason (status code or "network")
    pub static ref PROVIDER_RETRIES: IntCounterVec = IntCounterVec::new(
        Opts::new("ghostcontext_provider_retries_total", "Provider requests retried"),
        &["provider", "reason"]
    ).unwrap();

    // ========================================================================
    // 2. HOLDER FETCHES
    // ========================================================================

    /// Holder pages received
    /// Labels: class (nft, poap, erc20)
    pub static ref HOLDER_PAGES: IntCounterVec = IntCounterVec::new(
        Opts::new("ghostcontext_holder_pages_total", "Holder pages fetched by asset class"),
        &["class"]
    ).unwrap();

    /// Assets whose holder list stopped at the per-asset cap
    pub static ref HOLDER_TRUNCATIONS: IntCounterVec = IntCounterVec::new(
        Opts::new("ghostcontext_holder_truncations_total", "Holder lists truncated at the cap"),
        &["class"]
    ).unwrap();

    /// Asset fetches that ended partial or failed
    /// Labels: class, reason (error kind)
    pub static ref ASSET_FETCH_FAILURES: IntCounterVec = IntCounterVec::new(
        Opts::new("ghostcontext_asset_fetch_failures_total", "Asset holder fetches that failed"),
        &["class", "reason"]
    ).unwrap();

    /// Time to collect the holder list of one asset
    pub static ref HOLDER_FETCH_DURATION: HistogramVec = HistogramVec::new(
        HistogramOpts::new("ghostcontext_holder_fetch_duration_seconds", "Holder list fetch duration per asset")
            .buckets(LATENCY_BUCKETS.to_vec()),
        &["class"]
    ).unwrap();

    /// Asset fetches currently holding a concurrency permit
    pub static ref ASSET_FETCHES_IN_FLIGHT: IntGauge = IntGauge::new(
        "ghostcontext_asset_fetches_in_flight",
        "Asset holder fetches in flight"
    ).unwrap();

    // ========================================================================
    // 3. CACHE
    // ========================================================================

    pub static ref HOLDER_CACHE_HITS: IntCounter = IntCounter::new(
        "ghostcontext_holder_cache_hits_total",
        "Holder cache hits"
    ).unwrap();

    pub static ref HOLDER_CACHE_MISSES: IntCounter = IntCounter::new(
        "ghostcontext_holder_cache_misses_total",
        "Holder cache misses"
    ).unwrap();

    // ========================================================================
    // 4. ANALYSES & HTTP
    // ========================================================================

    /// Finished analyses
    /// Labels: outcome (complete, partial, cancelled, rejected)
    pub static ref ANALYSES: IntCounterVec = IntCounterVec::new(
        Opts::new("ghostcontext_analyses_total", "Overlap analyses by outcome"),
        &["outcome"]
    ).unwrap();

    pub static ref ANALYSIS_DURATION: Histogram = Histogram::with_opts(
        HistogramOpts::new("ghostcontext_analysis_duration_seconds", "End-to-end analysis duration")
            .buckets(LATENCY_BUCKETS.to_vec())
    ).unwrap();

    /// HTTP requests
    /// Labels: endpoint, status
    pub static ref HTTP_REQUESTS: IntCounterVec = IntCounterVec::new(
        Opts::new("ghostcontext_http_requests_total", "Total HTTP requests"),
        &["endpoint", "status"]
    ).unwrap();

    /// Requests rejected by the rate limiter
    pub static ref RATE_LIMITED: IntCounterVec = IntCounterVec::new(
        Opts::new("ghostcontext_rate_limited_total", "Requests rejected by the rate limiter"),
        &["tier"]
    ).unwrap();

    // ========================================================================
    // 5. OPERATIONAL
    // ========================================================================

    pub static ref UPTIME_SECONDS: IntGauge = IntGauge::new(
        "ghostcontext_uptime_seconds",
        "Service uptime in seconds"
    ).unwrap();

    pub static ref SERVICE_START_TIMESTAMP: IntGauge = IntGauge::new(
        "ghostcontext_service_start_timestamp_seconds",
        "Unix timestamp of service start"
    ).unwrap();
}

static INIT: OnceCell<()> = OnceCell::new();

/// Initialize metrics registry
///
/// Registers every metric with the global registry. Safe to call more
/// than once; only the first call registers.
pub fn init_metrics() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    INIT.get_or_try_init(register_all)?;
    Ok(())
}

fn register_all() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    REGISTRY.register(Box::new(PROVIDER_RETRIES.clone()))?;

    REGISTRY.register(Box::new(HOLDER_PAGES.clone()))?;
    REGISTRY.register(Box::new(HOLDER_TRUNCATIONS.clone()))?;
    REGISTRY.register(Box::new(ASSET_FETCH_FAILURES.clone()))?;
    REGISTRY.register(Box::new(HOLDER_FETCH_DURATION.clone()))?;
    REGISTRY.register(Box::new(ASSET_FETCHES_IN_FLIGHT.clone()))?;

    REGISTRY.register(Box::new(HOLDER_CACHE_HITS.clone()))?;
    REGISTRY.register(Box::new(HOLDER_CACHE_MISSES.clone()))?;

    REGISTRY.register(Box::new(ANALYSES.clone()))?;
    REGISTRY.register(Box::new(ANALYSIS_DURATION.clone()))?;
    REGISTRY.register(Box::new(HTTP_REQUESTS.clone()))?;
    REGISTRY.register(Box::new(RATE_LIMITED.clone()))?;

    REGISTRY.register(Box::new(UPTIME_SECONDS.clone()))?;
    REGISTRY.register(Box::new(SERVICE_START_TIMESTAMP.clone()))?;

    SERVICE_START_TIMESTAMP.set(unix_now() as i64);
    Ok(())
}

fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Gather metrics in Prometheus text format
pub fn gather_metrics() -> String {
    update_uptime();

    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = vec![];
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

// ============================================================================
// HELPER FUNCTIONS - Clean API for instrumenting code
// ============================================================================

/// Timer for measuring durations
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

pub fn increment_provider_retries(provider: &str, reason: &str) {
    PROVIDER_RETRIES.with_label_values(&[provider, reason]).inc();
}

pub fn increment_holder_pages(class: &str) {
    HOLDER_PAGES.with_label_values(&[class]).inc();
}

pub fn increment_holder_truncations(class: &str) {
    HOLDER_TRUNCATIONS.with_label_values(&[class]).inc();
}

pub fn increment_asset_fetch_failures(class: &str, reason: &str) {
    ASSET_FETCH_FAILURES.with_label_values(&[class, reason]).inc();
}

pub fn record_holder_fetch_duration(class: &str, duration_secs: f64) {
    HOLDER_FETCH_DURATION.with_label_values(&[class]).observe(duration_secs);
}

pub fn inc_asset_fetches_in_flight() {
    ASSET_FETCHES_IN_FLIGHT.inc();
}

pub fn dec_asset_fetches_in_flight() {
    ASSET_FETCHES_IN_FLIGHT.dec();
}

/// Record cache hit
pub fn increment_cache_hits() {
    HOLDER_CACHE_HITS.inc();
}

/// Record cache miss
pub fn increment_cache_misses() {
    HOLDER_CACHE_MISSES.inc();
}

pub fn increment_analyses(outcome: &str) {
    ANALYSES.with_label_values(&[outcome]).inc();
}

pub fn record_analysis_duration(duration_secs: f64) {
    ANALYSIS_DURATION.observe(duration_secs);
}

pub fn increment_http_requests(endpoint: &str, status: u16) {
    HTTP_REQUESTS
        .with_label_values(&[endpoint, &status.to_string()])
        .inc();
}

pub fn increment_rate_limited(tier: &str) {
    RATE_LIMITED.with_label_values(&[tier]).inc();
}

/// Update uptime
pub fn update_uptime() {
    let start = SERVICE_START_TIMESTAMP.get();
    if start > 0 {
        UPTIME_SECONDS.set((unix_now() as i64 - start).max(0));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_metrics_is_idempotent() {
        init_metrics().unwrap();
        init_metrics().unwrap();
    }

    #[test]
    fn test_gather_metrics() {
        init_metrics().unwrap();

        increment_holder_pages("nft");
        increment_provider_retries("alchemy", "429");
        increment_analyses("complete");

        let output = gather_metrics();

        assert!(output.contains("ghostcontext_holder_pages_total"));
        assert!(output.contains("ghostcontext_provider_retries_total"));
        assert!(output.contains("ghostcontext_analyses_total"));
    }

    #[test]
    fn test_timer() {
        let timer = Timer::new();
        std::thread::sleep(std::time::Duration::from_millis(10));
        let elapsed = timer.elapsed_secs();
        assert!(elapsed >= 0.01);
    }
}
