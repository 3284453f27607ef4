/// Analysis Limits and Defaults
///
/// These constants bound the cost of one overlap analysis. Every value here
/// can be overridden from `config.toml` (see `config::Settings`); the constants
/// are the defaults used when a key is absent.

use std::time::Duration;

/// Maximum holder addresses collected for a single asset.
///
/// Pagination stops once the accumulated count exceeds this value, so the
/// final set may overshoot by at most one page. Truncation is an approximation,
/// not an error: very popular collections contribute a sample of their owners.
pub const MAX_HOLDERS_PER_ASSET: usize = 150_000;

/// Ranked candidates returned by the combined analysis endpoints
pub const DEFAULT_TOP_K: usize = 100;

/// Ranked candidates returned by the ERC-20-only endpoint
pub const ERC20_TOP_K: usize = 50;

/// Simultaneous in-flight asset fetches across all asset classes
pub const DEFAULT_CONCURRENCY: usize = 6;

/// Minimum shared assets when two or more assets are analyzed
pub const MULTI_ASSET_MIN_OVERLAP: usize = 2;

/// Minimum shared assets when exactly one asset is analyzed
pub const SINGLE_ASSET_MIN_OVERLAP: usize = 1;

/// Ceiling for one holder page request, including its retries
pub const DEFAULT_PAGE_TIMEOUT: Duration = Duration::from_secs(30);

// ========== Retry ==========

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_BASE_DELAY_MS: u64 = 1_000;
pub const DEFAULT_MAX_DELAY_MS: u64 = 30_000;

/// Upper bound of the random jitter, as a fraction of the exponential term
pub const JITTER_FRACTION: f64 = 0.3;

/// HTTP statuses worth retrying: rate limiting and gateway failures
pub const RETRYABLE_STATUSES: [u16; 4] = [429, 502, 503, 504];

// ========== Providers ==========

pub const ALCHEMY_NFT_API_VERSION: &str = "v3";
pub const POAP_API_BASE: &str = "https://api.poap.tech";
pub const MORALIS_API_BASE: &str = "https://deep-index.moralis.io/api/v2.2";

/// Page size of the legacy `/token-holders` POAP endpoint
pub const POAP_LEGACY_PAGE_SIZE: usize = 500;

/// Page size of the `/poaps` POAP endpoint (documented maximum)
pub const POAP_PAGE_SIZE: usize = 300;

/// Moralis rejects larger pages on the free plan
pub const MORALIS_PAGE_SIZE: usize = 100;

pub const PROVIDER_HTTP_TIMEOUT: Duration = Duration::from_secs(20);
pub const USER_AGENT: &str = "GhostContext/1.0";

// ========== Cache ==========

/// Holder sets change slowly; 30 minutes keeps repeat analyses cheap
pub const HOLDER_CACHE_TTL: Duration = Duration::from_secs(30 * 60);

/// Each entry can hold up to `MAX_HOLDERS_PER_ASSET` addresses (~6MB),
/// so the capacity stays small.
pub const HOLDER_CACHE_CAPACITY: usize = 64;

// ========== HTTP surface ==========

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3005";
pub const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60);
pub const RATE_LIMIT_API_PER_MINUTE: usize = 60;
pub const RATE_LIMIT_ANALYSIS_PER_MINUTE: usize = 10;

/// Progress events buffered for a slow SSE reader before ticks are dropped
pub const PROGRESS_CHANNEL_CAPACITY: usize = 256;

/// Log one pagination line every N pages per asset
pub const PAGE_LOG_INTERVAL: u64 = 25;
