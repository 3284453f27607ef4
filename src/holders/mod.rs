// Holder Sources
//
// One narrow interface per asset class. Providers hide their payload shapes
// behind `HolderSource::next_page`; the pagination loop below is shared by
// all of them and never touches provider JSON.

pub mod alchemy;
pub mod moralis;
pub mod poap;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::error::{AnalysisError, FetchError};
use crate::metrics;
use crate::retry::RetryingFetcher;
use crate::telemetry::{short_address, ProgressCounter};
use crate::constants::PAGE_LOG_INTERVAL;
use crate::types::{AssetClass, AssetRef, HolderPage};

pub use alchemy::AlchemySource;
pub use moralis::MoralisSource;
pub use poap::PoapSource;

/// Paginated access to the holders of one asset.
///
/// Calling again with the returned `next_cursor` yields the following page;
/// `None` means the listing is exhausted. A failed call may be repeated with
/// the same cursor.
#[async_trait]
pub trait HolderSource: Send + Sync {
    fn name(&self) -> &'static str;

    async fn next_page(
        &self,
        asset: &AssetRef,
        cursor: Option<&str>,
    ) -> Result<HolderPage, AnalysisError>;
}

/// The source used for each asset class
#[derive(Clone)]
pub struct HolderSources {
    pub nft: Arc<dyn HolderSource>,
    pub poap: Arc<dyn HolderSource>,
    pub erc20: Arc<dyn HolderSource>,
}

impl HolderSources {
    pub fn new(
        nft: Arc<dyn HolderSource>,
        poap: Arc<dyn HolderSource>,
        erc20: Arc<dyn HolderSource>,
    ) -> Self {
        Self { nft, poap, erc20 }
    }

    /// Production sources built from settings, sharing one HTTP client
    pub fn from_settings(settings: &Settings) -> Result<Self, FetchError> {
        let fetcher = RetryingFetcher::new(settings.retry_policy())?;

        Ok(Self {
            nft: Arc::new(AlchemySource::new(
                fetcher.clone(),
                settings.providers.alchemy_api_key.clone(),
                settings.providers.alchemy_network_keys.clone(),
            )),
            poap: Arc::new(PoapSource::new(
                fetcher.clone(),
                settings.providers.poap_api_key.clone(),
            )),
            erc20: Arc::new(MoralisSource::new(
                fetcher,
                settings.providers.moralis_api_key.clone(),
                settings.providers.moralis_page_size,
            )),
        })
    }

    pub fn for_class(&self, class: AssetClass) -> &Arc<dyn HolderSource> {
        match class {
            AssetClass::Nft => &self.nft,
            AssetClass::Poap => &self.poap,
            AssetClass::Erc20 => &self.erc20,
        }
    }
}

/// How a holder fetch ended
#[derive(Debug, Clone, PartialEq)]
pub enum FetchStatus {
    /// The provider reported no further pages
    Complete,
    /// Pagination stopped at the per-asset cap
    Capped,
    /// Some pages arrived before an error, timeout, or cancellation
    Partial(String),
    /// Nothing usable arrived
    Failed(String),
}

impl FetchStatus {
    pub fn label(&self) -> &'static str {
        match self {
            FetchStatus::Complete => "complete",
            FetchStatus::Capped => "capped",
            FetchStatus::Partial(_) => "partial",
            FetchStatus::Failed(_) => "failed",
        }
    }
}

/// Holder addresses collected for one asset (lowercase, may repeat)
#[derive(Debug, Clone)]
pub struct HolderFetch {
    pub addresses: Vec<String>,
    pub status: FetchStatus,
    pub pages: u64,
}

impl HolderFetch {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            addresses: Vec::new(),
            status: FetchStatus::Failed(reason.into()),
            pages: 0,
        }
    }

    /// Only full or capped listings are worth reusing
    pub fn is_cacheable(&self) -> bool {
        matches!(self.status, FetchStatus::Complete | FetchStatus::Capped)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FetchLimits {
    /// Stop paginating once more than this many addresses were collected
    pub max_holders: usize,
    /// Ceiling for one `next_page` call, retries included
    pub page_timeout: Duration,
}

/// Page through every holder of `asset`.
///
/// Never fails: errors, timeouts, and cancellation degrade the result to
/// whatever pages already arrived. Pages are requested strictly in cursor
/// order, and cancellation is checked before each request.
pub async fn collect_holders(
    source: &dyn HolderSource,
    asset: &AssetRef,
    limits: FetchLimits,
    cancel: &CancellationToken,
) -> HolderFetch {
    let class = asset.class();
    let identity = asset.identity();
    let started = Instant::now();
    let page_log = ProgressCounter::new(PAGE_LOG_INTERVAL);

    let mut addresses: Vec<String> = Vec::new();
    let mut cursor: Option<String> = None;
    let mut pages: u64 = 0;

    let status = loop {
        if cancel.is_cancelled() {
            break degrade(&addresses, "cancelled".to_string());
        }

        let request = source.next_page(asset, cursor.as_deref());
        let page = match tokio::time::timeout(limits.page_timeout, request).await {
            Ok(Ok(page)) => page,
            Ok(Err(e)) => {
                warn!(
                    provider = source.name(),
                    asset = %short_address(&identity.key),
                    class = %class,
                    page = pages,
                    error = %e,
                    "Holder page failed"
                );
                metrics::increment_asset_fetch_failures(class.label(), e.kind());
                break degrade(&addresses, e.to_string());
            }
            Err(_) => {
                let e = AnalysisError::Timeout {
                    seconds: limits.page_timeout.as_secs(),
                };
                warn!(
                    provider = source.name(),
                    asset = %short_address(&identity.key),
                    class = %class,
                    page = pages,
                    "Holder page timed out"
                );
                metrics::increment_asset_fetch_failures(class.label(), e.kind());
                break degrade(&addresses, e.to_string());
            }
        };

        pages += 1;
        metrics::increment_holder_pages(class.label());

        addresses.extend(
            page.addresses
                .into_iter()
                .map(|a| a.trim().to_lowercase())
                .filter(|a| !a.is_empty()),
        );

        if page_log.should_log() {
            debug!(
                provider = source.name(),
                asset = %short_address(&identity.key),
                page = pages,
                holders = addresses.len(),
                "Paginating holders"
            );
        }

        match page.next_cursor {
            Some(next) if !next.is_empty() => {
                if addresses.len() > limits.max_holders {
                    info!(
                        asset = %short_address(&identity.key),
                        class = %class,
                        holders = addresses.len(),
                        cap = limits.max_holders,
                        "Holder cap reached, stopping pagination"
                    );
                    metrics::increment_holder_truncations(class.label());
                    break FetchStatus::Capped;
                }
                cursor = Some(next);
            }
            _ => break FetchStatus::Complete,
        }
    };

    metrics::record_holder_fetch_duration(class.label(), started.elapsed().as_secs_f64());

    HolderFetch {
        addresses,
        status,
        pages,
    }
}

fn degrade(collected: &[String], reason: String) -> FetchStatus {
    if collected.is_empty() {
        FetchStatus::Failed(reason)
    } else {
        FetchStatus::Partial(reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NftRef;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn nft() -> AssetRef {
        AssetRef::Nft(NftRef {
            network: "ETH_MAINNET".into(),
            address: "0x1111111111111111111111111111111111111111".into(),
            name: "Collection".into(),
        })
    }

    fn limits(max_holders: usize) -> FetchLimits {
        FetchLimits {
            max_holders,
            page_timeout: Duration::from_secs(5),
        }
    }

    /// Endless pages of 100 fresh addresses
    struct EndlessSource {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl HolderSource for EndlessSource {
        fn name(&self) -> &'static str {
            "endless"
        }

        async fn next_page(
            &self,
            _asset: &AssetRef,
            cursor: Option<&str>,
        ) -> Result<HolderPage, AnalysisError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let page: usize = cursor.map(|c| c.parse().unwrap()).unwrap_or(0);
            let addresses = (0..100).map(|i| format!("0x{:040x}", page * 100 + i)).collect();
            Ok(HolderPage {
                addresses,
                next_cursor: Some((page + 1).to_string()),
            })
        }
    }

    /// Two pages, then an error on the third
    struct FlakySource;

    #[async_trait]
    impl HolderSource for FlakySource {
        fn name(&self) -> &'static str {
            "flaky"
        }

        async fn next_page(
            &self,
            _asset: &AssetRef,
            cursor: Option<&str>,
        ) -> Result<HolderPage, AnalysisError> {
            match cursor {
                None => Ok(HolderPage {
                    addresses: vec!["0xAAAA".into()],
                    next_cursor: Some("1".into()),
                }),
                Some("1") => Ok(HolderPage {
                    addresses: vec!["0xbbbb".into()],
                    next_cursor: Some("2".into()),
                }),
                _ => Err(AnalysisError::transient("flaky", "503")),
            }
        }
    }

    struct StalledSource;

    #[async_trait]
    impl HolderSource for StalledSource {
        fn name(&self) -> &'static str {
            "stalled"
        }

        async fn next_page(
            &self,
            _asset: &AssetRef,
            _cursor: Option<&str>,
        ) -> Result<HolderPage, AnalysisError> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_cap_stops_within_one_page() {
        let source = EndlessSource { calls: AtomicUsize::new(0) };
        let fetch = collect_holders(&source, &nft(), limits(150_000), &CancellationToken::new()).await;

        assert_eq!(fetch.status, FetchStatus::Capped);
        assert!(fetch.addresses.len() > 150_000);
        assert!(fetch.addresses.len() <= 150_100);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1_501);
    }

    #[tokio::test]
    async fn test_error_keeps_earlier_pages_and_lowercases() {
        let fetch = collect_holders(&FlakySource, &nft(), limits(1_000), &CancellationToken::new()).await;

        assert!(matches!(fetch.status, FetchStatus::Partial(_)));
        assert_eq!(fetch.addresses, vec!["0xaaaa".to_string(), "0xbbbb".to_string()]);
        assert_eq!(fetch.pages, 2);
        assert!(!fetch.is_cacheable());
    }

    #[tokio::test(start_paused = true)]
    async fn test_page_timeout_degrades_to_failed() {
        let fetch = collect_holders(&StalledSource, &nft(), limits(1_000), &CancellationToken::new()).await;

        match fetch.status {
            FetchStatus::Failed(reason) => assert!(reason.contains("Timeout")),
            other => panic!("unexpected status: {:?}", other),
        }
        assert!(fetch.addresses.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_before_first_page() {
        let token = CancellationToken::new();
        token.cancel();
        let source = EndlessSource { calls: AtomicUsize::new(0) };

        let fetch = collect_holders(&source, &nft(), limits(1_000), &token).await;

        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
        assert_eq!(fetch.status.label(), "failed");
    }

    #[test]
    fn test_for_class_routes_sources() {
        let endless: Arc<dyn HolderSource> = Arc::new(EndlessSource { calls: AtomicUsize::new(0) });
        let flaky: Arc<dyn HolderSource> = Arc::new(FlakySource);
        let stalled: Arc<dyn HolderSource> = Arc::new(StalledSource);
        let sources = HolderSources::new(endless, flaky, stalled);

        assert_eq!(sources.for_class(AssetClass::Nft).name(), "endless");
        assert_eq!(sources.for_class(AssetClass::Poap).name(), "flaky");
        assert_eq!(sources.for_class(AssetClass::Erc20).name(), "stalled");
    }
}
