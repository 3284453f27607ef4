/// Overlap Aggregator
///
/// Drives one analysis through its phases:
///
/// ```text
/// Idle → FetchingPerAssetClass → Aggregating → Done
/// ```
///
/// Fetching: every selected asset (NFT, POAP, ERC-20 alike) goes through one
/// `ConcurrencyLimiter`, so the in-flight ceiling holds across classes. Each
/// fetch returns its own holder list; nothing shared is written while
/// fetches run.
///
/// Aggregating: after all fetches settled, the holder lists are folded into
/// the overlap map one at a time, then ranked by `ResultCompiler`.
///
/// A failing asset contributes nothing and is counted in the fetch summary;
/// the analysis itself only fails when cancelled.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::{CachedHolders, HolderCache};
use crate::compiler::{ResultCompiler, ThresholdRule};
use crate::concurrency::ConcurrencyLimiter;
use crate::config::Settings;
use crate::constants::{
    DEFAULT_CONCURRENCY, DEFAULT_PAGE_TIMEOUT, DEFAULT_TOP_K, MAX_HOLDERS_PER_ASSET,
};
use crate::error::AnalysisError;
use crate::holders::{collect_holders, FetchLimits, FetchStatus, HolderSources};
use crate::metrics::{self, Timer};
use crate::overlap::OverlapMap;
use crate::progress::ProgressReporter;
use crate::telemetry::short_address;
use crate::types::{AnalyzeResult, AssetClass, AssetRef, FetchSummary};
use crate::validation::ValidatedRequest;

const RESULTS_PHASE: &str = "Calculating results";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AnalysisPhase {
    Idle,
    FetchingPerAssetClass,
    Aggregating,
    Done,
}

/// Phase tracker for one analysis; phases only move forward
#[derive(Debug)]
struct PhaseTracker {
    phase: AnalysisPhase,
    wallet: String,
}

impl PhaseTracker {
    fn new(wallet: &str) -> Self {
        Self {
            phase: AnalysisPhase::Idle,
            wallet: short_address(wallet),
        }
    }

    fn enter(&mut self, next: AnalysisPhase) {
        debug_assert!(next > self.phase, "phase {:?} after {:?}", next, self.phase);
        debug!(wallet = %self.wallet, from = ?self.phase, to = ?next, "Analysis phase");
        self.phase = next;
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AggregatorConfig {
    pub concurrency: usize,
    pub limits: FetchLimits,
    pub compiler: ResultCompiler,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            limits: FetchLimits {
                max_holders: MAX_HOLDERS_PER_ASSET,
                page_timeout: DEFAULT_PAGE_TIMEOUT,
            },
            compiler: ResultCompiler::new(
                DEFAULT_TOP_K,
                ThresholdRule::default(),
                MAX_HOLDERS_PER_ASSET,
            ),
        }
    }
}

impl AggregatorConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        let analysis = &settings.analysis;
        Self {
            concurrency: analysis.concurrency,
            limits: FetchLimits {
                max_holders: analysis.max_holders_per_asset,
                page_timeout: Duration::from_secs(analysis.page_timeout_secs),
            },
            compiler: ResultCompiler::new(
                analysis.top_k,
                analysis.threshold_rule(),
                analysis.max_holders_per_asset,
            ),
        }
    }
}

/// Holders of one asset, fetched or served from cache
#[derive(Debug, Clone)]
struct AssetHolders {
    addresses: Arc<Vec<String>>,
    status: FetchStatus,
}

#[derive(Clone)]
pub struct OverlapAggregator {
    sources: HolderSources,
    cache: Arc<HolderCache>,
    config: AggregatorConfig,
}

impl OverlapAggregator {
    pub fn new(sources: HolderSources, cache: Arc<HolderCache>, config: AggregatorConfig) -> Self {
        Self {
            sources,
            cache,
            config,
        }
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    /// Same sources and cache, different ranking (ERC-20-only endpoint)
    pub fn with_ranking(&self, top_k: usize, rule: ThresholdRule) -> Self {
        let mut aggregator = self.clone();
        aggregator.config.compiler.top_k = top_k;
        aggregator.config.compiler.rule = rule;
        aggregator
    }

    /// Run one analysis over an already validated request.
    pub async fn analyze(
        &self,
        request: &ValidatedRequest,
        reporter: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<AnalyzeResult, AnalysisError> {
        let timer = Timer::new();
        let mut tracker = PhaseTracker::new(&request.source_wallet);
        let analyzed = request.analyzed_assets();

        info!(
            wallet = %short_address(&request.source_wallet),
            nfts = analyzed.nfts,
            poaps = analyzed.poaps,
            erc20s = analyzed.erc20s,
            concurrency = self.config.concurrency,
            "Starting overlap analysis"
        );

        // ===== Fetch =====
        tracker.enter(AnalysisPhase::FetchingPerAssetClass);

        let class_totals = AssetClass::ALL.map(|class| {
            request.assets.iter().filter(|a| a.class() == class).count()
        });
        let class_done = [AtomicUsize::new(0), AtomicUsize::new(0), AtomicUsize::new(0)];

        for (class, total) in AssetClass::ALL.iter().zip(class_totals) {
            if total > 0 {
                reporter.progress(class.phase(), 0, total);
            }
        }

        let limiter = ConcurrencyLimiter::new(self.config.concurrency);
        let fetched: Vec<AssetHolders> = limiter
            .run(request.assets.iter(), |asset| {
                let index = class_index(asset.class());
                let total = class_totals[index];
                let done = &class_done[index];
                async move {
                    metrics::inc_asset_fetches_in_flight();
                    let holders = self.fetch_asset(asset, cancel).await;
                    metrics::dec_asset_fetches_in_flight();

                    let current = done.fetch_add(1, Ordering::SeqCst) + 1;
                    reporter.progress(asset.class().phase(), current, total);
                    holders
                }
            })
            .await;

        if cancel.is_cancelled() {
            metrics::increment_analyses("cancelled");
            info!(wallet = %tracker.wallet, "Analysis cancelled");
            return Err(AnalysisError::Cancelled);
        }

        // ===== Aggregate =====
        tracker.enter(AnalysisPhase::Aggregating);
        reporter.progress(RESULTS_PHASE, 0, 1);

        let mut map = OverlapMap::new(&request.source_wallet);
        let mut summary = FetchSummary::default();

        for (asset, holders) in request.assets.iter().zip(fetched) {
            match &holders.status {
                FetchStatus::Complete => summary.completed += 1,
                FetchStatus::Capped => summary.truncated += 1,
                FetchStatus::Partial(_) => summary.partial += 1,
                FetchStatus::Failed(_) => summary.failed += 1,
            }

            let slot = map.register(asset);
            if let Err(e) = map.fold(slot, &holders.addresses) {
                warn!(asset = %asset.identity(), error = %e, "Skipping asset during fold");
                metrics::increment_asset_fetch_failures(asset.class().label(), e.kind());
            }
        }

        let result = self.config.compiler.compile(&map, analyzed, summary);
        reporter.progress(RESULTS_PHASE, 1, 1);
        tracker.enter(AnalysisPhase::Done);

        let outcome = if result.fetch_summary.partial + result.fetch_summary.failed > 0 {
            "partial"
        } else {
            "complete"
        };
        metrics::increment_analyses(outcome);
        metrics::record_analysis_duration(timer.elapsed_secs());

        info!(
            wallet = %tracker.wallet,
            candidates = result.total_wallets_with_any_overlap,
            kindred_spirits = result.total_kindred_spirits,
            threshold = result.min_overlap_threshold,
            completed = result.fetch_summary.completed,
            truncated = result.fetch_summary.truncated,
            partial = result.fetch_summary.partial,
            failed = result.fetch_summary.failed,
            duration_secs = timer.elapsed_secs(),
            "Overlap analysis finished"
        );

        Ok(result)
    }

    async fn fetch_asset(&self, asset: &AssetRef, cancel: &CancellationToken) -> AssetHolders {
        let identity = asset.identity();

        if let Some(cached) = self.cache.get_holders(&identity).await {
            debug!(asset = %identity, holders = cached.addresses.len(), "Holder cache hit");
            return AssetHolders {
                addresses: cached.addresses,
                status: if cached.capped {
                    FetchStatus::Capped
                } else {
                    FetchStatus::Complete
                },
            };
        }

        let source = self.sources.for_class(asset.class());
        let fetch = collect_holders(source.as_ref(), asset, self.config.limits, cancel).await;

        debug!(
            asset = %identity,
            provider = source.name(),
            pages = fetch.pages,
            holders = fetch.addresses.len(),
            status = fetch.status.label(),
            "Holder fetch finished"
        );

        let cacheable = fetch.is_cacheable();
        let addresses = Arc::new(fetch.addresses);
        if cacheable {
            self.cache
                .put_holders(
                    &identity,
                    CachedHolders {
                        addresses: addresses.clone(),
                        capped: fetch.status == FetchStatus::Capped,
                    },
                )
                .await;
        }

        AssetHolders {
            addresses,
            status: fetch.status,
        }
    }
}

fn class_index(class: AssetClass) -> usize {
    match class {
        AssetClass::Nft => 0,
        AssetClass::Poap => 1,
        AssetClass::Erc20 => 2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::holders::HolderSource;
    use crate::progress::AnalysisEvent;
    use crate::types::{HolderPage, NftRef, PoapRef};
    use async_trait::async_trait;
    use std::collections::HashMap;

    const SOURCE: &str = "0x000000000000000000000000000000000000abcd";

    /// Holder lists keyed by asset identity key, one page each
    struct MapSource {
        holders: HashMap<String, Vec<&'static str>>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl HolderSource for MapSource {
        fn name(&self) -> &'static str {
            "map"
        }

        async fn next_page(
            &self,
            asset: &AssetRef,
            _cursor: Option<&str>,
        ) -> Result<HolderPage, AnalysisError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.holders.get(&asset.identity().key) {
                Some(list) => Ok(HolderPage {
                    addresses: list.iter().map(|s| s.to_string()).collect(),
                    next_cursor: None,
                }),
                None => Err(AnalysisError::permanent("map", "unknown asset")),
            }
        }
    }

    fn nft(address: &str) -> AssetRef {
        AssetRef::Nft(NftRef {
            network: "ETH_MAINNET".into(),
            address: address.into(),
            name: address.into(),
        })
    }

    fn poap(id: &str) -> AssetRef {
        AssetRef::Poap(PoapRef { event_id: id.into(), name: id.into() })
    }

    fn aggregator(source: Arc<MapSource>, cache: HolderCache) -> OverlapAggregator {
        let sources = HolderSources::new(source.clone(), source.clone(), source);
        OverlapAggregator::new(sources, Arc::new(cache), AggregatorConfig::default())
    }

    fn source() -> Arc<MapSource> {
        let mut holders = HashMap::new();
        holders.insert("0xaaaa".to_string(), vec!["0xw1", "0xw2", SOURCE]);
        holders.insert("7".to_string(), vec!["0xw1", "0xw3"]);
        Arc::new(MapSource { holders, calls: AtomicUsize::new(0) })
    }

    #[tokio::test]
    async fn test_streams_progress_per_class_then_results() {
        let agg = aggregator(source(), HolderCache::disabled());
        let request = ValidatedRequest {
            source_wallet: SOURCE.into(),
            assets: vec![nft("0xaaaa"), poap("7")],
        };
        let (reporter, mut rx) = ProgressReporter::channel(64);

        let result = agg
            .analyze(&request, &reporter, &CancellationToken::new())
            .await
            .unwrap();
        drop(reporter);

        let mut phases = Vec::new();
        while let Some(event) = rx.recv().await {
            if let AnalysisEvent::Progress { phase, current, total } = event {
                phases.push((phase, current, total));
            }
        }

        assert!(phases.contains(&("NFT holders".to_string(), 0, 1)));
        assert!(phases.contains(&("NFT holders".to_string(), 1, 1)));
        assert!(phases.contains(&("POAP holders".to_string(), 1, 1)));
        assert!(!phases.iter().any(|(p, _, _)| p == "ERC-20 holders"));
        assert_eq!(phases.last().unwrap(), &("Calculating results".to_string(), 1, 1));

        // 0xw1 shares both assets, everyone else only one
        assert_eq!(result.min_overlap_threshold, 2);
        assert_eq!(result.total_wallets_with_any_overlap, 3);
        assert_eq!(result.kindred_spirits.len(), 1);
        assert_eq!(result.kindred_spirits[0].address, "0xw1");
        assert_eq!(result.fetch_summary.completed, 2);
    }

    #[tokio::test]
    async fn test_failed_asset_is_counted_not_fatal() {
        let agg = aggregator(source(), HolderCache::disabled());
        let request = ValidatedRequest {
            source_wallet: SOURCE.into(),
            assets: vec![nft("0xaaaa"), poap("999")],
        };

        let result = agg
            .analyze(&request, &ProgressReporter::disabled(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.fetch_summary.completed, 1);
        assert_eq!(result.fetch_summary.failed, 1);
        assert_eq!(result.total_wallets_with_any_overlap, 2);
        assert!(result.kindred_spirits.is_empty());
    }

    #[tokio::test]
    async fn test_cache_serves_repeat_analyses() {
        let source = source();
        let agg = aggregator(source.clone(), HolderCache::new(8, Duration::from_secs(60)));
        let request = ValidatedRequest {
            source_wallet: SOURCE.into(),
            assets: vec![nft("0xaaaa"), poap("7")],
        };

        let first = agg
            .analyze(&request, &ProgressReporter::disabled(), &CancellationToken::new())
            .await
            .unwrap();
        let second = agg
            .analyze(&request, &ProgressReporter::disabled(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_cancelled_analysis_stops_fetching() {
        let source = source();
        let agg = aggregator(source.clone(), HolderCache::disabled());
        let request = ValidatedRequest {
            source_wallet: SOURCE.into(),
            assets: vec![nft("0xaaaa"), poap("7")],
        };
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = agg
            .analyze(&request, &ProgressReporter::disabled(), &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, AnalysisError::Cancelled));
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_phases_are_ordered() {
        assert!(AnalysisPhase::Idle < AnalysisPhase::FetchingPerAssetClass);
        assert!(AnalysisPhase::FetchingPerAssetClass < AnalysisPhase::Aggregating);
        assert!(AnalysisPhase::Aggregating < AnalysisPhase::Done);
    }
}
