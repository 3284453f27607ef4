// Result Compilation
//
// Filters the overlap map by the minimum-overlap threshold, keeps the top K
// survivors, and shapes the response payload.

use crate::constants::{MULTI_ASSET_MIN_OVERLAP, SINGLE_ASSET_MIN_OVERLAP};
use crate::overlap::OverlapMap;
use crate::topk::{Candidate, TopK};
use crate::types::{AnalyzeResult, AnalyzedAssets, FetchSummary, KindredSpirit};

/// Minimum shared assets a wallet needs to be ranked.
///
/// With two or more assets analyzed, a single shared asset is usually just
/// a very popular collection, so more is required.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThresholdRule {
    pub multi_asset_min: usize,
    pub single_asset_min: usize,
}

impl Default for ThresholdRule {
    fn default() -> Self {
        Self {
            multi_asset_min: MULTI_ASSET_MIN_OVERLAP,
            single_asset_min: SINGLE_ASSET_MIN_OVERLAP,
        }
    }
}

impl ThresholdRule {
    /// Any shared asset qualifies, whatever the selection size
    pub fn any_overlap() -> Self {
        Self {
            multi_asset_min: 1,
            single_asset_min: 1,
        }
    }

    pub fn threshold(&self, total_assets: usize) -> usize {
        if total_assets >= 2 {
            self.multi_asset_min
        } else {
            self.single_asset_min
        }
    }
}

/// `count / total * 100` with one decimal
pub fn overlap_percentage(count: usize, total: usize) -> String {
    if total == 0 {
        return "0.0".to_string();
    }
    format!("{:.1}", count as f64 / total as f64 * 100.0)
}

#[derive(Debug, Clone, Copy)]
pub struct ResultCompiler {
    pub top_k: usize,
    pub rule: ThresholdRule,
    pub max_holder_limit: usize,
}

impl ResultCompiler {
    pub fn new(top_k: usize, rule: ThresholdRule, max_holder_limit: usize) -> Self {
        Self {
            top_k,
            rule,
            max_holder_limit,
        }
    }

    pub fn compile(
        &self,
        map: &OverlapMap,
        analyzed: AnalyzedAssets,
        fetch_summary: FetchSummary,
    ) -> AnalyzeResult {
        let total_assets = analyzed.total;
        let threshold = self.rule.threshold(total_assets);

        let mut top = TopK::new(self.top_k);
        for (address, record) in map.records() {
            if record.count() >= threshold {
                top.push(Candidate {
                    address: address.as_str(),
                    count: record.count(),
                });
            }
        }

        let kindred_spirits: Vec<KindredSpirit> = top
            .into_sorted_vec()
            .into_iter()
            .filter_map(|candidate| {
                let record = map.record(candidate.address)?;
                let shared_assets = map.shared_assets(record);
                Some(KindredSpirit {
                    address: candidate.address.to_string(),
                    overlap_count: candidate.count,
                    overlap_percentage: overlap_percentage(candidate.count, total_assets),
                    total_shared: shared_assets.len(),
                    shared_assets,
                })
            })
            .collect();

        AnalyzeResult {
            success: true,
            wallet_address: map.source_wallet().to_string(),
            analyzed_assets: analyzed,
            total_kindred_spirits: kindred_spirits.len(),
            kindred_spirits,
            min_overlap_threshold: threshold,
            total_wallets_with_any_overlap: map.len(),
            max_holder_limit: self.max_holder_limit,
            fetch_summary,
        }
    }
}
