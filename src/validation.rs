// Input Validation
//
// Checks the source wallet and the selected assets before any provider call
// is made. A request that fails here never reaches the aggregator.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

use crate::error::AnalysisError;
use crate::types::{AnalyzeRequest, AnalyzedAssets, AssetClass, AssetRef};

/// `0x` followed by 40 hex characters
static ETH_ADDRESS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^0x[a-fA-F0-9]{40}$").expect("static regex"));

/// Dot-separated labels ending in `.eth`
static ENS_NAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-zA-Z0-9]([a-zA-Z0-9-]*[a-zA-Z0-9])?(\.[a-zA-Z0-9]([a-zA-Z0-9-]*[a-zA-Z0-9])?)*\.eth$")
        .expect("static regex")
});

static EVENT_ID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+$").expect("static regex"));

pub fn is_valid_address(address: &str) -> bool {
    ETH_ADDRESS_RE.is_match(address)
}

pub fn is_valid_ens(name: &str) -> bool {
    ENS_NAME_RE.is_match(name)
}

pub fn is_valid_address_or_ens(input: &str) -> bool {
    is_valid_address(input) || is_valid_ens(input)
}

pub fn is_valid_event_id(id: &str) -> bool {
    EVENT_ID_RE.is_match(id)
}

/// A request that passed validation: lowercase source wallet and the
/// selected assets with duplicates (by identity) removed.
#[derive(Debug, Clone)]
pub struct ValidatedRequest {
    pub source_wallet: String,
    pub assets: Vec<AssetRef>,
}

impl ValidatedRequest {
    pub fn analyzed_assets(&self) -> AnalyzedAssets {
        let count = |class: AssetClass| self.assets.iter().filter(|a| a.class() == class).count();
        AnalyzedAssets {
            nfts: count(AssetClass::Nft),
            poaps: count(AssetClass::Poap),
            erc20s: count(AssetClass::Erc20),
            total: self.assets.len(),
        }
    }
}

/// Validate the source wallet and the asset selection.
///
/// Malformed individual asset references are not rejected here; the holder
/// source for that asset reports them and the asset is skipped.
pub fn validate_request(request: &AnalyzeRequest) -> Result<ValidatedRequest, AnalysisError> {
    let source_wallet = request.address.trim().to_lowercase();

    if source_wallet.is_empty() {
        return Err(AnalysisError::Validation("Missing address parameter".to_string()));
    }

    if !is_valid_address_or_ens(&source_wallet) {
        return Err(AnalysisError::Validation(
            "Invalid address format. Expected Ethereum address (0x...) or ENS name (*.eth)"
                .to_string(),
        ));
    }

    if request.total_assets() == 0 {
        return Err(AnalysisError::Validation("No assets selected for analysis".to_string()));
    }

    let mut seen = HashSet::new();
    let assets: Vec<AssetRef> = request
        .assets()
        .into_iter()
        .filter(|asset| seen.insert(asset.identity()))
        .collect();

    Ok(ValidatedRequest {
        source_wallet,
        assets,
    })
}
