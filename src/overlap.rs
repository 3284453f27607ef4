/// Overlap Aggregation
///
/// Folds per-asset holder lists into one map of wallet → overlap record.
/// The fold runs sequentially after every fetch has settled, so the map is
/// owned by a single task and needs no locking.
///
/// Assets are registered once per analysis and referred to by slot. A
/// wallet's record stores slots, never cloned asset data; shared asset lists
/// are only materialized for the few records that make the final ranking.

use std::borrow::Cow;
use std::collections::HashMap;

use crate::error::AnalysisError;
use crate::types::{AssetIdentity, AssetRef, AssetSlot, OverlapRecord, SharedAssets};

#[derive(Debug, Default)]
pub struct OverlapMap {
    source_wallet: String,
    assets: Vec<AssetRef>,
    slots: HashMap<AssetIdentity, AssetSlot>,
    records: HashMap<String, OverlapRecord>,
}

impl OverlapMap {
    pub fn new(source_wallet: &str) -> Self {
        Self {
            source_wallet: source_wallet.trim().to_lowercase(),
            ..Default::default()
        }
    }

    /// Slot for `asset`; registering the same identity twice returns the
    /// same slot.
    pub fn register(&mut self, asset: &AssetRef) -> AssetSlot {
        let identity = asset.identity();
        if let Some(slot) = self.slots.get(&identity) {
            return *slot;
        }

        let slot = self.assets.len() as AssetSlot;
        self.assets.push(asset.clone());
        self.slots.insert(identity, slot);
        slot
    }

    /// Add the asset in `slot` to the record of every holder.
    ///
    /// The source wallet is skipped, and a wallet listed more than once
    /// counts the asset once. Returns how many records gained the asset.
    pub fn fold(&mut self, slot: AssetSlot, holders: &[String]) -> Result<usize, AnalysisError> {
        if slot as usize >= self.assets.len() {
            return Err(AnalysisError::AggregationInternal(format!(
                "fold into unregistered asset slot {}",
                slot
            )));
        }

        let mut added = 0;
        for holder in holders {
            if holder.eq_ignore_ascii_case(&self.source_wallet) {
                continue;
            }

            let key: Cow<str> = if holder.bytes().any(|b| b.is_ascii_uppercase()) {
                Cow::Owned(holder.to_ascii_lowercase())
            } else {
                Cow::Borrowed(holder.as_str())
            };

            let gained = match self.records.get_mut(key.as_ref()) {
                Some(record) => record.add(slot),
                None => {
                    let mut record = OverlapRecord::default();
                    record.add(slot);
                    self.records.insert(key.into_owned(), record);
                    true
                }
            };
            if gained {
                added += 1;
            }
        }

        Ok(added)
    }

    pub fn asset(&self, slot: AssetSlot) -> Option<&AssetRef> {
        self.assets.get(slot as usize)
    }

    /// Distinct assets registered for this analysis
    pub fn total_assets(&self) -> usize {
        self.assets.len()
    }

    /// Wallets sharing at least one asset
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> impl Iterator<Item = (&String, &OverlapRecord)> {
        self.records.iter()
    }

    pub fn record(&self, wallet: &str) -> Option<&OverlapRecord> {
        self.records.get(&wallet.to_lowercase())
    }

    pub fn source_wallet(&self) -> &str {
        &self.source_wallet
    }

    /// Shared assets of one record, in slot order per class
    pub fn shared_assets(&self, record: &OverlapRecord) -> SharedAssets {
        let mut slots = record.slots().to_vec();
        slots.sort_unstable();

        let mut shared = SharedAssets::default();
        for slot in slots {
            if let Some(asset) = self.asset(slot) {
                shared.push(asset);
            }
        }
        shared
    }
}
