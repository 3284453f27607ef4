use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

// ========== Asset References ==========

/// The three kinds of asset an analysis can select
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetClass {
    Nft,
    Poap,
    Erc20,
}

impl AssetClass {
    pub const ALL: [AssetClass; 3] = [AssetClass::Nft, AssetClass::Poap, AssetClass::Erc20];

    /// Metric / log label
    pub fn label(&self) -> &'static str {
        match self {
            AssetClass::Nft => "nft",
            AssetClass::Poap => "poap",
            AssetClass::Erc20 => "erc20",
        }
    }

    /// Phase name reported to streaming clients
    pub fn phase(&self) -> &'static str {
        match self {
            AssetClass::Nft => "NFT holders",
            AssetClass::Poap => "POAP holders",
            AssetClass::Erc20 => "ERC-20 holders",
        }
    }
}

impl fmt::Display for AssetClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct NftRef {
    pub network: String,
    pub address: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PoapRef {
    #[serde(rename = "eventId", deserialize_with = "deserialize_event_id")]
    pub event_id: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Erc20Ref {
    #[serde(default = "default_erc20_network")]
    pub network: String,
    pub address: String,
    #[serde(default)]
    pub symbol: String,
    #[serde(default)]
    pub name: String,
}

/// ERC-20 selections historically carried no network; they were Base tokens
fn default_erc20_network() -> String {
    "BASE_MAINNET".to_string()
}

impl NftRef {
    pub fn identity(&self) -> AssetIdentity {
        AssetIdentity {
            class: AssetClass::Nft,
            scope: normalize_network(&self.network),
            key: self.address.trim().to_lowercase(),
        }
    }
}

impl PoapRef {
    pub fn identity(&self) -> AssetIdentity {
        AssetIdentity {
            class: AssetClass::Poap,
            scope: "poap".to_string(),
            key: self.event_id.trim().to_string(),
        }
    }
}

impl Erc20Ref {
    pub fn identity(&self) -> AssetIdentity {
        AssetIdentity {
            class: AssetClass::Erc20,
            scope: normalize_network(&self.network),
            key: self.address.trim().to_lowercase(),
        }
    }
}

/// POAP event ids arrive as either JSON numbers or strings
fn deserialize_event_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Number(u64),
    }

    Ok(match RawId::deserialize(deserializer)? {
        RawId::Text(s) => s.trim().to_string(),
        RawId::Number(n) => n.to_string(),
    })
}

/// One unit to analyze
#[derive(Debug, Clone, PartialEq)]
pub enum AssetRef {
    Nft(NftRef),
    Poap(PoapRef),
    Erc20(Erc20Ref),
}

impl AssetRef {
    pub fn class(&self) -> AssetClass {
        match self {
            AssetRef::Nft(_) => AssetClass::Nft,
            AssetRef::Poap(_) => AssetClass::Poap,
            AssetRef::Erc20(_) => AssetClass::Erc20,
        }
    }

    /// Identity used for dedup: (kind, network-or-chain, address-or-eventId)
    pub fn identity(&self) -> AssetIdentity {
        match self {
            AssetRef::Nft(nft) => nft.identity(),
            AssetRef::Poap(poap) => poap.identity(),
            AssetRef::Erc20(token) => token.identity(),
        }
    }

    pub fn display_name(&self) -> &str {
        match self {
            AssetRef::Nft(nft) => &nft.name,
            AssetRef::Poap(poap) => &poap.name,
            AssetRef::Erc20(token) if !token.symbol.is_empty() => &token.symbol,
            AssetRef::Erc20(token) => &token.name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AssetIdentity {
    pub class: AssetClass,
    pub scope: String,
    pub key: String,
}

impl fmt::Display for AssetIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.class, self.scope, self.key)
    }
}

/// `ETH_MAINNET` and `eth-mainnet` name the same network
pub fn normalize_network(network: &str) -> String {
    network.trim().to_lowercase().replace('_', "-")
}

// ========== Request ==========

#[derive(Deserialize, Debug, Clone, Default)]
pub struct AnalyzeRequest {
    #[serde(default, alias = "sourceWallet")]
    pub address: String,
    #[serde(default)]
    pub nfts: Vec<NftRef>,
    #[serde(default)]
    pub poaps: Vec<PoapRef>,
    #[serde(default)]
    pub erc20s: Vec<Erc20Ref>,
}

impl AnalyzeRequest {
    pub fn total_assets(&self) -> usize {
        self.nfts.len() + self.poaps.len() + self.erc20s.len()
    }

    /// All selections as tagged references, NFTs first
    pub fn assets(&self) -> Vec<AssetRef> {
        self.nfts
            .iter()
            .cloned()
            .map(AssetRef::Nft)
            .chain(self.poaps.iter().cloned().map(AssetRef::Poap))
            .chain(self.erc20s.iter().cloned().map(AssetRef::Erc20))
            .collect()
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct Erc20OverlapRequest {
    #[serde(default, alias = "sourceWallet")]
    pub address: String,
    #[serde(default)]
    pub tokens: Vec<Erc20Ref>,
}

impl From<Erc20OverlapRequest> for AnalyzeRequest {
    fn from(req: Erc20OverlapRequest) -> Self {
        AnalyzeRequest {
            address: req.address,
            erc20s: req.tokens,
            ..Default::default()
        }
    }
}

// ========== Holder Pages ==========

/// One page of holders as returned by a `HolderSource`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HolderPage {
    pub addresses: Vec<String>,
    pub next_cursor: Option<String>,
}

// ========== Overlap ==========

/// Shared assets of one candidate wallet, partitioned by class
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct SharedAssets {
    pub nfts: Vec<NftRef>,
    pub poaps: Vec<PoapRef>,
    pub erc20s: Vec<Erc20Ref>,
}

impl SharedAssets {
    pub fn push(&mut self, asset: &AssetRef) {
        match asset {
            AssetRef::Nft(nft) => self.nfts.push(nft.clone()),
            AssetRef::Poap(poap) => self.poaps.push(poap.clone()),
            AssetRef::Erc20(token) => self.erc20s.push(token.clone()),
        }
    }

    pub fn len(&self) -> usize {
        self.nfts.len() + self.poaps.len() + self.erc20s.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Position of an asset in one analysis' asset registry. Slots are assigned
/// per distinct identity, so slot equality is identity equality.
pub type AssetSlot = u32;

/// Per-candidate overlap state: the distinct assets this wallet shares with
/// the source wallet. The count is the length of `slots`, so it can never
/// disagree with the shared asset list materialized from them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OverlapRecord {
    slots: Vec<AssetSlot>,
}

impl OverlapRecord {
    /// Record that the wallet holds the asset in `slot`. Returns false when
    /// the asset was already counted for this wallet.
    pub fn add(&mut self, slot: AssetSlot) -> bool {
        if self.slots.contains(&slot) {
            return false;
        }
        self.slots.push(slot);
        true
    }

    pub fn count(&self) -> usize {
        self.slots.len()
    }

    pub fn slots(&self) -> &[AssetSlot] {
        &self.slots
    }
}

// ========== Result ==========

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KindredSpirit {
    pub address: String,
    pub overlap_count: usize,
    /// `count / totalSelectedAssets * 100`, one decimal
    pub overlap_percentage: String,
    pub shared_assets: SharedAssets,
    pub total_shared: usize,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct AnalyzedAssets {
    pub nfts: usize,
    pub poaps: usize,
    pub erc20s: usize,
    pub total: usize,
}

/// Per-asset fetch outcomes, so callers can tell a partial result
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct FetchSummary {
    pub completed: usize,
    pub truncated: usize,
    pub partial: usize,
    pub failed: usize,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeResult {
    pub success: bool,
    pub wallet_address: String,
    pub analyzed_assets: AnalyzedAssets,
    pub kindred_spirits: Vec<KindredSpirit>,
    pub total_kindred_spirits: usize,
    pub min_overlap_threshold: usize,
    pub total_wallets_with_any_overlap: usize,
    pub max_holder_limit: usize,
    pub fetch_summary: FetchSummary,
}
