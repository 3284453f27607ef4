// NFT holders via Alchemy `getOwnersForContract`

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;

use super::HolderSource;
use crate::constants::ALCHEMY_NFT_API_VERSION;
use crate::error::{AnalysisError, FetchError};
use crate::retry::RetryingFetcher;
use crate::types::{normalize_network, AssetRef, HolderPage};
use crate::validation::is_valid_address;

const PROVIDER: &str = "alchemy";

/// Alchemy host prefix for a network given as `ETH_MAINNET` or `eth-mainnet`
pub fn alchemy_subdomain(network: &str) -> Option<&'static str> {
    match normalize_network(network).as_str() {
        "eth-mainnet" => Some("eth-mainnet"),
        "matic-mainnet" | "polygon-mainnet" => Some("polygon-mainnet"),
        "arb-mainnet" => Some("arb-mainnet"),
        "opt-mainnet" => Some("opt-mainnet"),
        "base-mainnet" => Some("base-mainnet"),
        "zora-mainnet" => Some("zora-mainnet"),
        _ => None,
    }
}

#[derive(Deserialize, Debug)]
#[serde(untagged)]
enum Owner {
    Plain(String),
    Detailed {
        #[serde(rename = "ownerAddress")]
        owner_address: Option<String>,
    },
}

#[derive(Deserialize, Debug)]
struct OwnersResponse {
    #[serde(default)]
    owners: Vec<Owner>,
    #[serde(rename = "pageKey")]
    page_key: Option<String>,
}

impl From<OwnersResponse> for HolderPage {
    fn from(resp: OwnersResponse) -> Self {
        let addresses = resp
            .owners
            .into_iter()
            .filter_map(|owner| match owner {
                Owner::Plain(address) => Some(address),
                Owner::Detailed { owner_address } => owner_address,
            })
            .collect();

        HolderPage {
            addresses,
            next_cursor: resp.page_key.filter(|k| !k.is_empty()),
        }
    }
}

pub struct AlchemySource {
    fetcher: RetryingFetcher,
    api_key: Option<String>,
    /// Per-network keys, keyed by normalized network name
    network_keys: HashMap<String, String>,
    /// Replaces `https://{network}.g.alchemy.com` when set
    base_url: Option<String>,
}

impl AlchemySource {
    pub fn new(
        fetcher: RetryingFetcher,
        api_key: Option<String>,
        network_keys: HashMap<String, String>,
    ) -> Self {
        let network_keys = network_keys
            .into_iter()
            .map(|(network, key)| (normalize_network(&network), key))
            .collect();

        Self {
            fetcher,
            api_key,
            network_keys,
            base_url: None,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into().trim_end_matches('/').to_string());
        self
    }

    fn host(&self, subdomain: &str) -> String {
        match &self.base_url {
            Some(base) => base.clone(),
            None => format!("https://{}.g.alchemy.com", subdomain),
        }
    }

    fn key_for(&self, network: &str) -> Option<&str> {
        self.network_keys
            .get(&normalize_network(network))
            .or(self.api_key.as_ref())
            .map(String::as_str)
            .filter(|k| !k.is_empty())
    }
}

#[async_trait]
impl HolderSource for AlchemySource {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    async fn next_page(
        &self,
        asset: &AssetRef,
        cursor: Option<&str>,
    ) -> Result<HolderPage, AnalysisError> {
        let nft = match asset {
            AssetRef::Nft(nft) => nft,
            other => {
                return Err(AnalysisError::permanent(
                    PROVIDER,
                    format!("cannot list holders of {} assets", other.class()),
                ))
            }
        };

        let contract = nft.address.trim();
        if !is_valid_address(contract) {
            return Err(AnalysisError::permanent(
                PROVIDER,
                format!("invalid contract address {:?}", contract),
            ));
        }

        let subdomain = alchemy_subdomain(&nft.network).ok_or_else(|| {
            AnalysisError::permanent(PROVIDER, format!("unsupported network {}", nft.network))
        })?;
        let key = self.key_for(&nft.network).ok_or_else(|| {
            AnalysisError::Config(format!("no Alchemy API key for {}", nft.network))
        })?;

        let url = format!(
            "{}/nft/{}/{}/getOwnersForContract",
            self.host(subdomain),
            ALCHEMY_NFT_API_VERSION,
            key
        );
        let mut query = vec![("contractAddress", contract), ("withTokenBalances", "false")];
        if let Some(page_key) = cursor {
            query.push(("pageKey", page_key));
        }

        let response = self
            .fetcher
            .get(PROVIDER, &url, &query, &[])
            .await
            .map_err(|e| AnalysisError::from_fetch(PROVIDER, e))?;

        if !response.status().is_success() {
            return Err(AnalysisError::permanent(
                PROVIDER,
                format!("status {} for contract {}", response.status(), contract),
            ));
        }

        let body: OwnersResponse = response
            .json()
            .await
            .map_err(|e| AnalysisError::from_fetch(PROVIDER, FetchError::from(e)))?;

        Ok(body.into())
    }
}
