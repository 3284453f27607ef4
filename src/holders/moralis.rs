// ERC-20 holders via the Moralis `erc20/{address}/owners` endpoint
//
// Moralis accepts a chain either by name or by hex id and has not always
// answered both. The first page tries the name, then the hex id; the chain
// that answered is carried in the cursor (`base|<moralis cursor>`).

use async_trait::async_trait;
use serde::Deserialize;

use super::HolderSource;
use crate::constants::{MORALIS_API_BASE, MORALIS_PAGE_SIZE};
use crate::error::{AnalysisError, FetchError};
use crate::retry::RetryingFetcher;
use crate::types::{normalize_network, AssetRef, HolderPage};
use crate::validation::is_valid_address;

const PROVIDER: &str = "moralis";

/// Moralis chain identifiers (name, hex id) for a network name
pub fn moralis_chains(network: &str) -> [&'static str; 2] {
    match normalize_network(network).as_str() {
        "eth-mainnet" => ["eth", "0x1"],
        "matic-mainnet" | "polygon-mainnet" => ["polygon", "0x89"],
        "arb-mainnet" => ["arbitrum", "0xa4b1"],
        "opt-mainnet" => ["optimism", "0xa"],
        _ => ["base", "0x2105"],
    }
}

#[derive(Deserialize, Debug)]
struct OwnerEntry {
    owner_address: Option<String>,
}

#[derive(Deserialize, Debug)]
struct OwnersResponse {
    #[serde(default)]
    result: Vec<OwnerEntry>,
    cursor: Option<String>,
}

fn split_cursor(cursor: &str) -> Option<(&str, &str)> {
    cursor.split_once('|').filter(|(chain, rest)| !chain.is_empty() && !rest.is_empty())
}

pub struct MoralisSource {
    fetcher: RetryingFetcher,
    api_key: Option<String>,
    page_size: usize,
    base_url: String,
}

impl MoralisSource {
    pub fn new(fetcher: RetryingFetcher, api_key: Option<String>, page_size: usize) -> Self {
        Self {
            fetcher,
            api_key,
            // larger pages are rejected on the free plan
            page_size: page_size.clamp(1, MORALIS_PAGE_SIZE),
            base_url: MORALIS_API_BASE.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    async fn fetch_owners(
        &self,
        token: &str,
        chain: &str,
        cursor: Option<&str>,
        api_key: &str,
    ) -> Result<Option<OwnersResponse>, AnalysisError> {
        let url = format!("{}/erc20/{}/owners", self.base_url, token);
        let limit = self.page_size.to_string();
        let mut query = vec![("chain", chain), ("limit", limit.as_str())];
        if let Some(c) = cursor {
            query.push(("cursor", c));
        }

        let response = self
            .fetcher
            .get(PROVIDER, &url, &query, &[("X-API-Key", api_key)])
            .await
            .map_err(|e| AnalysisError::from_fetch(PROVIDER, e))?;

        if !response.status().is_success() {
            tracing::debug!(
                token = token,
                chain = chain,
                status = response.status().as_u16(),
                "Moralis chain format rejected"
            );
            return Ok(None);
        }

        let body = response
            .json::<OwnersResponse>()
            .await
            .map_err(|e| AnalysisError::from_fetch(PROVIDER, FetchError::from(e)))?;
        Ok(Some(body))
    }
}

fn into_page(chain: &str, body: OwnersResponse) -> HolderPage {
    HolderPage {
        addresses: body.result.into_iter().filter_map(|o| o.owner_address).collect(),
        next_cursor: body
            .cursor
            .filter(|c| !c.is_empty())
            .map(|c| format!("{}|{}", chain, c)),
    }
}

#[async_trait]
impl HolderSource for MoralisSource {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    async fn next_page(
        &self,
        asset: &AssetRef,
        cursor: Option<&str>,
    ) -> Result<HolderPage, AnalysisError> {
        let token = match asset {
            AssetRef::Erc20(token) => token,
            other => {
                return Err(AnalysisError::permanent(
                    PROVIDER,
                    format!("cannot list holders of {} assets", other.class()),
                ))
            }
        };
        let address = token.address.trim();
        if !is_valid_address(address) {
            return Err(AnalysisError::permanent(
                PROVIDER,
                format!("invalid token address {:?}", address),
            ));
        }

        let api_key = self
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| AnalysisError::Config("MORALIS_API_KEY is not set".to_string()))?;

        if let Some(cursor) = cursor {
            let (chain, inner) = split_cursor(cursor).ok_or_else(|| {
                AnalysisError::AggregationInternal(format!("malformed Moralis cursor {:?}", cursor))
            })?;
            return match self.fetch_owners(address, chain, Some(inner), api_key).await? {
                Some(body) => Ok(into_page(chain, body)),
                None => Err(AnalysisError::permanent(
                    PROVIDER,
                    format!("chain {} stopped answering for {}", chain, address),
                )),
            };
        }

        // First page: use the first chain format that yields owners
        let mut last_empty: Option<HolderPage> = None;
        for chain in moralis_chains(&token.network) {
            if let Some(body) = self.fetch_owners(address, chain, None, api_key).await? {
                let page = into_page(chain, body);
                if !page.addresses.is_empty() {
                    return Ok(page);
                }
                last_empty = Some(page);
            }
        }

        last_empty.ok_or_else(|| {
            AnalysisError::permanent(
                PROVIDER,
                format!("token {} rejected on every chain format", address),
            )
        })
    }
}
