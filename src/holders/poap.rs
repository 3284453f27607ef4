// POAP event holders via api.poap.tech
//
// The legacy `/token-holders` path is tried first and `/poaps` is the
// fallback. Once a path answers, later pages stay on it: the cursor carries
// the path along with the next offset (`legacy:500`, `poaps:300`).

use async_trait::async_trait;
use serde_json::Value;

use super::HolderSource;
use crate::constants::{POAP_API_BASE, POAP_LEGACY_PAGE_SIZE, POAP_PAGE_SIZE};
use crate::error::{AnalysisError, FetchError};
use crate::retry::RetryingFetcher;
use crate::types::{AssetRef, HolderPage};
use crate::validation::is_valid_event_id;

const PROVIDER: &str = "poap";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PoapPath {
    Legacy,
    Poaps,
}

impl PoapPath {
    fn segment(self) -> &'static str {
        match self {
            PoapPath::Legacy => "token-holders",
            PoapPath::Poaps => "poaps",
        }
    }

    fn page_size(self) -> usize {
        match self {
            PoapPath::Legacy => POAP_LEGACY_PAGE_SIZE,
            PoapPath::Poaps => POAP_PAGE_SIZE,
        }
    }

    fn tag(self) -> &'static str {
        match self {
            PoapPath::Legacy => "legacy",
            PoapPath::Poaps => "poaps",
        }
    }

    fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "legacy" => Some(PoapPath::Legacy),
            "poaps" => Some(PoapPath::Poaps),
            _ => None,
        }
    }
}

fn encode_cursor(path: PoapPath, offset: usize) -> String {
    format!("{}:{}", path.tag(), offset)
}

fn decode_cursor(cursor: &str) -> Option<(PoapPath, usize)> {
    let (tag, offset) = cursor.split_once(':')?;
    Some((PoapPath::from_tag(tag)?, offset.parse().ok()?))
}

/// The holder list inside any of the payload shapes the API has used
fn holder_list(payload: &Value) -> &[Value] {
    if let Some(list) = payload.as_array() {
        return list;
    }
    ["tokenHolders", "poaps", "items", "tokens"]
        .iter()
        .find_map(|key| payload.get(*key).and_then(Value::as_array))
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

/// Owner address of one holder entry, trying every known field
fn owner_address(entry: &Value) -> Option<String> {
    let candidates = [
        entry.pointer("/owner/id"),
        entry.pointer("/owner/address"),
        entry.pointer("/owner/account/address"),
        entry.pointer("/account/address"),
        entry.get("owner"),
        entry.get("owner_address"),
        entry.get("tokenHolder"),
        entry.get("holder_address"),
        entry.get("address"),
    ];

    candidates
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
        .find(|s| !s.is_empty())
        .map(str::to_lowercase)
}

/// Addresses in one page plus the raw entry count (which decides whether
/// another page exists, even when some entries carry no address)
pub fn extract_addresses(payload: &Value) -> (Vec<String>, usize) {
    let list = holder_list(payload);
    let addresses = list.iter().filter_map(owner_address).collect();
    (addresses, list.len())
}

pub struct PoapSource {
    fetcher: RetryingFetcher,
    api_key: Option<String>,
    base_url: String,
}

impl PoapSource {
    pub fn new(fetcher: RetryingFetcher, api_key: Option<String>) -> Self {
        Self {
            fetcher,
            api_key,
            base_url: POAP_API_BASE.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    async fn fetch_path(
        &self,
        event_id: &str,
        path: PoapPath,
        offset: usize,
        api_key: &str,
    ) -> Result<Option<Value>, AnalysisError> {
        let url = format!("{}/event/{}/{}", self.base_url, event_id, path.segment());
        let limit = path.page_size().to_string();
        let offset = offset.to_string();

        let response = self
            .fetcher
            .get(
                PROVIDER,
                &url,
                &[("limit", limit.as_str()), ("offset", offset.as_str())],
                &[("x-api-key", api_key)],
            )
            .await
            .map_err(|e| AnalysisError::from_fetch(PROVIDER, e))?;

        if !response.status().is_success() {
            tracing::debug!(
                event_id = event_id,
                path = path.tag(),
                status = response.status().as_u16(),
                "POAP path rejected"
            );
            return Ok(None);
        }

        let payload = response
            .json::<Value>()
            .await
            .map_err(|e| AnalysisError::from_fetch(PROVIDER, FetchError::from(e)))?;
        Ok(Some(payload))
    }
}

#[async_trait]
impl HolderSource for PoapSource {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    async fn next_page(
        &self,
        asset: &AssetRef,
        cursor: Option<&str>,
    ) -> Result<HolderPage, AnalysisError> {
        let event_id = match asset {
            AssetRef::Poap(poap) => poap.event_id.trim(),
            other => {
                return Err(AnalysisError::permanent(
                    PROVIDER,
                    format!("cannot list holders of {} assets", other.class()),
                ))
            }
        };

        if !is_valid_event_id(event_id) {
            return Err(AnalysisError::permanent(
                PROVIDER,
                format!("invalid event id {:?}", event_id),
            ));
        }

        let api_key = self
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| AnalysisError::Config("POAP_API_KEY is not set".to_string()))?;

        let attempts: Vec<(PoapPath, usize)> = match cursor {
            None => vec![(PoapPath::Legacy, 0), (PoapPath::Poaps, 0)],
            Some(c) => vec![decode_cursor(c).ok_or_else(|| {
                AnalysisError::AggregationInternal(format!("malformed POAP cursor {:?}", c))
            })?],
        };

        let last = attempts.len() - 1;
        for (i, (path, offset)) in attempts.into_iter().enumerate() {
            let payload = match self.fetch_path(event_id, path, offset, api_key).await {
                Ok(Some(payload)) => payload,
                Ok(None) => continue,
                // A path that keeps failing still leaves the next one to try
                Err(e) if i < last => {
                    tracing::debug!(event_id = event_id, path = path.tag(), error = %e, "POAP path failed");
                    continue;
                }
                Err(e) => return Err(e),
            };

            let (addresses, raw_len) = extract_addresses(&payload);
            let next_cursor = if raw_len < path.page_size() {
                None
            } else {
                Some(encode_cursor(path, offset + path.page_size()))
            };

            return Ok(HolderPage {
                addresses,
                next_cursor,
            });
        }

        Err(AnalysisError::permanent(
            PROVIDER,
            format!("event {} rejected by every holder endpoint", event_id),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::RetryPolicy;
    use crate::types::PoapRef;
    use serde_json::json;

    #[test]
    fn test_extracts_every_payload_shape() {
        let bare = json!([{ "owner": "0xAAA" }, { "address": "0xBBB" }]);
        assert_eq!(extract_addresses(&bare), (vec!["0xaaa".into(), "0xbbb".into()], 2));

        let holders = json!({ "tokenHolders": [{ "owner": { "id": "0xCCC" } }] });
        assert_eq!(extract_addresses(&holders).0, vec!["0xccc".to_string()]);

        let poaps = json!({ "poaps": [
            { "owner": { "account": { "address": "0xDDD" } } },
            { "account": { "address": "0xEEE" } },
            { "owner_address": "0xFFF" },
            { "tokenHolder": "0x111" },
            { "holder_address": "0x222" },
            { "owner": { "address": "0x333" } }
        ]});
        let (addresses, raw) = extract_addresses(&poaps);
        assert_eq!(raw, 6);
        assert_eq!(addresses, vec!["0xddd", "0xeee", "0xfff", "0x111", "0x222", "0x333"]);

        let items = json!({ "items": [{ "owner": "0x444" }, { "tokenId": 9 }] });
        assert_eq!(extract_addresses(&items), (vec!["0x444".into()], 2));

        let tokens = json!({ "tokens": [{ "owner": { "id": "0x555" } }] });
        assert_eq!(extract_addresses(&tokens).0, vec!["0x555".to_string()]);

        assert_eq!(extract_addresses(&json!({ "error": "nope" })), (vec![], 0));
    }

    #[test]
    fn test_cursor_keeps_path() {
        let cursor = encode_cursor(PoapPath::Poaps, 600);
        assert_eq!(cursor, "poaps:600");
        assert_eq!(decode_cursor(&cursor), Some((PoapPath::Poaps, 600)));
        assert_eq!(decode_cursor("legacy:0"), Some((PoapPath::Legacy, 0)));
        assert_eq!(decode_cursor("bogus"), None);
        assert_eq!(decode_cursor("other:5"), None);
    }

    #[tokio::test]
    async fn test_rejects_non_numeric_event_id() {
        let fetcher = RetryingFetcher::with_client(reqwest::Client::new(), RetryPolicy::default());
        let source = PoapSource::new(fetcher, Some("key".into()));
        let asset = AssetRef::Poap(PoapRef { event_id: "12a".into(), name: String::new() });

        let err = source.next_page(&asset, None).await.unwrap_err();
        assert_eq!(err.kind(), "permanent");
    }

    #[tokio::test]
    #[ignore] // Requires network access and POAP_API_KEY
    async fn test_fetch_first_page() {
        let key = std::env::var("POAP_API_KEY").expect("POAP_API_KEY");
        let fetcher = RetryingFetcher::new(RetryPolicy::default()).unwrap();
        let source = PoapSource::new(fetcher, Some(key));
        let asset = AssetRef::Poap(PoapRef { event_id: "14".into(), name: String::new() });

        let page = source.next_page(&asset, None).await.unwrap();
        assert!(!page.addresses.is_empty());
    }
}
