// API Type Definitions
//
// Response bodies that only exist at the HTTP boundary. Analysis payloads
// live in `crate::types`.

use serde::{Deserialize, Serialize};

use crate::cache::CacheStats;

// ========== Errors ==========

/// Error body: `{"error": "..."}`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ApiError {
    pub error: String,
}

impl ApiError {
    pub fn new(message: impl Into<String>) -> Self {
        ApiError {
            error: message.into(),
        }
    }
}

// ========== Health ==========

/// Which providers have credentials configured
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ProviderStatus {
    pub alchemy: bool,
    pub poap: bool,
    pub moralis: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    pub status: String,
    pub service: String,
    pub version: String,
    pub uptime_secs: u64,
    pub providers: ProviderStatus,
    pub cache: CacheStats,
    pub warnings: Vec<String>,
}
