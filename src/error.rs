use thiserror::Error;

/// Failures of a single outbound HTTP call after the retry layer gave up
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Retries exhausted after {attempts} attempts (last status {status})")]
    RetriesExhausted {
        status: u16,
        attempts: u32,
    },

    #[error("Decode error: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_decode() {
            FetchError::Decode(error.to_string())
        } else {
            FetchError::Network(error.to_string())
        }
    }
}

#[derive(Error, Debug)]
pub enum AnalysisError {
    /// Malformed source wallet, bad asset reference, or nothing selected
    #[error("Validation error: {0}")]
    Validation(String),

    /// Rate limiting or temporary upstream unavailability
    #[error("Provider temporarily unavailable: {provider}: {message}")]
    ProviderTransient {
        provider: String,
        message: String,
    },

    /// Contract not found, unsupported network, rejected request
    #[error("Provider error: {provider}: {message}")]
    ProviderPermanent {
        provider: String,
        message: String,
    },

    #[error("Aggregation error: {0}")]
    AggregationInternal(String),

    #[error("Timeout: holder page did not arrive within {seconds} seconds")]
    Timeout {
        seconds: u64,
    },

    #[error("Analysis cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),
}

impl AnalysisError {
    pub fn transient(provider: &str, message: impl Into<String>) -> Self {
        AnalysisError::ProviderTransient {
            provider: provider.to_string(),
            message: message.into(),
        }
    }

    pub fn permanent(provider: &str, message: impl Into<String>) -> Self {
        AnalysisError::ProviderPermanent {
            provider: provider.to_string(),
            message: message.into(),
        }
    }

    /// Map a retry-layer failure to the analysis taxonomy.
    ///
    /// Exhausted retries on a retryable status stay transient; decode failures
    /// mean the provider answered with something we cannot use.
    pub fn from_fetch(provider: &str, error: FetchError) -> Self {
        match error {
            FetchError::Network(msg) => AnalysisError::transient(provider, msg),
            FetchError::RetriesExhausted { status, attempts } => AnalysisError::transient(
                provider,
                format!("status {} after {} attempts", status, attempts),
            ),
            FetchError::Decode(msg) => AnalysisError::permanent(provider, msg),
        }
    }

    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            AnalysisError::ProviderTransient { .. } | AnalysisError::Timeout { .. }
        )
    }

    /// Only validation failures abort a request; everything else degrades
    /// the affected asset to an empty contribution.
    pub fn is_fatal(&self) -> bool {
        matches!(self, AnalysisError::Validation(_))
    }

    /// Short label for metrics and logs
    pub fn kind(&self) -> &'static str {
        match self {
            AnalysisError::Validation(_) => "validation",
            AnalysisError::ProviderTransient { .. } => "transient",
            AnalysisError::ProviderPermanent { .. } => "permanent",
            AnalysisError::AggregationInternal(_) => "aggregation",
            AnalysisError::Timeout { .. } => "timeout",
            AnalysisError::Cancelled => "cancelled",
            AnalysisError::Config(_) => "config",
        }
    }
}
