// Configuration
//
// `config.toml` (optional) layered with `GHOSTCONTEXT__SECTION__KEY`
// environment variables, loaded once into a process-wide OnceCell.
// `Settings` is the typed view with a default for every key.

pub use config::{Config, Environment, File as ConfigFile};
pub use once_cell::sync::OnceCell;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::error::Error;
use std::time::Duration;

use crate::compiler::ThresholdRule;
use crate::constants::*;
use crate::error::AnalysisError;
use crate::retry::RetryPolicy;

static GLOBAL_CONFIG: OnceCell<Config> = OnceCell::new();
static EMPTY_CONFIG: Lazy<Config> = Lazy::new(Config::default);

pub const ENV_PREFIX: &str = "GHOSTCONTEXT";

pub fn load_config(path: &str) -> Result<Config, config::ConfigError> {
    Config::builder()
        .add_source(ConfigFile::with_name(path).required(false))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        )
        .build()
}

pub fn init_global_config(path: &str) -> Result<(), Box<dyn Error>> {
    let config = load_config(path)?;
    GLOBAL_CONFIG
        .set(config)
        .map_err(|_| "Config already set")?;
    Ok(())
}

/// The loaded configuration, or an empty one when `init_global_config`
/// was never called (tests, tools)
pub fn get_global_config() -> &'static Config {
    GLOBAL_CONFIG.get().unwrap_or(&EMPTY_CONFIG)
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub bind: String,
    /// Empty list disables origin checks
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct AnalysisSettings {
    pub max_holders_per_asset: usize,
    pub concurrency: usize,
    pub top_k: usize,
    pub erc20_top_k: usize,
    pub page_timeout_secs: u64,
    pub multi_asset_min_overlap: usize,
    pub single_asset_min_overlap: usize,
}

impl AnalysisSettings {
    pub fn threshold_rule(&self) -> ThresholdRule {
        ThresholdRule {
            multi_asset_min: self.multi_asset_min_overlap,
            single_asset_min: self.single_asset_min_overlap,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub enabled: bool,
    pub capacity: usize,
    pub holder_ttl_secs: u64,
}

#[derive(Debug, Clone, Default)]
pub struct ProviderSettings {
    pub alchemy_api_key: Option<String>,
    /// Per-network Alchemy keys, keyed by network name as configured
    pub alchemy_network_keys: HashMap<String, String>,
    pub poap_api_key: Option<String>,
    pub moralis_api_key: Option<String>,
    pub moralis_page_size: usize,
}

#[derive(Debug, Clone)]
pub struct RateLimitSettings {
    pub api_per_minute: usize,
    pub analysis_per_minute: usize,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub analysis: AnalysisSettings,
    pub retry: RetrySettings,
    pub cache: CacheSettings,
    pub providers: ProviderSettings,
    pub rate_limit: RateLimitSettings,
}

/// Environment variables holding per-network Alchemy keys
const ALCHEMY_NETWORK_ENV: [(&str, &str); 6] = [
    ("ETH_MAINNET", "ALCHEMY_ETH_API_KEY"),
    ("MATIC_MAINNET", "ALCHEMY_POLYGON_API_KEY"),
    ("ARB_MAINNET", "ALCHEMY_ARB_API_KEY"),
    ("OPT_MAINNET", "ALCHEMY_OPT_API_KEY"),
    ("BASE_MAINNET", "ALCHEMY_BASE_API_KEY"),
    ("ZORA_MAINNET", "ALCHEMY_ZORA_API_KEY"),
];

fn get_usize(config: &Config, key: &str, default: usize) -> Result<usize, AnalysisError> {
    match config.get_int(key) {
        Ok(v) if v >= 0 => Ok(v as usize),
        Ok(v) => Err(AnalysisError::Config(format!("{} must not be negative (got {})", key, v))),
        Err(config::ConfigError::NotFound(_)) => Ok(default),
        Err(e) => Err(AnalysisError::Config(format!("{}: {}", key, e))),
    }
}

fn get_u64(config: &Config, key: &str, default: u64) -> Result<u64, AnalysisError> {
    get_usize(config, key, default as usize).map(|v| v as u64)
}

fn get_bool(config: &Config, key: &str, default: bool) -> Result<bool, AnalysisError> {
    match config.get_bool(key) {
        Ok(v) => Ok(v),
        Err(config::ConfigError::NotFound(_)) => Ok(default),
        Err(e) => Err(AnalysisError::Config(format!("{}: {}", key, e))),
    }
}

/// Non-empty string from config, then from the fallback environment variable
fn get_secret(config: &Config, key: &str, env_fallback: &str) -> Option<String> {
    config
        .get_string(key)
        .ok()
        .or_else(|| std::env::var(env_fallback).ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// A TOML array, or a comma-separated string from the environment
fn get_list(config: &Config, key: &str) -> Vec<String> {
    if let Ok(values) = config.get_array(key) {
        return values
            .into_iter()
            .filter_map(|v| v.into_string().ok())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
    }

    config
        .get_string(key)
        .map(|s| {
            s.split(',')
                .map(|part| part.trim().to_string())
                .filter(|part| !part.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

impl Settings {
    pub fn from_config(config: &Config) -> Result<Self, AnalysisError> {
        let server = ServerSettings {
            bind: config
                .get_string("server.bind")
                .unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string()),
            allowed_origins: get_list(config, "server.allowed_origins"),
        };

        let analysis = AnalysisSettings {
            max_holders_per_asset: get_usize(config, "analysis.max_holders_per_asset", MAX_HOLDERS_PER_ASSET)?,
            concurrency: get_usize(config, "analysis.concurrency", DEFAULT_CONCURRENCY)?,
            top_k: get_usize(config, "analysis.top_k", DEFAULT_TOP_K)?,
            erc20_top_k: get_usize(config, "analysis.erc20_top_k", ERC20_TOP_K)?,
            page_timeout_secs: get_u64(
                config,
                "analysis.page_timeout_secs",
                DEFAULT_PAGE_TIMEOUT.as_secs(),
            )?,
            multi_asset_min_overlap: get_usize(
                config,
                "analysis.multi_asset_min_overlap",
                MULTI_ASSET_MIN_OVERLAP,
            )?,
            single_asset_min_overlap: get_usize(
                config,
                "analysis.single_asset_min_overlap",
                SINGLE_ASSET_MIN_OVERLAP,
            )?,
        };

        if analysis.concurrency == 0 {
            return Err(AnalysisError::Config("analysis.concurrency must be at least 1".into()));
        }
        if analysis.top_k == 0 || analysis.erc20_top_k == 0 {
            return Err(AnalysisError::Config("analysis.top_k must be at least 1".into()));
        }
        if analysis.page_timeout_secs == 0 {
            return Err(AnalysisError::Config("analysis.page_timeout_secs must be at least 1".into()));
        }

        let retry = RetrySettings {
            max_retries: u32::try_from(get_usize(
                config,
                "retry.max_retries",
                DEFAULT_MAX_RETRIES as usize,
            )?)
            .map_err(|_| AnalysisError::Config("retry.max_retries is out of range".into()))?,
            base_delay_ms: get_u64(config, "retry.base_delay_ms", DEFAULT_BASE_DELAY_MS)?,
            max_delay_ms: get_u64(config, "retry.max_delay_ms", DEFAULT_MAX_DELAY_MS)?,
        };
        if retry.max_delay_ms < retry.base_delay_ms {
            return Err(AnalysisError::Config(
                "retry.max_delay_ms must not be below retry.base_delay_ms".into(),
            ));
        }

        let cache = CacheSettings {
            enabled: get_bool(config, "cache.enabled", true)?,
            capacity: get_usize(config, "cache.capacity", HOLDER_CACHE_CAPACITY)?,
            holder_ttl_secs: get_u64(config, "cache.holder_ttl_secs", HOLDER_CACHE_TTL.as_secs())?,
        };

        let mut alchemy_network_keys = HashMap::new();
        if let Ok(table) = config.get_table("providers.alchemy.keys") {
            for (network, value) in table {
                if let Ok(key) = value.into_string() {
                    alchemy_network_keys.insert(network, key);
                }
            }
        }
        for (network, env_var) in ALCHEMY_NETWORK_ENV {
            if let Ok(key) = std::env::var(env_var) {
                if !key.trim().is_empty() {
                    alchemy_network_keys
                        .entry(network.to_string())
                        .or_insert_with(|| key.trim().to_string());
                }
            }
        }

        let providers = ProviderSettings {
            alchemy_api_key: get_secret(config, "providers.alchemy.api_key", "ALCHEMY_API_KEY"),
            alchemy_network_keys,
            poap_api_key: get_secret(config, "providers.poap.api_key", "POAP_API_KEY"),
            moralis_api_key: get_secret(config, "providers.moralis.api_key", "MORALIS_API_KEY"),
            moralis_page_size: get_usize(config, "providers.moralis.page_size", MORALIS_PAGE_SIZE)?,
        };

        let rate_limit = RateLimitSettings {
            api_per_minute: get_usize(config, "rate_limit.api_per_minute", RATE_LIMIT_API_PER_MINUTE)?,
            analysis_per_minute: get_usize(
                config,
                "rate_limit.analysis_per_minute",
                RATE_LIMIT_ANALYSIS_PER_MINUTE,
            )?,
        };

        Ok(Self {
            server,
            analysis,
            retry,
            cache,
            providers,
            rate_limit,
        })
    }

    /// Settings from the global configuration
    pub fn from_global() -> Result<Self, AnalysisError> {
        Self::from_config(get_global_config())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry.max_retries,
            Duration::from_millis(self.retry.base_delay_ms),
            Duration::from_millis(self.retry.max_delay_ms),
        )
    }

    pub fn holder_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.holder_ttl_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::normalize_network;
    use config::FileFormat;

    fn from_toml(toml: &str) -> Result<Settings, AnalysisError> {
        let config = Config::builder()
            .add_source(ConfigFile::from_str(toml, FileFormat::Toml))
            .build()
            .unwrap();
        Settings::from_config(&config)
    }

    #[test]
    fn test_defaults_for_missing_keys() {
        let settings = Settings::from_config(&Config::default()).unwrap();

        assert_eq!(settings.server.bind, DEFAULT_BIND_ADDR);
        assert!(settings.server.allowed_origins.is_empty());
        assert_eq!(settings.analysis.max_holders_per_asset, 150_000);
        assert_eq!(settings.analysis.top_k, 100);
        assert_eq!(settings.analysis.erc20_top_k, 50);
        assert_eq!(settings.analysis.threshold_rule(), ThresholdRule::default());
        assert_eq!(settings.retry.max_retries, 3);
        assert!(settings.cache.enabled);
        assert_eq!(settings.holder_ttl(), HOLDER_CACHE_TTL);
        assert_eq!(settings.rate_limit.api_per_minute, 60);
        assert_eq!(settings.rate_limit.analysis_per_minute, 10);
    }

    #[test]
    fn test_reads_sections() {
        let settings = from_toml(
            r#"
            [server]
            bind = "127.0.0.1:8080"
            allowed_origins = ["https://ghostcontext.xyz", " http://localhost:3000 "]

            [analysis]
            concurrency = 4
            max_holders_per_asset = 5000
            multi_asset_min_overlap = 3

            [retry]
            max_retries = 5
            base_delay_ms = 250
            max_delay_ms = 4000

            [cache]
            enabled = false

            [providers.alchemy.keys]
            BASE_MAINNET = "base-key"

            [providers.moralis]
            page_size = 50
            "#,
        )
        .unwrap();

        assert_eq!(settings.server.bind, "127.0.0.1:8080");
        assert_eq!(settings.server.allowed_origins[1], "http://localhost:3000");
        assert_eq!(settings.analysis.concurrency, 4);
        assert_eq!(settings.analysis.threshold_rule().threshold(2), 3);
        assert_eq!(settings.retry_policy().max_delay, Duration::from_millis(4000));
        assert!(!settings.cache.enabled);
        // key case may be folded by the loader; sources normalize it anyway
        assert!(settings
            .providers
            .alchemy_network_keys
            .iter()
            .any(|(network, key)| normalize_network(network) == "base-mainnet" && key == "base-key"));
        assert_eq!(settings.providers.moralis_page_size, 50);
    }

    #[test]
    fn test_rejects_invalid_values() {
        assert!(from_toml("[analysis]\nconcurrency = 0").is_err());
        assert!(from_toml("[analysis]\ntop_k = -1").is_err());
        assert!(from_toml("[retry]\nbase_delay_ms = 5000\nmax_delay_ms = 10").is_err());
    }

    #[test]
    fn test_oversized_max_retries_is_rejected() {
        match from_toml("[retry]\nmax_retries = 4294967296") {
            Err(AnalysisError::Config(msg)) => assert!(msg.contains("retry.max_retries")),
            other => panic!("expected a config error, got {:?}", other.map(|s| s.retry.max_retries)),
        }
        assert_eq!(from_toml("[retry]\nmax_retries = 7").unwrap().retry.max_retries, 7);
    }

    #[test]
    fn test_comma_separated_origins() {
        let config = Config::builder()
            .set_override("server.allowed_origins", "https://a.xyz, https://b.xyz")
            .unwrap()
            .build()
            .unwrap();
        let settings = Settings::from_config(&config).unwrap();
        assert_eq!(settings.server.allowed_origins, vec!["https://a.xyz", "https://b.xyz"]);
    }
}
