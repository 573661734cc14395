use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Live stream retry/watchdog settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StreamConfig {
    /// Fixed delay before reconnecting after a transport failure
    pub retry_delay_ms: u64,
    /// Consecutive transport failures tolerated before giving up
    pub max_retries: u32,
    /// Time from session open until the one-shot fetch fallback fires
    pub watchdog_ms: u64,
    /// Upper bound on records kept in a session's merged trace list
    pub max_trace_window: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            retry_delay_ms: 5_000,
            max_retries: 5,
            watchdog_ms: 5_000,
            max_trace_window: 10_000,
        }
    }
}

impl StreamConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn watchdog(&self) -> Duration {
        Duration::from_millis(self.watchdog_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PrefetchConfig {
    pub debounce_ms: u64,
    pub ttl_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 300,
            ttl_secs: 300,
            sweep_interval_secs: 60,
        }
    }
}

impl PrefetchConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PollingConfig {
    pub interval_ms: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self { interval_ms: 3_000 }
    }
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Resource cache partitions and seed manifest.
///
/// Changing `static_manifest` or `offline_api_endpoints` requires bumping
/// `version`; activation prunes every partition of other versions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    pub name_prefix: String,
    pub version: String,
    pub api_prefix: String,
    pub static_prefix: String,
    pub static_manifest: Vec<String>,
    pub offline_api_endpoints: Vec<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            name_prefix: "run-observer".to_string(),
            version: "v1".to_string(),
            api_prefix: "/runs/".to_string(),
            static_prefix: "/assets/".to_string(),
            static_manifest: vec![
                "/".to_string(),
                "/index.html".to_string(),
                "/assets/app.js".to_string(),
                "/assets/app_bg.wasm".to_string(),
                "/assets/main.css".to_string(),
            ],
            offline_api_endpoints: vec![
                "/runs/latest".to_string(),
                "/runs/latest/traces".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Base URL prepended to every API path; empty means same origin
    pub api_base: String,
    pub stream: StreamConfig,
    pub prefetch: PrefetchConfig,
    pub polling: PollingConfig,
    pub cache: CacheConfig,
}

impl PipelineConfig {
    /// Parse the JSON blob the browser host hands over at startup.
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    #[cfg(not(target_arch = "wasm32"))]
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();
        let config = Self {
            api_base: env_str("RUN_OBSERVER_API_BASE", &defaults.api_base),
            stream: StreamConfig {
                retry_delay_ms: env_parse(
                    "RUN_OBSERVER_STREAM_RETRY_DELAY_MS",
                    defaults.stream.retry_delay_ms,
                )?,
                max_retries: env_parse(
                    "RUN_OBSERVER_STREAM_MAX_RETRIES",
                    defaults.stream.max_retries,
                )?,
                watchdog_ms: env_parse(
                    "RUN_OBSERVER_STREAM_WATCHDOG_MS",
                    defaults.stream.watchdog_ms,
                )?,
                max_trace_window: env_parse(
                    "RUN_OBSERVER_MAX_TRACE_WINDOW",
                    defaults.stream.max_trace_window,
                )?,
            },
            prefetch: PrefetchConfig {
                debounce_ms: env_parse(
                    "RUN_OBSERVER_PREFETCH_DEBOUNCE_MS",
                    defaults.prefetch.debounce_ms,
                )?,
                ttl_secs: env_parse("RUN_OBSERVER_PREFETCH_TTL_SECS", defaults.prefetch.ttl_secs)?,
                sweep_interval_secs: env_parse(
                    "RUN_OBSERVER_PREFETCH_SWEEP_SECS",
                    defaults.prefetch.sweep_interval_secs,
                )?,
            },
            polling: PollingConfig {
                interval_ms: env_parse(
                    "RUN_OBSERVER_POLL_INTERVAL_MS",
                    defaults.polling.interval_ms,
                )?,
            },
            cache: CacheConfig {
                name_prefix: env_str("RUN_OBSERVER_CACHE_PREFIX", &defaults.cache.name_prefix),
                version: env_str("RUN_OBSERVER_CACHE_VERSION", &defaults.cache.version),
                api_prefix: env_str("RUN_OBSERVER_API_PREFIX", &defaults.cache.api_prefix),
                static_prefix: env_str(
                    "RUN_OBSERVER_STATIC_PREFIX",
                    &defaults.cache.static_prefix,
                ),
                static_manifest: env_csv(
                    "RUN_OBSERVER_STATIC_MANIFEST",
                    &defaults.cache.static_manifest,
                ),
                offline_api_endpoints: env_csv(
                    "RUN_OBSERVER_OFFLINE_API_ENDPOINTS",
                    &defaults.cache.offline_api_endpoints,
                ),
            },
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let zero_durations = [
            ("stream.retry_delay_ms", self.stream.retry_delay_ms),
            ("stream.watchdog_ms", self.stream.watchdog_ms),
            ("prefetch.ttl_secs", self.prefetch.ttl_secs),
            ("prefetch.sweep_interval_secs", self.prefetch.sweep_interval_secs),
            ("polling.interval_ms", self.polling.interval_ms),
        ];
        if let Some((name, _)) = zero_durations.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::Invalid(format!("{name} must be greater than zero")));
        }
        if self.stream.max_trace_window == 0 {
            return Err(ConfigError::Invalid(
                "stream.max_trace_window must be greater than zero".to_string(),
            ));
        }
        if self.cache.version.trim().is_empty() {
            return Err(ConfigError::Invalid("cache.version must not be empty".to_string()));
        }
        if self.cache.name_prefix.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "cache.name_prefix must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Join `api_base` and an API path.
    pub fn api_url(&self, path: &str) -> String {
        format!("{}{}", self.api_base.trim_end_matches('/'), path)
    }
}

#[cfg(not(target_arch = "wasm32"))]
fn env_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

#[cfg(not(target_arch = "wasm32"))]
fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(val) => val.parse::<T>().map_err(|e| ConfigError::InvalidEnv {
            key: key.to_string(),
            value: val.clone(),
            reason: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

#[cfg(not(target_arch = "wasm32"))]
fn env_csv(key: &str, default: &[String]) -> Vec<String> {
    match std::env::var(key) {
        Ok(raw) => raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ToString::to_string)
            .collect(),
        Err(_) => default.to_vec(),
    }
}
