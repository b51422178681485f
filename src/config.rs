//! TOML configuration parsing and validation.
//!
//! Every section is optional; missing keys take the defaults documented on
//! each `default_*` function. [`load_config`] reads and validates a file,
//! [`Config::minimal`] returns the all-defaults configuration used when no
//! file exists.
//!
//! ```toml
//! [cache]
//! path = "./data/research-cache.sqlite"
//! ttl_secs = 86400
//!
//! [search]
//! endpoint = "https://api.tavily.com/search"
//!
//! [llm]
//! model = "gpt-4o-mini"
//!
//! [research]
//! max_waves = 3
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use deep_research_core::query::{DEFAULT_CACHE_VERSION, DEFAULT_MAX_KEY_CHARS};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub research: ResearchConfig,
    #[serde(default)]
    pub retry: RetryConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_cache_path")]
    pub path: PathBuf,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
    /// Salt prefixed to every key; bump to invalidate all prior entries.
    #[serde(default = "default_cache_version")]
    pub version: String,
    #[serde(default = "default_max_key_chars")]
    pub max_key_chars: usize,
    /// Entries not read for this many days are purged by `cleanup`.
    #[serde(default = "default_stale_days")]
    pub stale_days: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: default_cache_path(),
            enabled: true,
            ttl_secs: default_ttl_secs(),
            max_entries: default_max_entries(),
            version: default_cache_version(),
            max_key_chars: default_max_key_chars(),
            stale_days: default_stale_days(),
        }
    }
}

fn default_cache_path() -> PathBuf {
    PathBuf::from("./data/research-cache.sqlite")
}
fn default_true() -> bool {
    true
}
fn default_ttl_secs() -> u64 {
    24 * 60 * 60
}
fn default_max_entries() -> usize {
    1000
}
fn default_cache_version() -> String {
    DEFAULT_CACHE_VERSION.to_string()
}
fn default_max_key_chars() -> usize {
    DEFAULT_MAX_KEY_CHARS
}
fn default_stale_days() -> u64 {
    7
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    #[serde(default = "default_search_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_search_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_search_max_results")]
    pub max_results: usize,
    #[serde(default = "default_search_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            endpoint: default_search_endpoint(),
            api_key_env: default_search_key_env(),
            max_results: default_search_max_results(),
            timeout_secs: default_search_timeout(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

fn default_search_endpoint() -> String {
    "https://api.tavily.com/search".to_string()
}
fn default_search_key_env() -> String {
    "SEARCH_API_KEY".to_string()
}
fn default_search_max_results() -> usize {
    8
}
fn default_search_timeout() -> u64 {
    30
}
fn default_connect_timeout() -> u64 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_llm_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            model: default_llm_model(),
            api_key_env: default_llm_key_env(),
            temperature: default_temperature(),
            timeout_secs: default_llm_timeout(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

fn default_llm_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_llm_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_temperature() -> f64 {
    0.2
}
fn default_llm_timeout() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct ResearchConfig {
    #[serde(default = "default_queries_per_wave")]
    pub queries_per_wave: usize,
    #[serde(default = "default_max_sources")]
    pub max_sources: usize,
    /// Upper bound on `max_sources`, whatever a caller requests.
    #[serde(default = "default_hard_source_cap")]
    pub hard_source_cap: usize,
    #[serde(default = "default_max_waves")]
    pub max_waves: u32,
    #[serde(default = "default_concurrency")]
    pub search_concurrency: usize,
    #[serde(default = "default_concurrency")]
    pub summarize_concurrency: usize,
    #[serde(default = "default_digest_top_n")]
    pub digest_top_n: usize,
    /// Generic gap categories shown to the follow-up decision. Static text:
    /// the same list is used whatever the topic.
    #[serde(default = "default_follow_up_checklist")]
    pub follow_up_checklist: Vec<String>,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            queries_per_wave: default_queries_per_wave(),
            max_sources: default_max_sources(),
            hard_source_cap: default_hard_source_cap(),
            max_waves: default_max_waves(),
            search_concurrency: default_concurrency(),
            summarize_concurrency: default_concurrency(),
            digest_top_n: default_digest_top_n(),
            follow_up_checklist: default_follow_up_checklist(),
        }
    }
}

fn default_queries_per_wave() -> usize {
    3
}
fn default_max_sources() -> usize {
    20
}
fn default_hard_source_cap() -> usize {
    60
}
fn default_max_waves() -> u32 {
    3
}
fn default_concurrency() -> usize {
    5
}
fn default_digest_top_n() -> usize {
    8
}

pub fn default_follow_up_checklist() -> Vec<String> {
    [
        "Recent developments and current status",
        "Quantitative data, statistics, or benchmarks",
        "Expert, academic, or official sources",
        "Opposing views, criticism, or limitations",
        "Regulatory, legal, or policy context",
        "Real-world examples or case studies",
        "Costs, risks, and economic impact",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    /// Total attempts for connection/timeout failures, including the first.
    #[serde(default = "default_transient_attempts")]
    pub transient_attempts: u32,
    #[serde(default = "default_transient_backoff")]
    pub transient_backoff_ms: Vec<u64>,
    /// Retries after a rate-limit response before giving up.
    #[serde(default = "default_rate_limit_retries")]
    pub rate_limit_retries: u32,
    #[serde(default = "default_rate_limit_backoff")]
    pub rate_limit_backoff_ms: Vec<u64>,
    /// Upper bound applied to server-suggested waits.
    #[serde(default = "default_max_retry_after")]
    pub max_retry_after_secs: u64,
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            transient_attempts: default_transient_attempts(),
            transient_backoff_ms: default_transient_backoff(),
            rate_limit_retries: default_rate_limit_retries(),
            rate_limit_backoff_ms: default_rate_limit_backoff(),
            max_retry_after_secs: default_max_retry_after(),
            jitter_ms: default_jitter_ms(),
        }
    }
}

fn default_transient_attempts() -> u32 {
    4
}
fn default_transient_backoff() -> Vec<u64> {
    vec![500, 1000, 2000, 4000]
}
fn default_rate_limit_retries() -> u32 {
    5
}
fn default_rate_limit_backoff() -> Vec<u64> {
    vec![5000, 10_000, 20_000, 40_000, 60_000]
}
fn default_max_retry_after() -> u64 {
    120
}
fn default_jitter_ms() -> u64 {
    250
}

impl SearchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl LlmConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl ResearchConfig {
    /// Effective source capacity: `min(requested, hard_source_cap)`.
    pub fn source_capacity(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.max_sources)
            .min(self.hard_source_cap)
    }
}

impl Config {
    /// All-defaults configuration, used when no config file is present.
    pub fn minimal() -> Self {
        Self::default()
    }

    /// Check value ranges. Called by [`load_config`].
    pub fn validate(&self) -> Result<()> {
        if self.cache.ttl_secs == 0 {
            anyhow::bail!("cache.ttl_secs must be > 0");
        }
        if self.cache.max_entries == 0 {
            anyhow::bail!("cache.max_entries must be >= 1");
        }
        if self.cache.max_key_chars == 0 {
            anyhow::bail!("cache.max_key_chars must be >= 1");
        }
        if self.cache.version.trim().is_empty() {
            anyhow::bail!("cache.version must not be empty");
        }

        if self.search.endpoint.trim().is_empty() {
            anyhow::bail!("search.endpoint must not be empty");
        }
        if self.search.max_results == 0 {
            anyhow::bail!("search.max_results must be >= 1");
        }

        if !(0.0..=2.0).contains(&self.llm.temperature) {
            anyhow::bail!("llm.temperature must be in [0.0, 2.0]");
        }

        let r = &self.research;
        if r.queries_per_wave == 0 {
            anyhow::bail!("research.queries_per_wave must be >= 1");
        }
        if r.max_sources == 0 || r.hard_source_cap == 0 {
            anyhow::bail!("research.max_sources and research.hard_source_cap must be >= 1");
        }
        if r.max_waves == 0 {
            anyhow::bail!("research.max_waves must be >= 1");
        }
        if r.search_concurrency == 0 || r.summarize_concurrency == 0 {
            anyhow::bail!("research concurrency limits must be >= 1");
        }

        if self.retry.transient_attempts == 0 {
            anyhow::bail!("retry.transient_attempts must be >= 1");
        }
        if self.retry.transient_backoff_ms.is_empty() || self.retry.rate_limit_backoff_ms.is_empty()
        {
            anyhow::bail!("retry backoff schedules must not be empty");
        }

        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;
    Ok(config)
}

/// Load `path` if it exists, otherwise fall back to [`Config::minimal`].
pub fn load_or_default(path: &Path) -> Result<Config> {
    if path.exists() {
        load_config(path)
    } else {
        tracing::debug!(path = %path.display(), "config file not found, using defaults");
        Ok(Config::minimal())
    }
}
