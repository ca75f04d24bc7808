use crate::crawler::WaitStrategy;
use crate::extract::SelectorConfig;
use crate::state::SiteStatus;
use crate::storage::NewSite;
use serde::Deserialize;

/// Main configuration structure for Harvester
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub storage: StorageConfig,
    #[serde(default)]
    pub fetcher: FetcherConfig,
    #[serde(default)]
    pub model: Option<ModelConfig>,
    #[serde(default, rename = "site")]
    pub sites: Vec<SiteEntry>,
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Path to the SQLite database file
    #[serde(rename = "database-path")]
    pub database_path: String,
}

/// Page fetching configuration
#[derive(Debug, Clone, Deserialize)]
pub struct FetcherConfig {
    /// User agent sent with every request
    #[serde(rename = "user-agent", default = "default_user_agent")]
    pub user_agent: String,

    /// Per-fetch timeout in seconds
    #[serde(rename = "timeout-secs", default = "default_fetch_timeout")]
    pub timeout_secs: u64,

    /// When a fetched page counts as loaded
    #[serde(rename = "wait-strategy", default)]
    pub wait_strategy: WaitStrategy,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            timeout_secs: default_fetch_timeout(),
            wait_strategy: WaitStrategy::default(),
        }
    }
}

/// Extraction model configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    /// Base URL of an OpenAI-compatible API
    pub endpoint: String,

    /// Model name
    pub model: String,

    /// Name of the environment variable holding the API key
    #[serde(rename = "api-key-env", default)]
    pub api_key_env: Option<String>,

    /// Cleaned page text is truncated to this many characters
    #[serde(rename = "max-content-chars", default = "default_max_content_chars")]
    pub max_content_chars: usize,

    /// Per-request timeout in seconds
    #[serde(rename = "timeout-secs", default = "default_model_timeout")]
    pub timeout_secs: u64,
}

/// A site to crawl, synced into the site store by name
#[derive(Debug, Clone, Deserialize)]
pub struct SiteEntry {
    pub name: String,

    #[serde(rename = "start-url")]
    pub start_url: String,

    #[serde(rename = "max-depth", default = "default_max_depth")]
    pub max_depth: u32,

    #[serde(rename = "max-pages", default = "default_max_pages")]
    pub max_pages: u32,

    /// Seconds to wait between fetches
    #[serde(rename = "crawl-delay", default = "default_crawl_delay")]
    pub crawl_delay: f64,

    /// Glob or regex matched against discovered link paths
    #[serde(rename = "link-pattern", default)]
    pub link_pattern: Option<String>,

    #[serde(rename = "crawl-interval-hours", default)]
    pub crawl_interval_hours: Option<u32>,

    #[serde(default = "default_active")]
    pub active: bool,

    /// Selector config; absent means model based extraction
    #[serde(default)]
    pub extraction: Option<SelectorConfig>,
}

impl SiteEntry {
    /// Converts the entry into the shape the site store persists
    pub fn to_new_site(&self) -> NewSite {
        NewSite {
            name: self.name.clone(),
            start_url: self.start_url.trim().to_string(),
            status: if self.active {
                SiteStatus::Active
            } else {
                SiteStatus::Inactive
            },
            max_depth: self.max_depth,
            max_pages: self.max_pages,
            crawl_delay: self.crawl_delay,
            link_pattern: self
                .link_pattern
                .as_deref()
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string),
            extraction_config: self.extraction.clone(),
            crawl_interval_hours: self.crawl_interval_hours,
        }
    }
}

fn default_user_agent() -> String {
    format!("harvester/{}", env!("CARGO_PKG_VERSION"))
}

fn default_fetch_timeout() -> u64 {
    30
}

fn default_max_content_chars() -> usize {
    15_000
}

fn default_model_timeout() -> u64 {
    60
}

fn default_max_depth() -> u32 {
    2
}

fn default_max_pages() -> u32 {
    100
}

fn default_crawl_delay() -> f64 {
    1.0
}

fn default_active() -> bool {
    true
}
