use config::{Config, ConfigError, File};
use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Which token list the registry client pulls.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RegistryListType {
    #[default]
    Strict,
    All,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Sources {
    #[serde(default = "default_pool_listing_url")]
    pub pool_listing_url: String,
    #[serde(default = "default_pair_activity_url")]
    pub pair_activity_url: String,
    #[serde(default = "default_token_registry_strict_url")]
    pub token_registry_strict_url: String,
    #[serde(default = "default_token_registry_all_url")]
    pub token_registry_all_url: String,
    #[serde(default)]
    pub registry_list_type: RegistryListType,
    /// Max pair addresses packed into one pair-activity request URL.
    #[serde(default = "default_pair_batch_size")]
    pub pair_batch_size: usize,
}

fn default_pool_listing_url() -> String {
    "https://dlmm-api.meteora.ag/pair/all".to_string()
}
fn default_pair_activity_url() -> String {
    "https://api.dexscreener.com/latest/dex/pairs/solana".to_string()
}
fn default_token_registry_strict_url() -> String {
    "https://token.jup.ag/strict".to_string()
}
fn default_token_registry_all_url() -> String {
    "https://token.jup.ag/all".to_string()
}
fn default_pair_batch_size() -> usize {
    30
}

impl Default for Sources {
    fn default() -> Self {
        Self {
            pool_listing_url: default_pool_listing_url(),
            pair_activity_url: default_pair_activity_url(),
            token_registry_strict_url: default_token_registry_strict_url(),
            token_registry_all_url: default_token_registry_all_url(),
            registry_list_type: RegistryListType::default(),
            pair_batch_size: default_pair_batch_size(),
        }
    }
}

impl Sources {
    pub fn token_registry_url(&self) -> &str {
        match self.registry_list_type {
            RegistryListType::Strict => &self.token_registry_strict_url,
            RegistryListType::All => &self.token_registry_all_url,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RateLimit {
    #[serde(default = "default_requests_per_period")]
    pub requests_per_period: usize,
    #[serde(default = "default_period_ms")]
    pub period_ms: u64,
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    /// Retries after the first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_requests_per_period() -> usize {
    4
}
fn default_period_ms() -> u64 {
    1_000
}
fn default_flush_interval_ms() -> u64 {
    50
}
fn default_initial_backoff_ms() -> u64 {
    60_000
}
fn default_backoff_multiplier() -> f64 {
    1.5
}
fn default_max_retries() -> u32 {
    2
}
fn default_request_timeout_ms() -> u64 {
    15_000
}

impl Default for RateLimit {
    fn default() -> Self {
        Self {
            requests_per_period: default_requests_per_period(),
            period_ms: default_period_ms(),
            flush_interval_ms: default_flush_interval_ms(),
            initial_backoff_ms: default_initial_backoff_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            max_retries: default_max_retries(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl RateLimit {
    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms.max(1))
    }
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Storage {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default = "default_insert_batch_size")]
    pub insert_batch_size: usize,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}
fn default_category() -> String {
    "enriched_dex_pairs".to_string()
}
fn default_insert_batch_size() -> usize {
    2_000
}

impl Default for Storage {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            category: default_category(),
            insert_batch_size: default_insert_batch_size(),
        }
    }
}

impl Storage {
    /// Directory holding the dated snapshot folders of the configured category.
    pub fn category_dir(&self) -> PathBuf {
        self.data_dir.join(&self.category)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Database {
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: usize,
    #[serde(default = "default_acquire_timeout_seconds")]
    pub acquire_timeout_seconds: u64,
}

fn default_max_connections() -> u32 {
    5
}
fn default_connect_attempts() -> usize {
    10
}
fn default_acquire_timeout_seconds() -> u64 {
    5
}

impl Default for Database {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: default_max_connections(),
            connect_attempts: default_connect_attempts(),
            acquire_timeout_seconds: default_acquire_timeout_seconds(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Scheduler {
    #[serde(default = "default_interval_seconds")]
    pub interval_seconds: u64,
    /// Run one cycle immediately instead of waiting a full interval.
    #[serde(default = "default_true")]
    pub run_on_start: bool,
}

fn default_interval_seconds() -> u64 {
    20 * 60
}
fn default_true() -> bool {
    true
}

impl Scheduler {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds.max(1))
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self {
            interval_seconds: default_interval_seconds(),
            run_on_start: default_true(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Opportunities {
    #[serde(default = "default_blue_chips")]
    pub blue_chips: Vec<String>,
}

fn default_blue_chips() -> Vec<String> {
    [
        "USDC", "SOL", "USDT", "jitoSOL", "bSOL", "JupSOL", "INF", "JLP", "WBTC", "WETH",
        "bonkSOL", "LST", "mSOL", "zippySOL",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Default for Opportunities {
    fn default() -> Self {
        Self {
            blue_chips: default_blue_chips(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Settings {
    #[serde(default)]
    pub sources: Sources,
    #[serde(default)]
    pub rate_limit: RateLimit,
    #[serde(default)]
    pub storage: Storage,
    #[serde(default)]
    pub database: Database,
    #[serde(default)]
    pub scheduler: Scheduler,
    #[serde(default)]
    pub opportunities: Opportunities,
}

impl Settings {
    /// Loads `Config.toml` (optional) and applies `MINER_*` environment overrides.
    pub fn new() -> Result<Self, ConfigError> {
        Self::from_file("Config.toml")
    }

    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name(path).required(false))
            .build()?;

        let mut settings: Self = s.try_deserialize()?;
        settings.apply_env_overrides();
        Ok(settings)
    }

    fn apply_env_overrides(&mut self) {
        if let Some(url) = non_empty_env("MINER_DATABASE_URL").or_else(|| non_empty_env("DATABASE_URL")) {
            self.database.url = url;
        }
        if let Some(dir) = non_empty_env("MINER_DATA_DIR") {
            self.storage.data_dir = PathBuf::from(dir);
        }
        if let Some(raw) = non_empty_env("MINER_INTERVAL_SECONDS") {
            match raw.parse::<u64>() {
                Ok(secs) if secs > 0 => self.scheduler.interval_seconds = secs,
                _ => eprintln!("Ignoring invalid MINER_INTERVAL_SECONDS: {}", raw),
            }
        }
        if let Some(raw) = non_empty_env("MINER_BLUE_CHIPS") {
            let list = parse_string_list(&raw);
            if !list.is_empty() {
                self.opportunities.blue_chips = list;
            }
        }
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_string_list(input: &str) -> Vec<String> {
    let trimmed = input.trim();

    // Si parece JSON (empieza con '['), intentar parsear como JSON
    if trimmed.starts_with('[') {
        if let Ok(v) = serde_json::from_str::<Vec<String>>(trimmed) {
            return v;
        }
    }

    trimmed
        .trim_start_matches('[')
        .trim_end_matches(']')
        .split(',')
        .map(|s| s.trim().trim_matches('"').trim_matches('\'').to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
