//! Settings and configuration module
//!
//! Provides unified configuration with:
//! - Builder-style overrides
//! - `.env` / environment loading
//! - Startup validation of referenced files and proxy formats

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

use crate::modules::health::HealthThresholds;
use crate::modules::proxy::{DEFAULT_COOLDOWN, default_blacklist_path};
use crate::probe::{ProberConfig, RetryPolicy};

pub const DEFAULT_CHUNK_SIZE: usize = 50;
pub const DEFAULT_PACING_MIN: Duration = Duration::from_millis(1500);
pub const DEFAULT_PACING_MAX: Duration = Duration::from_millis(4000);
pub const DEFAULT_RERUN_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

const DEFAULT_RESULTS_DB: &str = "output/results.redb";
const DEFAULT_CHECKPOINT: &str = "output/run_metadata.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load env file: {0}")]
    EnvFile(#[from] dotenvy::Error),
    #[error("required setting {0} is not set")]
    Missing(&'static str),
    #[error("invalid value '{value}' for {key}")]
    Invalid { key: &'static str, value: String },
}

/// Everything a sweep needs to run.
#[derive(Debug, Clone)]
pub struct SweepConfig {
    pub proxy_list_path: PathBuf,
    pub blacklist_path: PathBuf,
    pub identifier_list_path: PathBuf,
    pub results_db_path: PathBuf,
    pub checkpoint_path: PathBuf,
    pub report_dir: PathBuf,
    pub telegram_bot_token: Option<String>,
    pub telegram_chat_id: Option<String>,
    pub chunk_size: usize,
    pub proxy_cooldown: Duration,
    /// Bounds of the random pause between chunks.
    pub pacing: (Duration, Duration),
    pub rerun_interval: Duration,
    pub prober: ProberConfig,
    pub health: HealthThresholds,
}

impl SweepConfig {
    /// Config with default settings for the given proxy and identifier lists.
    pub fn new(proxy_list_path: impl Into<PathBuf>, identifier_list_path: impl Into<PathBuf>) -> Self {
        let proxy_list_path = proxy_list_path.into();
        let results_db_path = PathBuf::from(DEFAULT_RESULTS_DB);
        Self {
            blacklist_path: default_blacklist_path(&proxy_list_path),
            proxy_list_path,
            identifier_list_path: identifier_list_path.into(),
            report_dir: parent_dir(&results_db_path),
            results_db_path,
            checkpoint_path: PathBuf::from(DEFAULT_CHECKPOINT),
            telegram_bot_token: None,
            telegram_chat_id: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
            proxy_cooldown: DEFAULT_COOLDOWN,
            pacing: (DEFAULT_PACING_MIN, DEFAULT_PACING_MAX),
            rerun_interval: DEFAULT_RERUN_INTERVAL,
            prober: ProberConfig::default(),
            health: HealthThresholds::default(),
        }
    }

    /// Read settings from the process environment, after loading `env_file`
    /// (or `.env` in the working directory) when it exists.
    pub fn from_env(env_file: Option<&Path>) -> Result<Self, ConfigError> {
        if load_env_file(env_file)? {
            log::debug!("environment file loaded");
        } else {
            log::debug!("no environment file found");
        }
        Self::from_process_env()
    }

    /// Read settings from variables already present in the process
    /// environment.
    pub fn from_process_env() -> Result<Self, ConfigError> {
        let mut config = Self::new(
            required("PROXY_LIST_PATH")?,
            required("IDENTIFIER_LIST_PATH")?,
        );

        if let Some(path) = optional("BAD_PROXY_LIST_PATH") {
            config.blacklist_path = path.into();
        }
        if let Some(path) = optional("OUTPUT_DB_PATH") {
            config = config.with_results_db_path(path);
        }
        if let Some(path) = optional("METADATA_PATH") {
            config.checkpoint_path = path.into();
        }
        if let Some(dir) = optional("REPORT_DIR") {
            config.report_dir = dir.into();
        }
        config.telegram_bot_token = optional("TELEGRAM_BOT_TOKEN");
        config.telegram_chat_id = optional("TELEGRAM_CHAT_ID");

        if let Some(template) = optional("PROBE_URL_TEMPLATE") {
            config.prober = config.prober.with_url_template(template);
        }
        if let Some(marker) = optional("NOT_FOUND_MARKER") {
            config.prober = config.prober.with_not_found_marker(marker);
        }
        if let Some(size) = parsed::<usize>("CHUNK_SIZE")? {
            config.chunk_size = size;
        }
        if let Some(secs) = parsed::<u64>("PROXY_COOLDOWN_SECS")? {
            config.proxy_cooldown = Duration::from_secs(secs);
        }

        Ok(config)
    }

    pub fn with_results_db_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.results_db_path = path.into();
        self.report_dir = parent_dir(&self.results_db_path);
        self
    }

    pub fn with_checkpoint_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.checkpoint_path = path.into();
        self
    }

    pub fn with_report_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.report_dir = dir.into();
        self
    }

    pub fn with_blacklist_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.blacklist_path = path.into();
        self
    }

    pub fn with_telegram(mut self, bot_token: impl Into<String>, chat_id: impl Into<String>) -> Self {
        self.telegram_bot_token = Some(bot_token.into());
        self.telegram_chat_id = Some(chat_id.into());
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_proxy_cooldown(mut self, cooldown: Duration) -> Self {
        self.proxy_cooldown = cooldown;
        self
    }

    pub fn with_pacing(mut self, min: Duration, max: Duration) -> Self {
        self.pacing = (min, if max < min { min } else { max });
        self
    }

    pub fn with_rerun_interval(mut self, interval: Duration) -> Self {
        self.rerun_interval = interval;
        self
    }

    pub fn with_prober(mut self, prober: ProberConfig) -> Self {
        self.prober = prober;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.prober = self.prober.with_retry(retry);
        self
    }

    pub fn with_health_thresholds(mut self, thresholds: HealthThresholds) -> Self {
        self.health = thresholds;
        self
    }

    /// Collect every configuration problem. An empty list means the sweep
    /// may start.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        for path in [&self.proxy_list_path, &self.identifier_list_path] {
            if !path.exists() {
                errors.push(format!("file not found: {}", path.display()));
            }
        }

        if let Some(problem) = first_malformed_proxy(&self.proxy_list_path) {
            errors.push(problem);
        }

        if self.chunk_size == 0 {
            errors.push("chunk size must be at least 1".to_string());
        }

        if !self.prober.url_template.contains("{id}") {
            errors.push(format!(
                "probe url template '{}' has no {{id}} placeholder",
                self.prober.url_template
            ));
        }

        if self.telegram_bot_token.is_none() || self.telegram_chat_id.is_none() {
            log::warn!("telegram credentials not set; notifications are disabled");
        }

        if errors.is_empty() {
            log::info!("configuration passed validation");
        } else {
            log::error!("configuration errors found:");
            for error in &errors {
                log::error!("  {error}");
            }
        }

        errors
    }
}

/// Load `env_file` (or `.env` in the working directory) into the process
/// environment. Returns `false` when there is no such file. Variables that are
/// already set are left alone.
pub fn load_env_file(env_file: Option<&Path>) -> Result<bool, ConfigError> {
    let loaded = match env_file {
        Some(path) => dotenvy::from_path(path),
        None => dotenvy::dotenv().map(|_| ()),
    };
    match loaded {
        Ok(()) => Ok(true),
        Err(dotenvy::Error::Io(_)) => Ok(false),
        Err(err) => Err(err.into()),
    }
}

static PROXY_WITH_AUTH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\S+:\S+@\S+:\d+$").expect("invalid proxy regex"));

static PROXY_PLAIN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\S+:\d+$").expect("invalid proxy regex"));

/// Whether a proxy line looks like `[scheme://][user:pass@]host:port`.
pub fn is_valid_proxy_line(line: &str) -> bool {
    let address = line.split_once("://").map_or(line, |(_, rest)| rest);
    PROXY_WITH_AUTH_RE.is_match(address) || PROXY_PLAIN_RE.is_match(address)
}

fn first_malformed_proxy(path: &Path) -> Option<String> {
    let contents = fs::read_to_string(path).ok()?;
    contents
        .lines()
        .enumerate()
        .map(|(index, line)| (index + 1, line.trim()))
        .find(|(_, line)| !line.is_empty() && !is_valid_proxy_line(line))
        .map(|(number, line)| {
            format!(
                "malformed proxy '{line}' on line {number}; expected host:port or user:pass@host:port"
            )
        })
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn optional(key: &'static str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn required(key: &'static str) -> Result<String, ConfigError> {
    optional(key).ok_or(ConfigError::Missing(key))
}

fn parsed<T: FromStr>(key: &'static str) -> Result<Option<T>, ConfigError> {
    match optional(key) {
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { key, value }),
        None => Ok(None),
    }
}
