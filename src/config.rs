use anyhow::{Context, Result};
use dirs::config_dir;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure for repowatch
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    /// Storage locations for tracking and token databases
    #[serde(default)]
    pub storage: StorageConfig,

    /// Polling and failure escalation settings
    #[serde(default)]
    pub monitor: MonitorConfig,

    /// Telegram delivery settings
    #[serde(default)]
    pub telegram: TelegramConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Database file locations
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StorageConfig {
    /// Tracked items and subscriptions database
    #[serde(default = "default_tracking_db")]
    pub tracking_db: String,

    /// Per-user GitHub token database
    #[serde(default = "default_token_db")]
    pub token_db: String,
}

/// Polling configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct MonitorConfig {
    /// Poll interval
    #[serde(default = "default_interval")]
    pub interval: String, // "5m"

    /// Timeout for a single GitHub fetch in seconds
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout: u64,

    /// Page size for the starred-repository fetch
    #[serde(default = "default_star_page_size")]
    pub star_page_size: u8,

    /// Consecutive not-found results before an item is removed
    #[serde(default = "default_not_found_threshold")]
    pub not_found_threshold: u32,

    /// Maximum concurrent item checks within one pass
    #[serde(default = "default_max_parallel")]
    pub max_parallel_checks: usize,

    /// Orphaned items are purged once every N passes
    #[serde(default = "default_purge_every")]
    pub purge_every_passes: u32,
}

/// Telegram bot configuration
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct TelegramConfig {
    /// Bot API token (falls back to the BOT_TOKEN environment variable)
    pub bot_token: Option<String>,
}

/// Logging configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String, // "info"

    /// Log format
    #[serde(default = "default_log_format")]
    pub format: String, // "compact"
}

// Default value functions
fn default_tracking_db() -> String {
    default_data_file("tracking.db")
}
fn default_token_db() -> String {
    default_data_file("tokens.db")
}
fn default_interval() -> String {
    "5m".to_string()
}
fn default_fetch_timeout() -> u64 {
    30
}
fn default_star_page_size() -> u8 {
    10
}
fn default_not_found_threshold() -> u32 {
    5
}
fn default_max_parallel() -> usize {
    4
}
fn default_purge_every() -> u32 {
    12
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "compact".to_string()
}

fn default_data_file(name: &str) -> String {
    let data_dir = if let Ok(data_home) = std::env::var("XDG_DATA_HOME") {
        PathBuf::from(data_home)
    } else if let Ok(home) = std::env::var("HOME") {
        PathBuf::from(home).join(".local/share")
    } else {
        PathBuf::from("/tmp")
    };

    data_dir
        .join("repowatch")
        .join(name)
        .to_string_lossy()
        .into_owned()
}

/// Parse duration strings like "30s", "5m", "1h", "2d" into seconds
pub fn parse_duration(duration_str: &str) -> Result<Duration> {
    let duration_str = duration_str.trim().to_lowercase();

    let secs = if let Some(value) = duration_str.strip_suffix('s') {
        value.parse::<u64>().context("Invalid seconds value")?
    } else if let Some(value) = duration_str.strip_suffix('m') {
        value
            .parse::<u64>()
            .map(|v| v * 60)
            .context("Invalid minutes value")?
    } else if let Some(value) = duration_str.strip_suffix('h') {
        value
            .parse::<u64>()
            .map(|v| v * 3600)
            .context("Invalid hours value")?
    } else if let Some(value) = duration_str.strip_suffix('d') {
        value
            .parse::<u64>()
            .map(|v| v * 86400)
            .context("Invalid days value")?
    } else {
        // Try to parse as raw seconds
        duration_str
            .parse::<u64>()
            .context("Invalid duration format. Use format like '30s', '5m', '1h'")?
    };

    Ok(Duration::from_secs(secs))
}

// Default implementations
impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            tracking_db: default_tracking_db(),
            token_db: default_token_db(),
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: default_interval(),
            fetch_timeout: default_fetch_timeout(),
            star_page_size: default_star_page_size(),
            not_found_threshold: default_not_found_threshold(),
            max_parallel_checks: default_max_parallel(),
            purge_every_passes: default_purge_every(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            monitor: MonitorConfig::default(),
            telegram: TelegramConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the default location or create a default config
    pub fn load_or_default() -> Result<Self> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load(&config_path)
        } else {
            let config = Self::default();

            if let Some(parent) = config_path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
            }

            config.save(&config_path)?;

            tracing::info!("Created default configuration at: {:?}", config_path);
            Ok(config)
        }
    }

    /// Load configuration from a specific file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_yaml::to_string(self).context("Failed to serialize configuration")?;

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {:?}", path))?;

        Ok(())
    }

    /// Get the default configuration file path (XDG compliant)
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir = config_dir().context("Failed to get user config directory")?;

        Ok(config_dir.join("repowatch").join("config.yml"))
    }

    /// Poll interval as a Duration
    pub fn poll_interval(&self) -> Result<Duration> {
        parse_duration(&self.monitor.interval).context("Failed to parse monitor.interval")
    }

    /// Per-fetch timeout as a Duration
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.monitor.fetch_timeout)
    }

    /// Resolve the Telegram bot token from config or environment
    pub fn bot_token(&self) -> Result<String> {
        if let Some(token) = &self.telegram.bot_token {
            if !token.is_empty() {
                return Ok(token.clone());
            }
        }

        std::env::var("BOT_TOKEN")
            .context("No Telegram bot token configured. Set telegram.bot_token or BOT_TOKEN")
    }
}
