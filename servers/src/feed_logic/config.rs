use clap::Parser;
use lib_feed::GovernorSettings;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const DEFAULT_CONFIG_FILE: &str = "server_feed.conf";

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[clap(about = "Weight-governed market data feed over WebSocket", version)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[clap(long, env = "FEED_PORT", help = "Port to listen on for client connections.")]
    pub port: Option<u16>,

    #[clap(long, env = "FEED_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "FEED_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "FEED_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "FEED_BASE_URL", help = "Base URL of the weight-limited REST API.")]
    pub base_url: Option<String>,

    #[clap(long, env = "FEED_HEARTBEAT_MS", help = "Heartbeat period in milliseconds.")]
    pub heartbeat_ms: Option<u64>,

    #[clap(long, env = "FEED_INITIAL_DIVIDER", help = "Heartbeats per poll at startup and after a disconnect.")]
    pub initial_divider: Option<u32>,

    #[clap(long, env = "FEED_TARGET_FRACTION", help = "Fraction of the weight budget to aim for.")]
    pub target_fraction: Option<f64>,

    #[clap(long, env = "FEED_CALL_TIMEOUT_MS", help = "Timeout for a single remote call in milliseconds.")]
    pub call_timeout_ms: Option<u64>,

    /// Full governor block; only read from the config file.
    #[clap(skip)]
    pub governor: Option<GovernorSettings>,
}

impl Config {
    // Merge two Config structs, where 'other' overrides 'self' for Some values
    fn merge(self, other: Config) -> Config {
        Config {
            port: other.port.or(self.port),
            config_path: other.config_path.or(self.config_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            base_url: other.base_url.or(self.base_url),
            heartbeat_ms: other.heartbeat_ms.or(self.heartbeat_ms),
            initial_divider: other.initial_divider.or(self.initial_divider),
            target_fraction: other.target_fraction.or(self.target_fraction),
            call_timeout_ms: other.call_timeout_ms.or(self.call_timeout_ms),
            governor: other.governor.or(self.governor),
        }
    }

    pub fn defaults() -> Config {
        Config {
            port: Some(9003),
            log_dir: Some(PathBuf::from("./logs")),
            log_level: Some("info".to_string()),
            base_url: Some(lib_feed::markets::binance::apicall::DEFAULT_BASE_URL.to_string()),
            ..Default::default()
        }
    }

    /// Governor settings: the file's `governor` block with the flat knobs on top.
    pub fn governor_settings(&self) -> GovernorSettings {
        let mut settings = self.governor.clone().unwrap_or_default();
        if let Some(ms) = self.heartbeat_ms {
            settings.heartbeat_ms = ms;
        }
        if let Some(divider) = self.initial_divider {
            settings.initial_divider = divider;
        }
        if let Some(fraction) = self.target_fraction {
            settings.target_fraction = fraction;
        }
        if let Some(ms) = self.call_timeout_ms {
            settings.call_timeout_ms = ms;
        }
        settings
    }
}

fn read_config_file(path: &Path) -> Option<Config> {
    if !path.exists() {
        log::info!("Config file not found at {}. Using defaults and environment/CLI variables.", path.display());
        return None;
    }
    match fs::read_to_string(path) {
        Ok(config_str) => match serde_json::from_str::<Config>(&config_str) {
            Ok(file_config) => Some(file_config),
            Err(e) => {
                log::warn!("Failed to parse config file {}: {}. Falling back to other sources.", path.display(), e);
                None
            }
        },
        Err(e) => {
            log::warn!("Failed to read config file {}: {}. Falling back to other sources.", path.display(), e);
            None
        }
    }
}

/// Defaults, then the JSON file, then environment variables and CLI arguments.
pub fn resolve_config(cli: Config) -> Config {
    let config_file_path = cli
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

    let mut current_config = Config::defaults();
    if let Some(file_config) = read_config_file(&config_file_path) {
        current_config = current_config.merge(file_config);
    }
    current_config.merge(cli)
}

pub fn load_config() -> Config {
    // clap handles both env vars and CLI args
    resolve_config(Config::parse())
}
