use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub telegram: TelegramConfig,
    pub stats: Option<StatsConfig>,
    pub server: ServerConfig,
    pub relay: RelayConfig,
}

#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub api_token: String,
    pub poll_timeout_secs: u64,
    pub register_reply: String,
}

impl TelegramConfig {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_secs)
    }
}

#[derive(Debug, Clone)]
pub struct StatsConfig {
    pub url: String,
    /// Value placed after `Basic ` in the Authorization header.
    pub auth: Option<String>,
    pub timeout_secs: u64,
}

impl StatsConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RelayConfig {
    #[serde(default = "default_send_retries")]
    pub send_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            send_retries: default_send_retries(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

impl RelayConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

// Non-secret settings that may come from the TOML file. Secrets only come
// from the environment.
#[derive(Debug, Deserialize, Default)]
struct FileConfig {
    #[serde(default)]
    telegram: FileTelegram,
    #[serde(default)]
    stats: FileStats,
    #[serde(default)]
    server: ServerConfig,
    #[serde(default)]
    relay: RelayConfig,
}

#[derive(Debug, Deserialize)]
struct FileTelegram {
    #[serde(default = "default_poll_timeout_secs")]
    poll_timeout_secs: u64,
    #[serde(default = "default_register_reply")]
    register_reply: String,
}

impl Default for FileTelegram {
    fn default() -> Self {
        Self {
            poll_timeout_secs: default_poll_timeout_secs(),
            register_reply: default_register_reply(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct FileStats {
    #[serde(default = "default_stats_timeout_secs")]
    timeout_secs: u64,
}

impl Default for FileStats {
    fn default() -> Self {
        Self {
            timeout_secs: default_stats_timeout_secs(),
        }
    }
}

fn default_listen_addr() -> String {
    "127.0.0.1:8000".to_string()
}

fn default_send_retries() -> u32 {
    2
}

fn default_retry_delay_ms() -> u64 {
    500
}

fn default_poll_timeout_secs() -> u64 {
    30
}

fn default_register_reply() -> String {
    "Registered! I'm the relay bot".to_string()
}

fn default_stats_timeout_secs() -> u64 {
    2
}

pub const DEFAULT_CONFIG_PATH: &str = "relaybot.toml";

impl Config {
    /// Load settings from the TOML file at `path` (if any) and secrets from
    /// the process environment.
    ///
    /// An explicitly given path must exist. When `path` is `None`, the
    /// default `relaybot.toml` is read only if present.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let content = match path {
            Some(path) => Some(
                std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file: {}", path.display()))?,
            ),
            None => {
                let default = Path::new(DEFAULT_CONFIG_PATH);
                if default.exists() {
                    Some(std::fs::read_to_string(default).with_context(|| {
                        format!("Failed to read config file: {}", default.display())
                    })?)
                } else {
                    None
                }
            }
        };

        Self::from_sources(content.as_deref(), |key| std::env::var(key).ok())
    }

    pub fn from_sources<F>(file: Option<&str>, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let file: FileConfig = match file {
            Some(content) => toml::from_str(content).context("Failed to parse config file")?,
            None => FileConfig::default(),
        };

        let non_empty = |key: &str| env(key).filter(|v| !v.trim().is_empty());

        let api_token =
            non_empty("TELEGRAM_APITOKEN").context("TELEGRAM_APITOKEN is not set")?;

        let stats = non_empty("STATS_URL").map(|url| StatsConfig {
            url,
            auth: non_empty("STATS_AUTH"),
            timeout_secs: file.stats.timeout_secs,
        });

        Ok(Config {
            telegram: TelegramConfig {
                api_token,
                poll_timeout_secs: file.telegram.poll_timeout_secs,
                register_reply: file.telegram.register_reply,
            },
            stats,
            server: file.server,
            relay: file.relay,
        })
    }
}
