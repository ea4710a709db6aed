//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! Provider API keys come from the REMOVEBG_API_KEYS env var or seed_keys_file,
//! never from the TOML itself.

use common::Secret;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use removebg::{REMOVE_BG_ENDPOINT, RemovalConfig};

/// Env var holding comma-separated provider keys to seed at startup.
const SEED_KEYS_ENV: &str = "REMOVEBG_API_KEYS";

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub keys: KeysConfig,
    #[serde(default)]
    pub removebg: RemoveBgConfig,
    #[serde(default)]
    pub profiles: ProfilesConfig,
}

/// Listener settings
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    /// Admin API listener, kept off the public address
    #[serde(default = "default_admin_addr")]
    pub admin_addr: SocketAddr,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

/// Key store settings
#[derive(Debug, Deserialize)]
pub struct KeysConfig {
    #[serde(default = "default_key_store_path")]
    pub store_path: PathBuf,
    /// File with one provider key per line (alternative to REMOVEBG_API_KEYS)
    #[serde(default)]
    pub seed_keys_file: Option<PathBuf>,
    #[serde(skip)]
    pub seed_keys: Vec<Secret<String>>,
}

/// remove.bg client settings
#[derive(Debug, Deserialize)]
pub struct RemoveBgConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_keys")]
    pub max_keys: usize,
    #[serde(default = "default_transient_retries")]
    pub transient_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

/// Profile store settings
#[derive(Debug, Deserialize)]
pub struct ProfilesConfig {
    #[serde(default = "default_profile_store_path")]
    pub store_path: PathBuf,
}

fn default_admin_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 9090))
}

fn default_max_connections() -> usize {
    1000
}

fn default_key_store_path() -> PathBuf {
    PathBuf::from("data/removebg-keys.json")
}

fn default_profile_store_path() -> PathBuf {
    PathBuf::from("data/profiles.json")
}

fn default_endpoint() -> String {
    REMOVE_BG_ENDPOINT.to_string()
}

fn default_timeout() -> u64 {
    30
}

fn default_max_keys() -> usize {
    5
}

fn default_transient_retries() -> u32 {
    1
}

fn default_retry_backoff_ms() -> u64 {
    250
}

impl Default for KeysConfig {
    fn default() -> Self {
        Self {
            store_path: default_key_store_path(),
            seed_keys_file: None,
            seed_keys: Vec::new(),
        }
    }
}

impl Default for RemoveBgConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            timeout_secs: default_timeout(),
            max_keys: default_max_keys(),
            transient_retries: default_transient_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

impl Default for ProfilesConfig {
    fn default() -> Self {
        Self {
            store_path: default_profile_store_path(),
        }
    }
}

impl RemoveBgConfig {
    pub fn client_config(&self) -> RemovalConfig {
        RemovalConfig {
            endpoint: self.endpoint.clone(),
            timeout: Some(Duration::from_secs(self.timeout_secs)),
            max_keys: self.max_keys,
            transient_retries: self.transient_retries,
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// Seed key resolution order:
    /// 1. REMOVEBG_API_KEYS env var (comma separated)
    /// 2. seed_keys_file path from config (one key per line)
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        if !config.removebg.endpoint.starts_with("http://")
            && !config.removebg.endpoint.starts_with("https://")
        {
            return Err(common::Error::Config(format!(
                "removebg.endpoint must start with http:// or https://, got: {}",
                config.removebg.endpoint
            )));
        }

        if config.removebg.timeout_secs == 0 {
            return Err(common::Error::Config(
                "removebg.timeout_secs must be greater than 0".into(),
            ));
        }

        if config.removebg.max_keys == 0 {
            return Err(common::Error::Config(
                "removebg.max_keys must be greater than 0".into(),
            ));
        }

        if config.server.max_connections == 0 {
            return Err(common::Error::Config(
                "server.max_connections must be greater than 0".into(),
            ));
        }

        if let Ok(keys) = std::env::var(SEED_KEYS_ENV) {
            config.keys.seed_keys = split_keys(&keys, ',');
        } else if let Some(ref key_file) = config.keys.seed_keys_file {
            let contents = std::fs::read_to_string(key_file).map_err(|e| {
                common::Error::Config(format!(
                    "failed to read seed_keys_file {}: {e}",
                    key_file.display()
                ))
            })?;
            config.keys.seed_keys = split_keys(&contents, '\n');
        }

        Ok(config)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("leave-consent.toml")
    }
}

/// Split a key list. Position fixes the seeded id, so interior blanks are
/// kept (seeding skips them without shifting later ids); trailing blanks are
/// dropped.
fn split_keys(raw: &str, separator: char) -> Vec<Secret<String>> {
    let mut keys: Vec<Secret<String>> = raw
        .split(separator)
        .map(|k| Secret::from(k.trim()))
        .collect();
    while keys.last().is_some_and(|k| k.is_blank()) {
        keys.pop();
    }
    keys
}
