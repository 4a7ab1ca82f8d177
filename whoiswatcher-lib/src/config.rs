//! Configuration file parsing and management.
//!
//! Settings are layered with this precedence (highest first): command-line
//! flags, `WW_*` environment variables, configuration files, built-in
//! defaults. This module covers the two middle layers; each layer applies
//! itself on top of a [`WatchConfig`].

use crate::error::WatchError;
use crate::rules::TerminationPolicy;
use crate::types::{LookupProtocol, WatchConfig};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Configuration loaded from TOML files.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FileConfig {
    /// Default values for CLI options
    #[serde(skip_serializing_if = "Option::is_none")]
    pub defaults: Option<DefaultsConfig>,
}

/// Default values that map to CLI options.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct DefaultsConfig {
    /// Number of lookup workers
    #[serde(skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<usize>,

    /// Rate-limit cooldown (e.g. "10s", "2m")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sleep: Option<String>,

    /// Per-domain deadline
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deadline: Option<String>,

    /// Timeout of a single adapter call
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lookup_timeout: Option<String>,

    /// SOCKS5 proxy, "host:port"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,

    /// "rdap" or "whois"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub bootstrap: Option<bool>,

    /// Path to the watchlist file
    #[serde(skip_serializing_if = "Option::is_none")]
    pub watchlist: Option<String>,

    /// Deferral limit per domain; 0 means unbounded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_deferrals: Option<u32>,

    /// "asymmetric", "first-match" or "all-matches"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub termination: Option<String>,
}

impl DefaultsConfig {
    /// Apply these defaults on top of `config`.
    pub fn apply(&self, mut config: WatchConfig) -> Result<WatchConfig, WatchError> {
        if let Some(concurrency) = self.concurrency {
            config = config.with_concurrency(concurrency);
        }
        if let Some(sleep) = &self.sleep {
            config = config.with_cooldown(require_duration("sleep", sleep)?);
        }
        if let Some(deadline) = &self.deadline {
            config = config.with_lookup_deadline(require_duration("deadline", deadline)?);
        }
        if let Some(timeout) = &self.lookup_timeout {
            config = config.with_lookup_timeout(require_duration("lookup_timeout", timeout)?);
        }
        if let Some(proxy) = &self.proxy {
            config = config.with_proxy(proxy.clone());
        }
        if let Some(protocol) = &self.protocol {
            config = config.with_protocol(protocol.parse::<LookupProtocol>()?);
        }
        if let Some(bootstrap) = self.bootstrap {
            config = config.with_bootstrap(bootstrap);
        }
        if let Some(max) = self.max_deferrals {
            config = config.with_max_deferrals((max > 0).then_some(max));
        }
        if let Some(termination) = &self.termination {
            config = config.with_termination(termination.parse::<TerminationPolicy>()?);
        }
        Ok(config)
    }
}

/// Configuration discovery and loading functionality.
#[derive(Debug, Default)]
pub struct ConfigManager;

impl ConfigManager {
    pub fn new() -> Self {
        Self
    }

    /// Load configuration from a specific file.
    pub fn load_file<P: AsRef<Path>>(&self, path: P) -> Result<FileConfig, WatchError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(WatchError::file_error(
                path.to_string_lossy(),
                "Configuration file not found",
            ));
        }

        let content = fs::read_to_string(path).map_err(|e| {
            WatchError::file_error(
                path.to_string_lossy(),
                format!("Failed to read configuration file: {}", e),
            )
        })?;

        let config: FileConfig = toml::from_str(&content).map_err(|e| {
            WatchError::config(format!(
                "Failed to parse TOML configuration '{}': {}",
                path.display(),
                e
            ))
        })?;

        self.validate_config(&config)?;
        debug!(path = %path.display(), "loaded configuration file");
        Ok(config)
    }

    /// Discover and load configuration files in precedence order.
    ///
    /// XDG config, then the home directory, then the working directory;
    /// later files override earlier ones field by field. A file that exists
    /// but does not parse is an error.
    pub fn discover_and_load(&self) -> Result<FileConfig, WatchError> {
        let mut merged = FileConfig::default();

        let candidates = [
            self.xdg_config_path(),
            self.global_config_path(),
            self.local_config_path(),
        ];
        for path in candidates.into_iter().flatten() {
            let config = self.load_file(&path)?;
            merged = self.merge_configs(merged, config);
        }

        Ok(merged)
    }

    fn local_config_path(&self) -> Option<PathBuf> {
        ["./whoiswatcher.toml", "./.whoiswatcher.toml"]
            .iter()
            .map(Path::new)
            .find(|path| path.exists())
            .map(Path::to_path_buf)
    }

    fn global_config_path(&self) -> Option<PathBuf> {
        let home = env::var_os("HOME")?;
        let path = Path::new(&home).join(".whoiswatcher.toml");
        path.exists().then_some(path)
    }

    fn xdg_config_path(&self) -> Option<PathBuf> {
        let config_dir = env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| env::var_os("HOME").map(|home| Path::new(&home).join(".config")))?;

        let path = config_dir.join("whoiswatcher").join("config.toml");
        path.exists().then_some(path)
    }

    /// Merge two configurations; values from `higher` win.
    fn merge_configs(&self, lower: FileConfig, higher: FileConfig) -> FileConfig {
        let defaults = match (lower.defaults, higher.defaults) {
            (Some(lower), Some(higher)) => Some(DefaultsConfig {
                concurrency: higher.concurrency.or(lower.concurrency),
                sleep: higher.sleep.or(lower.sleep),
                deadline: higher.deadline.or(lower.deadline),
                lookup_timeout: higher.lookup_timeout.or(lower.lookup_timeout),
                proxy: higher.proxy.or(lower.proxy),
                protocol: higher.protocol.or(lower.protocol),
                bootstrap: higher.bootstrap.or(lower.bootstrap),
                watchlist: higher.watchlist.or(lower.watchlist),
                max_deferrals: higher.max_deferrals.or(lower.max_deferrals),
                termination: higher.termination.or(lower.termination),
            }),
            (lower, higher) => higher.or(lower),
        };
        FileConfig { defaults }
    }

    /// Validate a configuration for common issues.
    fn validate_config(&self, config: &FileConfig) -> Result<(), WatchError> {
        let Some(defaults) = &config.defaults else {
            return Ok(());
        };

        if let Some(concurrency) = defaults.concurrency {
            if concurrency == 0 || concurrency > 100 {
                return Err(WatchError::config("Concurrency must be between 1 and 100"));
            }
        }

        // Parse once here so a bad value is reported at load time.
        defaults.apply(WatchConfig::default())?;
        Ok(())
    }
}

/// Configuration taken from `WW_*` environment variables.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvConfig {
    pub concurrency: Option<usize>,
    pub sleep: Option<Duration>,
    pub deadline: Option<Duration>,
    pub proxy: Option<String>,
    pub protocol: Option<LookupProtocol>,
    pub watchlist: Option<String>,
    pub config: Option<String>,
    pub bootstrap: Option<bool>,
}

impl EnvConfig {
    /// Read variables through `var`. Invalid values are ignored with a warning.
    pub fn from_vars<F>(var: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| var(name).filter(|v| !v.trim().is_empty());
        let mut env_config = EnvConfig::default();

        if let Some(val) = var("WW_CONCURRENCY") {
            match val.trim().parse::<usize>() {
                Ok(concurrency) if (1..=100).contains(&concurrency) => {
                    env_config.concurrency = Some(concurrency)
                }
                _ => warn!("Invalid WW_CONCURRENCY='{}', must be 1-100", val),
            }
        }

        if let Some(val) = var("WW_SLEEP") {
            env_config.sleep = parse_duration_string(&val);
            if env_config.sleep.is_none() {
                warn!("Invalid WW_SLEEP='{}', use format like '10s' or '2m'", val);
            }
        }

        if let Some(val) = var("WW_DEADLINE") {
            env_config.deadline = parse_duration_string(&val);
            if env_config.deadline.is_none() {
                warn!("Invalid WW_DEADLINE='{}', use format like '60s' or '2m'", val);
            }
        }

        if let Some(val) = var("WW_PROTOCOL") {
            match val.parse::<LookupProtocol>() {
                Ok(protocol) => env_config.protocol = Some(protocol),
                Err(_) => warn!("Invalid WW_PROTOCOL='{}', use rdap or whois", val),
            }
        }

        if let Some(val) = var("WW_BOOTSTRAP") {
            match parse_bool(&val) {
                Some(enabled) => env_config.bootstrap = Some(enabled),
                None => warn!("Invalid WW_BOOTSTRAP='{}', use true/false", val),
            }
        }

        env_config.proxy = var("WW_PROXY");
        env_config.watchlist = var("WW_WATCHLIST");
        env_config.config = var("WW_CONFIG");

        if env_config != EnvConfig::default() {
            debug!(?env_config, "using environment configuration");
        }
        env_config
    }

    /// Apply these values on top of `config`.
    pub fn apply(&self, mut config: WatchConfig) -> WatchConfig {
        if let Some(concurrency) = self.concurrency {
            config = config.with_concurrency(concurrency);
        }
        if let Some(sleep) = self.sleep {
            config = config.with_cooldown(sleep);
        }
        if let Some(deadline) = self.deadline {
            config = config.with_lookup_deadline(deadline);
        }
        if let Some(proxy) = &self.proxy {
            config = config.with_proxy(proxy.clone());
        }
        if let Some(protocol) = self.protocol {
            config = config.with_protocol(protocol);
        }
        if let Some(bootstrap) = self.bootstrap {
            config = config.with_bootstrap(bootstrap);
        }
        config
    }
}

/// Load configuration from the process environment.
pub fn load_env_config() -> EnvConfig {
    EnvConfig::from_vars(|name| env::var(name).ok())
}

/// Parse a duration like "5s", "2m" or a bare number of seconds.
pub fn parse_duration_string(value: &str) -> Option<Duration> {
    let value = value.trim().to_lowercase();

    let seconds = if let Some(s) = value.strip_suffix('s') {
        s.parse::<u64>().ok()
    } else if let Some(m) = value.strip_suffix('m') {
        m.parse::<u64>().ok().map(|m| m * 60)
    } else {
        value.parse::<u64>().ok()
    }?;

    Some(Duration::from_secs(seconds))
}

fn require_duration(name: &str, value: &str) -> Result<Duration, WatchError> {
    parse_duration_string(value).ok_or_else(|| {
        WatchError::config(format!(
            "Invalid {} '{}'. Use format like '5s', '30s', '2m'",
            name, value
        ))
    })
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}
