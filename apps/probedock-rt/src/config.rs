//! Agent address resolution.
//!
//! Layers, lowest first: built-in defaults, the `probedock-rt` node of
//! `~/.probedock/probedock-rt.yml`, then `PROBEDOCK_RT_*` environment
//! variables. Loading never fails; a broken file is logged and skipped.
//!
//! ```yaml
//! probedock-rt:
//!   enable: true
//!   host: 127.0.0.1
//!   port: 1337
//!   connectTimeoutMs: 5000
//!   filtersTimeoutMs: 10000
//! ```

use directories::BaseDirs;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 1337;
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(5_000);
pub const DEFAULT_FILTERS_TIMEOUT: Duration = Duration::from_millis(10_000);

const CONFIG_RELATIVE_PATH: &str = ".probedock/probedock-rt.yml";

pub const ENV_CONFIG: &str = "PROBEDOCK_RT_CONFIG";
pub const ENV_ENABLE: &str = "PROBEDOCK_RT_ENABLE";
pub const ENV_HOST: &str = "PROBEDOCK_RT_HOST";
pub const ENV_PORT: &str = "PROBEDOCK_RT_PORT";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to determine home directory")]
    HomeDirUnavailable,
    #[error("failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid configuration: {0}")]
    Yaml(String),
    #[error("invalid value {value:?} for {key}")]
    InvalidValue { key: String, value: String },
}

impl From<serde_yaml_ng::Error> for ConfigError {
    fn from(value: serde_yaml_ng::Error) -> Self {
        ConfigError::Yaml(value.to_string())
    }
}

/// Where the agent listens. Immutable once resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Self::new(DEFAULT_HOST, DEFAULT_PORT)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub enabled: bool,
    pub endpoint: Endpoint,
    pub connect_timeout: Duration,
    pub filters_timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: Endpoint::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            filters_timeout: DEFAULT_FILTERS_TIMEOUT,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(rename = "probedock-rt", default)]
    section: Option<Section>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Section {
    enable: Option<bool>,
    host: Option<String>,
    port: Option<u16>,
    connect_timeout_ms: Option<u64>,
    filters_timeout_ms: Option<u64>,
}

impl Settings {
    /// Resolves settings from the user's config file and the process environment.
    pub fn load() -> Self {
        let path = match config_path(|key| std::env::var(key).ok()) {
            Ok(path) => Some(path),
            Err(err) => {
                tracing::warn!(target: "probedock_rt::config", error = %err, "using default agent settings");
                None
            }
        };
        Self::resolve(path.as_deref(), |key| std::env::var(key).ok())
    }

    pub fn resolve<F>(path: Option<&Path>, env: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = Settings::default();
        if let Some(path) = path {
            match read_file(path) {
                Ok(Some(raw)) => match settings.clone().merge_yaml(&raw) {
                    Ok(merged) => settings = merged,
                    Err(err) => tracing::warn!(
                        target: "probedock_rt::config",
                        path = %path.display(),
                        error = %err,
                        "unable to load the probedock rt configuration"
                    ),
                },
                Ok(None) => {
                    tracing::debug!(target: "probedock_rt::config", path = %path.display(), "no config file")
                }
                Err(err) => tracing::warn!(
                    target: "probedock_rt::config",
                    error = %err,
                    "unable to load the probedock rt configuration"
                ),
            }
        }
        settings.apply_env(env)
    }

    /// Overlays the `probedock-rt` node of a YAML document. Other root nodes are ignored.
    pub fn merge_yaml(mut self, raw: &str) -> Result<Self, ConfigError> {
        if raw.trim().is_empty() {
            return Ok(self);
        }
        let file: ConfigFile = serde_yaml_ng::from_str(raw)?;
        let Some(section) = file.section else {
            return Ok(self);
        };
        if let Some(enable) = section.enable {
            self.enabled = enable;
        }
        if let Some(host) = section.host {
            self.endpoint.host = host;
        }
        if let Some(port) = section.port {
            self.endpoint.port = port;
        }
        if let Some(ms) = section.connect_timeout_ms {
            self.connect_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = section.filters_timeout_ms {
            self.filters_timeout = Duration::from_millis(ms);
        }
        Ok(self)
    }

    /// Applies `PROBEDOCK_RT_*` overrides. Unparseable values are logged and skipped.
    pub fn apply_env<F>(mut self, env: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = non_empty(env(ENV_ENABLE)) {
            match parse_bool(ENV_ENABLE, &raw) {
                Ok(enabled) => self.enabled = enabled,
                Err(err) => tracing::warn!(target: "probedock_rt::config", error = %err, "ignoring override"),
            }
        }
        if let Some(host) = non_empty(env(ENV_HOST)) {
            self.endpoint.host = host;
        }
        if let Some(raw) = non_empty(env(ENV_PORT)) {
            match raw.trim().parse::<u16>() {
                Ok(port) => self.endpoint.port = port,
                Err(_) => {
                    let err = ConfigError::InvalidValue {
                        key: ENV_PORT.into(),
                        value: raw,
                    };
                    tracing::warn!(target: "probedock_rt::config", error = %err, "ignoring override");
                }
            }
        }
        self
    }

    pub fn url(&self) -> String {
        self.endpoint.url()
    }
}

/// `PROBEDOCK_RT_CONFIG` if set, otherwise `~/.probedock/probedock-rt.yml`.
pub fn config_path<F>(env: F) -> Result<PathBuf, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(path) = non_empty(env(ENV_CONFIG)) {
        return Ok(PathBuf::from(path));
    }
    let base = BaseDirs::new().ok_or(ConfigError::HomeDirUnavailable)?;
    Ok(base.home_dir().join(CONFIG_RELATIVE_PATH))
}

fn read_file(path: &Path) -> Result<Option<String>, ConfigError> {
    match fs::read_to_string(path) {
        Ok(raw) => Ok(Some(raw)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}

fn parse_bool(key: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: raw.to_string(),
        }),
    }
}
