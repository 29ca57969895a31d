//! Bridge settings – reads/writes `~/.rce/bridge.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rce_bridge::ServiceOptions;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to access settings at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse settings: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to encode settings: {0}")]
    Encode(#[from] toml::ser::Error),
}

/// Tunables for the interface bridge and its worker pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeSettings {
    /// How long a service call waits for the remote service to appear.
    #[serde(default = "default_wait_for_service_timeout_ms")]
    pub wait_for_service_timeout_ms: u64,

    /// How long a finished call waits for `send` to bind its token.
    #[serde(default = "default_token_wait_ms")]
    pub token_wait_ms: u64,

    /// Finished results older than this are evicted.
    #[serde(default = "default_result_ttl_secs")]
    pub result_ttl_secs: u64,

    /// Upper bound on service calls executing at once.
    #[serde(default = "default_max_in_flight_calls")]
    pub max_in_flight_calls: usize,
}

fn default_wait_for_service_timeout_ms() -> u64 {
    10_000
}
fn default_token_wait_ms() -> u64 {
    1_000
}
fn default_result_ttl_secs() -> u64 {
    300
}
fn default_max_in_flight_calls() -> usize {
    32
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            wait_for_service_timeout_ms: default_wait_for_service_timeout_ms(),
            token_wait_ms: default_token_wait_ms(),
            result_ttl_secs: default_result_ttl_secs(),
            max_in_flight_calls: default_max_in_flight_calls(),
        }
    }
}

impl BridgeSettings {
    pub fn service_options(&self) -> ServiceOptions {
        ServiceOptions {
            wait_for_service_timeout: Duration::from_millis(self.wait_for_service_timeout_ms),
            token_wait: Duration::from_millis(self.token_wait_ms),
            result_ttl: Duration::from_secs(self.result_ttl_secs),
        }
    }
}

/// Return the path to `~/.rce/bridge.toml`.
pub fn settings_path() -> PathBuf {
    settings_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn settings_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".rce").join("bridge.toml")
}

/// Load settings from the default location, falling back to defaults (with
/// environment overrides) when no file exists.
pub fn load() -> Result<BridgeSettings, SettingsError> {
    match load_from(&settings_path())? {
        Some(settings) => Ok(settings),
        None => {
            let mut settings = BridgeSettings::default();
            apply_env_overrides(&mut settings);
            Ok(settings)
        }
    }
}

/// Load settings from `path`.  Returns `None` if the file does not exist.
pub fn load_from(path: &Path) -> Result<Option<BridgeSettings>, SettingsError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).map_err(|source| SettingsError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut settings: BridgeSettings = toml::from_str(&raw)?;
    apply_env_overrides(&mut settings);
    Ok(Some(settings))
}

/// Apply `RCE_*` environment variable overrides.  Unparseable values are
/// ignored.
///
/// | Variable | Field |
/// |---|---|
/// | `RCE_WAIT_FOR_SERVICE_TIMEOUT_MS` | `wait_for_service_timeout_ms` |
/// | `RCE_TOKEN_WAIT_MS` | `token_wait_ms` |
/// | `RCE_RESULT_TTL_SECS` | `result_ttl_secs` |
/// | `RCE_MAX_IN_FLIGHT_CALLS` | `max_in_flight_calls` |
pub fn apply_env_overrides(settings: &mut BridgeSettings) {
    if let Ok(v) = std::env::var("RCE_WAIT_FOR_SERVICE_TIMEOUT_MS")
        && let Ok(ms) = v.parse::<u64>()
    {
        settings.wait_for_service_timeout_ms = ms;
    }
    if let Ok(v) = std::env::var("RCE_TOKEN_WAIT_MS")
        && let Ok(ms) = v.parse::<u64>()
    {
        settings.token_wait_ms = ms;
    }
    if let Ok(v) = std::env::var("RCE_RESULT_TTL_SECS")
        && let Ok(secs) = v.parse::<u64>()
    {
        settings.result_ttl_secs = secs;
    }
    if let Ok(v) = std::env::var("RCE_MAX_IN_FLIGHT_CALLS")
        && let Ok(n) = v.parse::<usize>()
    {
        settings.max_in_flight_calls = n;
    }
}

/// Save settings to `path`, creating the parent directory if necessary.
pub fn save_to(settings: &BridgeSettings, path: &Path) -> Result<(), SettingsError> {
    let io_err = |source| SettingsError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_err)?;
    }
    let raw = toml::to_string_pretty(settings)?;
    fs::write(path, raw).map_err(io_err)
}
