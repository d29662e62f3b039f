use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::error::{BridgeError, ErrorCode, Result};
use crate::package::ProtectedPackages;
use crate::progress::ProgressPolicy;
use crate::refresh::DEFAULT_REFRESH_TIMEOUT;

/// System-wide configuration file, used when present and nothing else is named.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/apt-bridge/config.yaml";

/// Environment variable naming a configuration file.
pub const CONFIG_ENV: &str = "APT_BRIDGE_CONFIG";
pub const APT_GET_ENV: &str = "APT_BRIDGE_APT_GET";
pub const UPDATE_TIMEOUT_ENV: &str = "APT_BRIDGE_UPDATE_TIMEOUT";

/// Bridge configuration, read once at startup.
///
/// ```yaml
/// apt_get: /usr/bin/apt-get
/// update_timeout_secs: 300
/// upgrade_progress: raw
/// protected_packages: [openssh-server]
/// log_file: /var/log/apt-bridge
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeConfig {
    /// Program run for every operation.
    pub apt_get: PathBuf,

    /// Deadline for `apt-get update`, in seconds.
    pub update_timeout_secs: u64,

    /// Progress policy for `upgrade`. Percentages restart for every package,
    /// so the default reports them unfiltered.
    pub upgrade_progress: ProgressPolicy,

    /// Names refused by `remove`, in addition to the essential packages.
    pub protected_packages: Vec<String>,

    /// Directory for daily-rotated log files. Logging is off when unset.
    pub log_file: Option<PathBuf>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            apt_get: PathBuf::from("apt-get"),
            update_timeout_secs: DEFAULT_REFRESH_TIMEOUT.as_secs(),
            upgrade_progress: ProgressPolicy::Raw,
            protected_packages: Vec::new(),
            log_file: None,
        }
    }
}

impl BridgeConfig {
    pub fn from_yaml(text: &str) -> Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = yaml_serde::from_str(text)
            .map_err(|e| config_error("Invalid configuration", e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            config_error(
                format!("Failed to read configuration file '{}'", path.display()),
                e.to_string(),
            )
        })?;
        Self::from_yaml(&text).map_err(|mut err| {
            err.message = format!("{} in '{}'", err.message, path.display());
            err
        })
    }

    /// Resolve the configuration for this run.
    ///
    /// Order: `explicit` (the `--config` flag), then the file named by
    /// [`CONFIG_ENV`], then [`DEFAULT_CONFIG_PATH`] if it exists, then
    /// built-in defaults. Environment overrides are applied on top. `env`
    /// looks up environment variables.
    pub fn discover(explicit: Option<&Path>, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let named = explicit
            .map(Path::to_path_buf)
            .or_else(|| env(CONFIG_ENV).filter(|v| !v.is_empty()).map(PathBuf::from));

        let mut config = match named {
            Some(path) => {
                debug!(path = %path.display(), "loading configuration");
                Self::load(&path)?
            }
            None if Path::new(DEFAULT_CONFIG_PATH).is_file() => {
                debug!(path = DEFAULT_CONFIG_PATH, "loading system configuration");
                Self::load(Path::new(DEFAULT_CONFIG_PATH))?
            }
            None => Self::default(),
        };
        config.apply_env(env)?;
        Ok(config)
    }

    /// Apply [`APT_GET_ENV`] and [`UPDATE_TIMEOUT_ENV`].
    pub fn apply_env(&mut self, env: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(program) = env(APT_GET_ENV).filter(|v| !v.is_empty()) {
            self.apt_get = PathBuf::from(program);
        }
        if let Some(value) = env(UPDATE_TIMEOUT_ENV).filter(|v| !v.is_empty()) {
            self.update_timeout_secs = value.trim().parse().map_err(|_| {
                config_error(
                    format!("Invalid {UPDATE_TIMEOUT_ENV}"),
                    format!("expected a number of seconds, got '{value}'"),
                )
            })?;
        }
        self.validate()
    }

    fn validate(&self) -> Result<()> {
        if self.update_timeout_secs == 0 {
            return Err(config_error(
                "Invalid configuration",
                "update_timeout_secs must be greater than zero",
            ));
        }
        if self.apt_get.as_os_str().is_empty() {
            return Err(config_error("Invalid configuration", "apt_get must not be empty"));
        }
        Ok(())
    }

    pub fn update_timeout(&self) -> Duration {
        Duration::from_secs(self.update_timeout_secs)
    }

    pub fn protected(&self) -> ProtectedPackages {
        ProtectedPackages::with_extra(self.protected_packages.iter().cloned())
    }
}

fn config_error(message: impl Into<String>, details: impl Into<String>) -> BridgeError {
    BridgeError::new(ErrorCode::ConfigError, message).with_details(details)
}
