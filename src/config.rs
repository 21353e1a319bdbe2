//! Runtime settings loaded with Figment.
//!
//! Settings are layered:
//! 1. built-in defaults
//! 2. `config/ups_qproto.toml` (or the file given on the command line)
//! 3. environment variables prefixed with `UPS_QPROTO_`, using `__` between
//!    sections, e.g. `UPS_QPROTO_EXCHANGE__TIMEOUT_MS=500`
//!
//! # Example
//! ```no_run
//! use ups_qproto::config::Settings;
//!
//! let settings = Settings::load()?;
//! println!("timeout: {:?}", settings.exchange_timeout());
//! # Ok::<(), ups_qproto::error::UpsError>(())
//! ```

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{UpsError, UpsResult};
use crate::logging::OutputFormat;

/// Default settings file location.
pub const DEFAULT_CONFIG_PATH: &str = "config/ups_qproto.toml";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "UPS_QPROTO_";

/// Top-level settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Device exchange settings
    #[serde(default)]
    pub exchange: ExchangeSettings,
    /// Logging settings
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Settings for a single query/reply exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeSettings {
    /// Time allowed for a complete reply, in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for ExchangeSettings {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_level")]
    pub level: String,
    /// Output format
    #[serde(default)]
    pub format: OutputFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: OutputFormat::default(),
        }
    }
}

fn default_timeout_ms() -> u64 {
    3000
}

fn default_level() -> String {
    "info".to_string()
}

impl Settings {
    /// Loads settings from the default file and the environment.
    pub fn load() -> UpsResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Loads settings from `path` and the environment, then validates them.
    ///
    /// A missing file is not an error; defaults apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> UpsResult<Self> {
        let settings: Settings = Self::figment(path.as_ref()).extract()?;
        settings.validate()?;
        Ok(settings)
    }

    /// The provider stack, exposed for callers merging their own layers.
    pub fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Checks value ranges after loading.
    pub fn validate(&self) -> UpsResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(UpsError::Configuration(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.logging.level,
                valid_levels.join(", ")
            )));
        }

        if self.exchange.timeout_ms == 0 {
            return Err(UpsError::Configuration(
                "exchange.timeout_ms must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    /// Exchange timeout as a `Duration`.
    pub fn exchange_timeout(&self) -> Duration {
        Duration::from_millis(self.exchange.timeout_ms)
    }
}
