//! Runtime configuration.
//!
//! Every knob has a default, so an empty or partial file is valid. Values
//! live under a `[cordma]` table:
//!
//! ```toml
//! [cordma.executor]
//! workers = 8
//!
//! [cordma.poller]
//! batch_size = 32
//! idle_spin_us = 100
//!
//! [cordma.cq]
//! depth = 256
//!
//! [cordma.handshake]
//! max_user_data = 4096
//! ```

use std::io;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Configuration loading error type.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("cannot read configuration file")]
    Io(#[from] io::Error),

    /// The file is not valid TOML or has ill-typed values.
    #[error("malformed configuration")]
    Parse(#[from] toml::de::Error),

    /// A value is out of its valid range.
    #[error("invalid value for `{0}`: {1}")]
    Invalid(&'static str, String),
}

/// Completion executor settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExecutorConfig {
    /// Number of worker threads invoking completion callbacks.
    pub workers: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self { workers: 4 }
    }
}

/// Completion poller settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PollerConfig {
    /// Maximum number of completions taken per poll.
    pub batch_size: usize,

    /// How long the poller spins on an empty queue before it starts
    /// yielding its time slice between polls, in microseconds.
    pub idle_spin_us: u64,
}

impl PollerConfig {
    #[inline]
    pub fn idle_spin(&self) -> Duration {
        Duration::from_micros(self.idle_spin_us)
    }
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            batch_size: 16,
            idle_spin_us: 50,
        }
    }
}

/// Completion queue settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CqConfig {
    pub depth: u32,
}

impl Default for CqConfig {
    fn default() -> Self {
        Self {
            depth: crate::Cq::DEFAULT_CQ_DEPTH,
        }
    }
}

/// Connection setup settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HandshakeConfig {
    /// Largest user data accepted from a peer, in bytes.
    pub max_user_data: usize,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            max_user_data: 64 * 1024,
        }
    }
}

/// Complete configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub executor: ExecutorConfig,
    pub poller: PollerConfig,
    pub cq: CqConfig,
    pub handshake: HandshakeConfig,
}

#[derive(Deserialize)]
struct ConfigFile {
    #[serde(default)]
    cordma: Config,
}

impl Config {
    /// Load from a TOML file. Missing values take their defaults.
    pub fn load_toml(config_file: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let toml_str = std::fs::read_to_string(config_file)?;
        Self::from_toml_str(&toml_str)
    }

    /// Parse from TOML text. Missing values take their defaults.
    pub fn from_toml_str(toml_str: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = toml::from_str(toml_str)?;
        file.cordma.validate()?;
        Ok(file.cordma)
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.executor.workers == 0 {
            return Err(ConfigError::Invalid(
                "executor.workers",
                "at least one worker is required".to_string(),
            ));
        }
        if self.poller.batch_size == 0 {
            return Err(ConfigError::Invalid(
                "poller.batch_size",
                "must be positive".to_string(),
            ));
        }
        if self.cq.depth == 0 {
            return Err(ConfigError::Invalid("cq.depth", "must be positive".to_string()));
        }
        Ok(())
    }
}
