// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Runtime configuration.
//!
//! Load order: compiled defaults, then the JSON file named by
//! `CADENCE_CONFIG`, then `CADENCE_CLOCK`. Each layer overrides the previous.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::buffer::BufferPolicy;

pub const CONFIG_PATH_VAR: &str = "CADENCE_CONFIG";
pub const CLOCK_VAR: &str = "CADENCE_CLOCK";

/// Which clock drives `delay` and the timer heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClockMode {
    /// Wall-clock time.
    #[default]
    Real,
    /// Logical time that jumps to the next deadline whenever nothing is ready.
    Virtual,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub clock: ClockMode,
    /// Buffer used by channels created without an explicit one.
    pub default_buffer: BufferPolicy,
    /// How long an idle executor with live remote handles sleeps between checks.
    pub stall_timeout_ms: u64,
    /// Log a warning when a process yields a plain value instead of an effect.
    pub warn_on_plain_yield: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            clock: ClockMode::Real,
            default_buffer: BufferPolicy::default(),
            stall_timeout_ms: 50,
            warn_on_plain_yield: true,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid runtime config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid value for {var}: {value}")]
    InvalidEnvVar { var: &'static str, value: String },
}

impl RuntimeConfig {
    /// Virtual clock, everything else default.
    pub fn virtual_clock() -> Self {
        Self {
            clock: ClockMode::Virtual,
            ..Self::default()
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    /// Defaults, overridden by `CADENCE_CONFIG` and `CADENCE_CLOCK` when set.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = match std::env::var_os(CONFIG_PATH_VAR) {
            Some(path) => {
                tracing::debug!(path = ?path, "loading runtime config");
                Self::from_file(path)?
            }
            None => Self::default(),
        };
        if let Ok(value) = std::env::var(CLOCK_VAR) {
            config.clock = parse_clock(&value).ok_or(ConfigError::InvalidEnvVar {
                var: CLOCK_VAR,
                value,
            })?;
        }
        Ok(config)
    }
}

fn parse_clock(value: &str) -> Option<ClockMode> {
    match value.trim().to_ascii_lowercase().as_str() {
        "real" => Some(ClockMode::Real),
        "virtual" => Some(ClockMode::Virtual),
        _ => None,
    }
}
