use crate::fetch::DurationMode;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, info};

pub const DEFAULT_USER_AGENT: &str = concat!("bookspine/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("Invalid value '{value}' for {key}")]
    InvalidValue { key: String, value: String },
}

/// Application configuration
/// Loaded from an optional .env file, then environment variables
#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    /// Directory archives are written to
    pub output_dir: PathBuf,
    /// How part durations are measured
    pub duration_mode: DurationMode,
    pub user_agent: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            duration_mode: DurationMode::Metadata,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        if dotenvy::dotenv().is_ok() {
            info!("Config: loaded .env file");
        } else {
            debug!("Config: no .env file found, using environment only");
        }

        Self::from_env()
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup, unset keys take their defaults
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let output_dir = lookup("BOOKSPINE_OUTPUT_DIR")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(default_output_dir);

        let decode = match lookup("BOOKSPINE_DECODE_AUDIO") {
            Some(value) => parse_bool("BOOKSPINE_DECODE_AUDIO", &value)?,
            None => false,
        };
        let duration_mode = if decode {
            DurationMode::Decode
        } else {
            DurationMode::Metadata
        };

        let user_agent = lookup("BOOKSPINE_USER_AGENT")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string());

        debug!(
            "Config: output {}, duration mode {:?}",
            output_dir.display(),
            duration_mode
        );

        Ok(Self {
            output_dir,
            duration_mode,
            user_agent,
        })
    }
}

/// The user's download directory, or the working directory without one
fn default_output_dir() -> PathBuf {
    dirs::download_dir().unwrap_or_else(|| PathBuf::from("."))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" | "" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}
