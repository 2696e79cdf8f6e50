//! Environment configuration
//!
//! # Environment Variables
//!
//! - `ASGIPACK_DOCKER_HOST`: engine endpoint (`unix://`, `tcp://` or `http://`).
//!   Unset means the client's local defaults, which honor `DOCKER_HOST`.
//! - `ASGIPACK_BUILD_TIMEOUT`: whole-pipeline timeout in seconds - default: "900"
//! - `ASGIPACK_IMAGE_TAG`: tag for the runtime image - default: `<project>:<version>`
//! - `ASGIPACK_LOG_LEVEL`: logging level - default: "info"
//! - `ASGIPACK_NO_CACHE`: disable the engine layer cache (true|false) - default: "false"
//! - `ASGIPACK_PULL`: always pull base images (true|false) - default: "false"

use crate::pipeline::PipelineConfig;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_BUILD_TIMEOUT_SECS: u64 = 900;
const MAX_BUILD_TIMEOUT_SECS: u64 = 7200;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    #[error("Failed to parse {field}: {error}")]
    ParseError { field: String, error: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct AsgipackConfig {
    pub docker_host: Option<String>,

    pub build_timeout_secs: u64,

    /// Overrides the tag derived from project metadata
    pub image_tag: Option<String>,

    pub log_level: String,

    pub no_cache: bool,

    pub pull: bool,
}

impl Default for AsgipackConfig {
    fn default() -> Self {
        Self {
            docker_host: None,
            build_timeout_secs: DEFAULT_BUILD_TIMEOUT_SECS,
            image_tag: None,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            no_cache: false,
            pull: false,
        }
    }
}

impl AsgipackConfig {
    /// Loads `ASGIPACK_*` variables over the defaults
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let build_timeout_secs = match env::var("ASGIPACK_BUILD_TIMEOUT") {
            Ok(v) => v.trim().parse::<u64>().map_err(|e| ConfigError::ParseError {
                field: "ASGIPACK_BUILD_TIMEOUT".to_string(),
                error: e.to_string(),
            })?,
            Err(_) => defaults.build_timeout_secs,
        };

        let config = Self {
            docker_host: non_empty("ASGIPACK_DOCKER_HOST"),
            build_timeout_secs,
            image_tag: non_empty("ASGIPACK_IMAGE_TAG"),
            log_level: env::var("ASGIPACK_LOG_LEVEL")
                .map(|v| v.to_lowercase())
                .unwrap_or(defaults.log_level),
            no_cache: parse_bool("ASGIPACK_NO_CACHE")?.unwrap_or(defaults.no_cache),
            pull: parse_bool("ASGIPACK_PULL")?.unwrap_or(defaults.pull),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.build_timeout_secs == 0 {
            return Err(ConfigError::ValidationFailed(
                "Build timeout must be at least 1 second".to_string(),
            ));
        }
        if self.build_timeout_secs > MAX_BUILD_TIMEOUT_SECS {
            return Err(ConfigError::ValidationFailed(
                "Build timeout cannot exceed 2 hours".to_string(),
            ));
        }

        match self.log_level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(ConfigError::ValidationFailed(format!(
                    "Invalid log level: {}. Valid options: trace, debug, info, warn, error",
                    self.log_level
                )))
            }
        }

        if let Some(host) = &self.docker_host {
            if !["unix://", "tcp://", "http://", "npipe://"]
                .iter()
                .any(|scheme| host.starts_with(scheme))
            {
                return Err(ConfigError::ValidationFailed(format!(
                    "Unsupported docker host: {}",
                    host
                )));
            }
        }

        Ok(())
    }

    pub fn build_timeout(&self) -> Duration {
        Duration::from_secs(self.build_timeout_secs)
    }

    /// Per-run pipeline settings seeded from the environment
    pub fn pipeline_config(&self) -> PipelineConfig {
        let mut config = PipelineConfig::new()
            .with_timeout(self.build_timeout())
            .with_no_cache(self.no_cache)
            .with_pull(self.pull);
        if let Some(tag) = &self.image_tag {
            config = config.with_tag(tag.clone());
        }
        config
    }

    pub fn to_display_map(&self) -> HashMap<String, String> {
        let mut map = HashMap::new();
        map.insert(
            "docker_host".to_string(),
            self.docker_host
                .clone()
                .unwrap_or_else(|| "local defaults".to_string()),
        );
        map.insert(
            "build_timeout_secs".to_string(),
            self.build_timeout_secs.to_string(),
        );
        if let Some(tag) = &self.image_tag {
            map.insert("image_tag".to_string(), tag.clone());
        }
        map.insert("log_level".to_string(), self.log_level.clone());
        map.insert("no_cache".to_string(), self.no_cache.to_string());
        map.insert("pull".to_string(), self.pull.to_string());
        map
    }
}

impl fmt::Display for AsgipackConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Asgipack Configuration:")?;
        writeln!(
            f,
            "  Docker Host: {}",
            self.docker_host.as_deref().unwrap_or("local defaults")
        )?;
        writeln!(f, "  Build Timeout: {}s", self.build_timeout_secs)?;
        if let Some(tag) = &self.image_tag {
            writeln!(f, "  Image Tag: {}", tag)?;
        }
        writeln!(f, "  No Cache: {}", self.no_cache)?;
        writeln!(f, "  Pull: {}", self.pull)?;
        writeln!(f, "  Log Level: {}", self.log_level)?;
        Ok(())
    }
}

fn non_empty(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_bool(key: &str) -> Result<Option<bool>, ConfigError> {
    match env::var(key) {
        Ok(v) => match v.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" => Ok(Some(true)),
            "0" | "false" | "no" | "" => Ok(Some(false)),
            other => Err(ConfigError::ParseError {
                field: key.to_string(),
                error: format!("expected a boolean, got '{}'", other),
            }),
        },
        Err(_) => Ok(None),
    }
}
