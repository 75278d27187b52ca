//! Layered configuration: built-in defaults, an optional TOML file, then
//! `BULK_EXPORT_*` environment variables (`__` separates nested keys, e.g.
//! `BULK_EXPORT_UPLOAD__MAX_ATTEMPTS=3`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::streaming::{CsvOptions, LineEnding};

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "BULK_EXPORT_";

/// Complete crate configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub export: ExportConfig,
    pub upload: UploadConfig,
    pub projector: ProjectorConfig,
}

impl Config {
    /// Loads defaults, then `path` (if given), then the environment.
    ///
    /// # Errors
    ///
    /// `AppError::Config` if the file is missing, a value has the wrong type,
    /// or the result fails [`validate`](Self::validate).
    pub fn load(path: Option<&Path>) -> Result<Self, AppError> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));

        if let Some(path) = path {
            if !path.is_file() {
                return Err(AppError::Config(format!(
                    "Config file not found: {}",
                    path.display()
                )));
            }
            figment = figment.merge(Toml::file(path));
        }

        let config: Config = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(|e| AppError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Rejects values no upload could succeed with.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.upload.max_attempts == 0 {
            return Err(AppError::Config(
                "upload.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.upload.api_version.trim().is_empty() {
            return Err(AppError::Config(
                "upload.api_version must not be empty".to_string(),
            ));
        }
        if self.upload.attempt_timeout_secs == 0 {
            return Err(AppError::Config(
                "upload.attempt_timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.upload.base_delay_ms > self.upload.max_delay_ms {
            return Err(AppError::Config(
                "upload.base_delay_ms must not exceed upload.max_delay_ms".to_string(),
            ));
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Export
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportConfig {
    #[serde(default)]
    pub line_terminator: LineEnding,

    #[serde(default)]
    pub byte_order_marker: bool,

    /// Directory for payload files. Defaults to the system temp directory.
    #[serde(default)]
    pub work_dir: Option<PathBuf>,

    /// Keep the payload file after a successful upload.
    #[serde(default)]
    pub keep_payload: bool,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            line_terminator: LineEnding::LF,
            byte_order_marker: false,
            work_dir: None,
            keep_payload: false,
        }
    }
}

impl ExportConfig {
    pub fn csv_options(&self) -> CsvOptions {
        CsvOptions {
            line_ending: self.line_terminator,
            byte_order_marker: self.byte_order_marker,
        }
    }

    pub fn work_dir(&self) -> PathBuf {
        self.work_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Upload
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadConfig {
    #[serde(default = "default_api_version")]
    pub api_version: String,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Deadline for a single attempt, body transfer included.
    #[serde(default = "default_attempt_timeout_secs")]
    pub attempt_timeout_secs: u64,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Upper bound (exclusive) of the random jitter; 0 disables it.
    #[serde(default = "default_max_jitter_ms")]
    pub max_jitter_ms: u64,

    /// Characters of a response body kept in error diagnostics. A cut body
    /// also carries a `...(truncated)` suffix on top of this limit.
    #[serde(default = "default_error_body_limit")]
    pub error_body_limit: usize,
}

fn default_api_version() -> String {
    crate::salesforce::DEFAULT_API_VERSION.to_string()
}

fn default_max_attempts() -> u32 {
    5
}

fn default_attempt_timeout_secs() -> u64 {
    120
}

fn default_connect_timeout_secs() -> u64 {
    20
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_max_jitter_ms() -> u64 {
    350
}

fn default_error_body_limit() -> usize {
    2_000
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            api_version: default_api_version(),
            max_attempts: default_max_attempts(),
            attempt_timeout_secs: default_attempt_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_jitter_ms: default_max_jitter_ms(),
            error_body_limit: default_error_body_limit(),
        }
    }
}

impl UploadConfig {
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Projector
// ─────────────────────────────────────────────────────────────────────────────

/// Immutable parser settings handed to each `ResponseProjector`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectorConfig {
    /// Characters of an unparseable body kept in `InvalidBody`.
    #[serde(default = "default_head_limit")]
    pub head_limit: usize,

    #[serde(default = "default_separator")]
    pub separator: char,
}

fn default_head_limit() -> usize {
    200
}

fn default_separator() -> char {
    '.'
}

impl Default for ProjectorConfig {
    fn default() -> Self {
        Self {
            head_limit: default_head_limit(),
            separator: default_separator(),
        }
    }
}
