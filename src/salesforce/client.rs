//! Ingest target descriptor and HTTP client construction.

use std::fmt;

use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use secrecy::{ExposeSecret, SecretString};
use url::Url;

use crate::config::UploadConfig;
use crate::error::AppError;

// ─────────────────────────────────────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────────────────────────────────────

/// User agent string for all Salesforce API requests.
const CLIENT_USER_AGENT: &str = concat!("bulk-export/", env!("CARGO_PKG_VERSION"));

// ─────────────────────────────────────────────────────────────────────────────
// IngestTarget
// ─────────────────────────────────────────────────────────────────────────────

/// Where one payload goes: an org instance, an open ingest job and the
/// bearer token that may write to it.
///
/// The token is wrapped in `SecretString` and never shown by `Debug`.
#[derive(Clone)]
pub struct IngestTarget {
    /// Instance URL (e.g., "https://na1.salesforce.com")
    pub instance_url: Url,
    /// Salesforce API version (e.g., "v60.0")
    pub api_version: String,
    /// Bulk API v2 ingest job ID (e.g., "750...")
    pub job_id: String,
    pub access_token: SecretString,
}

impl fmt::Debug for IngestTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IngestTarget")
            .field("instance_url", &self.instance_url.as_str())
            .field("api_version", &self.api_version)
            .field("job_id", &redact_id(&self.job_id))
            .field("access_token", &"[REDACTED]")
            .finish()
    }
}

impl IngestTarget {
    pub fn new(
        instance_url: Url,
        api_version: impl Into<String>,
        job_id: impl Into<String>,
        access_token: SecretString,
    ) -> Self {
        Self {
            instance_url,
            api_version: api_version.into(),
            job_id: job_id.into(),
            access_token,
        }
    }

    /// Builds the batches URL: /services/data/vXX.X/jobs/ingest/{job_id}/batches
    ///
    /// # Errors
    ///
    /// `AppError::Internal` if the job ID or version cannot form a valid path.
    pub fn batches_url(&self) -> Result<Url, AppError> {
        let path = format!(
            "/services/data/{}/jobs/ingest/{}/batches",
            self.api_version, self.job_id
        );
        self.instance_url
            .join(&path)
            .map_err(|e| AppError::Internal(format!("Failed to build batches URL: {}", e)))
    }

    pub(crate) fn bearer_token(&self) -> &str {
        self.access_token.expose_secret()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Logging helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Redacts a job ID for logging (shows first 8 chars).
pub fn redact_id(id: &str) -> String {
    match id.char_indices().nth(8) {
        Some((cut, _)) => format!("{}...", &id[..cut]),
        None => id.to_string(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// HTTP client
// ─────────────────────────────────────────────────────────────────────────────

/// Builds the shared HTTP client.
///
/// Only the connect timeout is set here; the per-attempt deadline is applied
/// to each request so a slow attempt fails on its own.
pub fn build_http_client(config: &UploadConfig) -> Result<reqwest::Client, AppError> {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(CLIENT_USER_AGENT));

    reqwest::Client::builder()
        .default_headers(headers)
        .connect_timeout(config.connect_timeout())
        .build()
        .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {}", e)))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
