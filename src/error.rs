use serde::Serialize;
use thiserror::Error;

/// Patterns (lowercase) that indicate sensitive data not safe for UI display.
/// Used by `contains_sensitive()` for case-insensitive matching.
pub(crate) const SENSITIVE_PATTERNS: &[&str] = &[
    "bearer ",
    "refresh_token",
    "access_token",
    "client_secret",
    "authorization:",
];

/// Returns true if the message contains any sensitive pattern (case-insensitive).
fn contains_sensitive(msg: &str) -> bool {
    let lower = msg.to_ascii_lowercase();
    SENSITIVE_PATTERNS.iter().any(|p| lower.contains(p))
}

/// Sanitizes a message for display.
/// If sensitive content is detected, returns the fallback instead.
fn sanitize_message(msg: &str, fallback: &str) -> String {
    if contains_sensitive(msg) {
        fallback.into()
    } else {
        msg.to_string()
    }
}

/// User-friendly error presentation.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorPresentation {
    pub title: String,
    pub message: String,
    pub action: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Structured error kinds
// ─────────────────────────────────────────────────────────────────────────────

/// Raised while building a column schema, before any row is written.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("unknown source field '{field}' requested by column '{header}'")]
    UnknownField { field: String, header: String },

    #[error("column {position} has an empty header")]
    EmptyHeader { position: usize },

    #[error("invalid mapping on line {line}: {reason}")]
    InvalidMapping { line: usize, reason: String },
}

/// Raised while streaming rows into a sink. Partial output is invalid.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SerializationError {
    #[error("sink write failed: {0}")]
    SinkWriteFailed(String),

    #[error("record source failed at row {row}: {reason}")]
    SourceFailed { row: u64, reason: String },
}

/// Terminal upload outcome after the retry policy gave up.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UploadError {
    #[error("upload failed after {attempts} attempts (last status: {})", fmt_status(.last_status))]
    ExhaustedRetries {
        attempts: u32,
        last_status: Option<u16>,
        body: String,
    },

    #[error("upload rejected with HTTP {status}")]
    NonRetryableStatus {
        status: u16,
        body: String,
        salesforce_error: Option<String>,
    },

    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("payload unreadable: {0}")]
    PayloadUnreadable(String),
}

fn fmt_status(status: &Option<u16>) -> String {
    match status {
        Some(code) => code.to_string(),
        None => "timeout".to_string(),
    }
}

/// Raised when a response body is not a structured document.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProjectionError {
    #[error("response body is not valid JSON (head: {head})")]
    InvalidBody { head: String },
}

// ─────────────────────────────────────────────────────────────────────────────
// AppError
// ─────────────────────────────────────────────────────────────────────────────

/// Crate-wide error type.
#[derive(Debug, Error)]
pub enum AppError {
    // ── Export ────────────────────────────────────────────────────────────────
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] SerializationError),

    // ── Upload ────────────────────────────────────────────────────────────────
    #[error("Upload error: {0}")]
    Upload(#[from] UploadError),

    // ── Response ──────────────────────────────────────────────────────────────
    #[error("Projection error: {0}")]
    Projection(#[from] ProjectionError),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),

    // ── Generic fallback ──────────────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Converts the error into a user-friendly presentation.
    /// Never leaks secrets, tokens, or sensitive URL parameters.
    pub fn to_presentation(&self) -> ErrorPresentation {
        match self {
            // ── Export ────────────────────────────────────────────────────────
            AppError::Schema(SchemaError::UnknownField { field, header }) => ErrorPresentation {
                title: "Unknown Field".into(),
                message: format!(
                    "Column '{}' refers to field '{}', which the record type does not have.",
                    header, field
                ),
                action: Some("Fix the field mapping and try again".into()),
            },

            AppError::Schema(err) => ErrorPresentation {
                title: "Invalid Column Definition".into(),
                message: err.to_string(),
                action: Some("Fix the column definition and try again".into()),
            },

            AppError::Serialization(SerializationError::SinkWriteFailed(_)) => ErrorPresentation {
                title: "Export Failed".into(),
                message: "The CSV file could not be written. The partial file was discarded."
                    .into(),
                action: Some("Check disk space and try again".into()),
            },

            AppError::Serialization(SerializationError::SourceFailed { row, .. }) => {
                ErrorPresentation {
                    title: "Export Failed".into(),
                    message: format!("Reading record {} from the data source failed.", row),
                    action: Some("Check the data source and try again".into()),
                }
            }

            // ── Upload ────────────────────────────────────────────────────────
            AppError::Upload(UploadError::ExhaustedRetries {
                attempts,
                last_status,
                ..
            }) => ErrorPresentation {
                title: "Upload Failed".into(),
                message: format!(
                    "Salesforce did not accept the upload after {} attempts (last status: {}).",
                    attempts,
                    fmt_status(last_status)
                ),
                action: Some("Wait a few minutes and retry".into()),
            },

            AppError::Upload(UploadError::NonRetryableStatus {
                status,
                salesforce_error,
                ..
            }) => {
                let detail = salesforce_error
                    .as_deref()
                    .map(|e| sanitize_message(e, "Salesforce rejected the request."))
                    .unwrap_or_else(|| "Salesforce rejected the request.".to_string());
                ErrorPresentation {
                    title: "Upload Rejected".into(),
                    message: format!("HTTP {}: {}", status, detail),
                    action: Some("Review the error and try again".into()),
                }
            }

            AppError::Upload(UploadError::ConnectionFailed(_)) => ErrorPresentation {
                title: "Connection Failed".into(),
                message: "Could not connect to Salesforce. Please check your internet connection."
                    .into(),
                action: Some("Check network and retry".into()),
            },

            AppError::Upload(UploadError::PayloadUnreadable(_)) => ErrorPresentation {
                title: "Payload Unavailable".into(),
                message: "The exported CSV file could not be read for upload.".into(),
                action: Some("Export the data again".into()),
            },

            // ── Response ──────────────────────────────────────────────────────
            AppError::Projection(ProjectionError::InvalidBody { head }) => ErrorPresentation {
                title: "Unexpected Response".into(),
                message: format!(
                    "Salesforce returned a response that is not JSON: {}",
                    sanitize_message(head, "(response hidden)")
                ),
                action: None,
            },

            AppError::Cancelled => ErrorPresentation {
                title: "Cancelled".into(),
                message: "The operation was cancelled.".into(),
                action: None,
            },

            AppError::Config(msg) => ErrorPresentation {
                title: "Invalid Configuration".into(),
                message: sanitize_message(msg, "The configuration is invalid."),
                action: Some("Fix the configuration and try again".into()),
            },

            // ── Generic ───────────────────────────────────────────────────────
            AppError::Internal(_) => ErrorPresentation {
                title: "Unexpected Error".into(),
                message: "Something went wrong. Please try again.".into(),
                action: Some("Try again".into()),
            },
        }
    }
}

impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.to_presentation().serialize(serializer)
    }
}
