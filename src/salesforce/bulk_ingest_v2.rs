//! Bulk API v2 batch upload over `reqwest`.
//!
//! One call sends one payload file to an open ingest job with a single PUT.
//! The file is streamed from disk on every call, so retries resend exactly
//! the bytes that were exported.
//!
//! # Security
//!
//! - Raw CSV contents are never logged
//! - Auth headers and tokens are never logged
//! - Only HTTP method, redacted path, byte counts and status codes are logged

use std::sync::Arc;
use std::time::Instant;

use reqwest::header::{ACCEPT, CONTENT_LENGTH, CONTENT_TYPE, RETRY_AFTER};
use reqwest::Client;
use tokio_util::io::ReaderStream;
use tracing::{info, warn};

use crate::config::UploadConfig;
use crate::error::AppError;
use crate::salesforce::client::{build_http_client, redact_id};
use crate::salesforce::transport::{
    Transport, TransportError, TransportFuture, TransportResponse, UploadRequest,
};

/// Content type Bulk API v2 expects for CSV job data.
pub const CSV_CONTENT_TYPE: &str = "text/csv; charset=UTF-8";

// ─────────────────────────────────────────────────────────────────────────────
// ReqwestTransport
// ─────────────────────────────────────────────────────────────────────────────

/// Production [`Transport`] backed by a shared `reqwest::Client`.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: Arc<Client>,
}

impl ReqwestTransport {
    pub fn new(client: Arc<Client>) -> Self {
        Self { client }
    }

    /// Builds a dedicated client with the configured connect timeout.
    pub fn from_config(config: &UploadConfig) -> Result<Self, AppError> {
        Ok(Self::new(Arc::new(build_http_client(config)?)))
    }

    async fn upload_batch(
        &self,
        request: &UploadRequest,
    ) -> Result<TransportResponse, TransportError> {
        let job = redact_id(&request.target.job_id);
        let url = request
            .target
            .batches_url()
            .map_err(|e| TransportError::Connection(e.to_string()))?;

        let file = tokio::fs::File::open(&request.payload)
            .await
            .map_err(|e| TransportError::Payload(format!("Failed to open payload: {}", e)))?;
        let file_size = file
            .metadata()
            .await
            .map_err(|e| TransportError::Payload(format!("Failed to read payload metadata: {}", e)))?
            .len();

        let body = reqwest::Body::wrap_stream(ReaderStream::new(file));

        info!(
            "[BULK-INGEST] PUT /jobs/ingest/{}/batches ({} bytes)",
            job, file_size
        );
        let start = Instant::now();

        let response = self
            .client
            .put(url)
            .bearer_auth(request.target.bearer_token())
            .header(CONTENT_TYPE, CSV_CONTENT_TYPE)
            .header(ACCEPT, "application/json")
            .header(CONTENT_LENGTH, file_size)
            .timeout(request.timeout)
            .body(body)
            .send()
            .await
            .map_err(|e| map_send_error(&job, start, e))?;

        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let body = response
            .text()
            .await
            .map_err(|e| map_send_error(&job, start, e))?;

        info!(
            "[BULK-INGEST] PUT /jobs/ingest/{}/batches -> {} {}ms",
            job,
            status,
            start.elapsed().as_millis()
        );

        Ok(TransportResponse {
            status,
            retry_after,
            body,
        })
    }
}

impl Transport for ReqwestTransport {
    fn put_payload<'a>(&'a self, request: &'a UploadRequest) -> TransportFuture<'a> {
        Box::pin(self.upload_batch(request))
    }
}

/// Maps a reqwest failure without exposing its URL.
fn map_send_error(job: &str, start: Instant, error: reqwest::Error) -> TransportError {
    let elapsed = start.elapsed().as_millis();

    if error.is_timeout() {
        warn!(
            "[BULK-INGEST] PUT /jobs/ingest/{}/batches TIMEOUT {}ms",
            job, elapsed
        );
        return TransportError::Timeout;
    }

    warn!(
        "[BULK-INGEST] PUT /jobs/ingest/{}/batches FAILED {}ms",
        job, elapsed
    );
    TransportError::Connection(format!("CSV upload failed: {}", error.without_url()))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
