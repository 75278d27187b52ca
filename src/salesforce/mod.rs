//! Salesforce Bulk API v2 upload layer.
//!
//! - [`IngestTarget`] names the job and carries the bearer token as a `SecretString`
//! - [`Transport`] is the network seam; [`ReqwestTransport`] streams payload files over HTTPS
//! - [`UploadClient`] drives the retry state machine on top of any transport
//!
//! Logging never includes CSV contents, tokens or hosts.

pub mod bulk_ingest_v2;
pub mod client;
pub mod retry;
pub mod transport;
pub mod upload;

/// API version used when the configuration does not name one.
pub const DEFAULT_API_VERSION: &str = "v60.0";

pub use bulk_ingest_v2::{ReqwestTransport, CSV_CONTENT_TYPE};
pub use client::{build_http_client, redact_id, IngestTarget};
pub use retry::{parse_retry_after, RetryPolicy, TRANSIENT_STATUSES};
pub use transport::{Transport, TransportError, TransportFuture, TransportResponse, UploadRequest};
pub use upload::{truncate_body, UploadClient, UploadReport, TRUNCATION_MARKER};
