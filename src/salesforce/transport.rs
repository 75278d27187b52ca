//! The seam between the retry state machine and the network.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::time::Duration;

use crate::salesforce::client::IngestTarget;

/// Boxed future returned by [`Transport`] methods.
pub type TransportFuture<'a> =
    Pin<Box<dyn Future<Output = Result<TransportResponse, TransportError>> + Send + 'a>>;

/// One attempt's worth of request data. The payload is re-read from `payload`
/// on every attempt.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub target: IngestTarget,
    pub payload: PathBuf,
    pub timeout: Duration,
}

/// Status, retry hint and body text of a completed exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    /// Raw `Retry-After` header value, if any.
    pub retry_after: Option<String>,
    pub body: String,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Failures that produced no HTTP status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// No response within the per-attempt deadline.
    Timeout,
    /// DNS, TLS, refused or reset connections.
    Connection(String),
    /// The payload file could not be opened or read.
    Payload(String),
}

/// Sends one full-body replace request per call.
pub trait Transport: Send + Sync {
    fn put_payload<'a>(&'a self, request: &'a UploadRequest) -> TransportFuture<'a>;
}

impl<T: Transport + ?Sized> Transport for std::sync::Arc<T> {
    fn put_payload<'a>(&'a self, request: &'a UploadRequest) -> TransportFuture<'a> {
        (**self).put_payload(request)
    }
}
