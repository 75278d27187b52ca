//! Retrying delivery of one payload file to a Bulk API v2 ingest job.
//!
//! Each upload walks an explicit state machine:
//!
//! ```text
//! Ready -> Sending -> Succeeded
//!                  -> RetryScheduled -> Sending
//!                  -> Failed
//! ```
//!
//! Only transient statuses and attempt timeouts lead to `RetryScheduled`.
//! Every other outcome is terminal on the attempt that produced it.

use std::path::Path;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::UploadConfig;
use crate::error::{AppError, UploadError};
use crate::response::ResponseProjector;
use crate::salesforce::client::{redact_id, IngestTarget};
use crate::salesforce::retry::{parse_retry_after, RetryPolicy};
use crate::salesforce::transport::{Transport, TransportError, TransportResponse, UploadRequest};

/// Appended to diagnostic bodies cut at the configured limit.
pub const TRUNCATION_MARKER: &str = "...(truncated)";

/// What a successful upload looked like.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReport {
    pub status: u16,
    pub body: String,
    /// Attempts made, the successful one included.
    pub attempts: u32,
    /// Delay slept before each retry, in order.
    pub delays: Vec<Duration>,
}

// ─────────────────────────────────────────────────────────────────────────────
// State machine
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug)]
enum UploadState {
    Ready,
    Sending {
        attempt: u32,
    },
    RetryScheduled {
        next_attempt: u32,
        delay: Duration,
    },
    Succeeded {
        attempt: u32,
        response: TransportResponse,
    },
    Failed(UploadError),
}

// ─────────────────────────────────────────────────────────────────────────────
// UploadClient
// ─────────────────────────────────────────────────────────────────────────────

/// Uploads payload files through a [`Transport`], retrying transient failures.
///
/// The client keeps no per-upload state, so one instance can drive many
/// concurrent uploads; each call has its own attempt counter.
pub struct UploadClient<T> {
    transport: T,
    policy: RetryPolicy,
    attempt_timeout: Duration,
    error_body_limit: usize,
    projector: ResponseProjector,
}

impl<T: Transport> UploadClient<T> {
    pub fn new(transport: T, policy: RetryPolicy) -> Self {
        let defaults = UploadConfig::default();
        Self {
            transport,
            policy,
            attempt_timeout: defaults.attempt_timeout(),
            error_body_limit: defaults.error_body_limit,
            projector: ResponseProjector::default(),
        }
    }

    pub fn from_config(transport: T, config: &UploadConfig) -> Self {
        Self::new(transport, RetryPolicy::from(config))
            .with_attempt_timeout(config.attempt_timeout())
            .with_error_body_limit(config.error_body_limit)
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    /// Characters of a response body kept in error diagnostics, not counting
    /// the truncation marker.
    pub fn with_error_body_limit(mut self, limit: usize) -> Self {
        self.error_body_limit = limit;
        self
    }

    pub fn with_projector(mut self, projector: ResponseProjector) -> Self {
        self.projector = projector;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Sends `payload` to `target` until it succeeds, fails for good, or the
    /// attempt budget runs out.
    ///
    /// Cancellation aborts the in-flight request or the pending delay and
    /// schedules nothing further.
    ///
    /// # Errors
    ///
    /// - `UploadError::ExhaustedRetries` after the last transient failure
    /// - `UploadError::NonRetryableStatus` on the first non-transient error status
    /// - `UploadError::ConnectionFailed` on non-timeout transport failures
    /// - `UploadError::PayloadUnreadable` if the payload cannot be read
    /// - `AppError::Cancelled` if `cancel` fired
    pub async fn upload(
        &self,
        target: &IngestTarget,
        payload: &Path,
        cancel: &CancellationToken,
    ) -> Result<UploadReport, AppError> {
        let request = UploadRequest {
            target: target.clone(),
            payload: payload.to_path_buf(),
            timeout: self.attempt_timeout,
        };
        let job = redact_id(&target.job_id);
        let mut delays = Vec::new();
        let mut state = UploadState::Ready;

        loop {
            state = match state {
                UploadState::Ready => {
                    if cancel.is_cancelled() {
                        return Err(AppError::Cancelled);
                    }
                    self.check_ready(&request).await?;
                    UploadState::Sending { attempt: 1 }
                }

                UploadState::Sending { attempt } => {
                    debug!(
                        "[BULK-INGEST] Job {} attempt {}/{}",
                        job,
                        attempt,
                        self.max_attempts()
                    );
                    let outcome = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            info!("[BULK-INGEST] Job {} upload cancelled during attempt {}", job, attempt);
                            return Err(AppError::Cancelled);
                        }
                        outcome = self.transport.put_payload(&request) => outcome,
                    };
                    self.next_state(&job, attempt, outcome)
                }

                UploadState::RetryScheduled {
                    next_attempt,
                    delay,
                } => {
                    delays.push(delay);
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            info!("[BULK-INGEST] Job {} upload cancelled while waiting to retry", job);
                            return Err(AppError::Cancelled);
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                    UploadState::Sending {
                        attempt: next_attempt,
                    }
                }

                UploadState::Succeeded { attempt, response } => {
                    info!(
                        "[BULK-INGEST] Job {} upload accepted with {} after {} attempt(s)",
                        job, response.status, attempt
                    );
                    return Ok(UploadReport {
                        status: response.status,
                        body: response.body,
                        attempts: attempt,
                        delays,
                    });
                }

                UploadState::Failed(error) => {
                    warn!("[BULK-INGEST] Job {} upload failed: {}", job, error);
                    return Err(error.into());
                }
            };
        }
    }

    fn max_attempts(&self) -> u32 {
        self.policy.max_attempts.max(1)
    }

    /// Everything that can be known to be wrong before the first request.
    async fn check_ready(&self, request: &UploadRequest) -> Result<(), AppError> {
        request.target.batches_url()?;

        let metadata = tokio::fs::metadata(&request.payload).await.map_err(|e| {
            UploadError::PayloadUnreadable(format!(
                "{}: {}",
                request.payload.display(),
                e
            ))
        })?;
        if !metadata.is_file() {
            return Err(UploadError::PayloadUnreadable(format!(
                "{} is not a file",
                request.payload.display()
            ))
            .into());
        }
        Ok(())
    }

    /// Classifies one attempt's outcome.
    fn next_state(
        &self,
        job: &str,
        attempt: u32,
        outcome: Result<TransportResponse, TransportError>,
    ) -> UploadState {
        match outcome {
            Ok(response) if response.is_success() => UploadState::Succeeded { attempt, response },

            Ok(response) if RetryPolicy::is_transient(response.status) => {
                let hint = response.retry_after.as_deref().and_then(parse_retry_after);
                self.transient_failure(
                    job,
                    attempt,
                    Some(response.status),
                    hint,
                    &response.body,
                )
            }

            Ok(response) => UploadState::Failed(UploadError::NonRetryableStatus {
                status: response.status,
                salesforce_error: self.decode_salesforce_error(&response.body),
                body: truncate_body(&response.body, self.error_body_limit),
            }),

            Err(TransportError::Timeout) => self.transient_failure(job, attempt, None, None, ""),

            Err(TransportError::Connection(reason)) => {
                UploadState::Failed(UploadError::ConnectionFailed(reason))
            }

            Err(TransportError::Payload(reason)) => {
                UploadState::Failed(UploadError::PayloadUnreadable(reason))
            }
        }
    }

    fn transient_failure(
        &self,
        job: &str,
        attempt: u32,
        status: Option<u16>,
        retry_after_secs: Option<u64>,
        body: &str,
    ) -> UploadState {
        let outcome = status.map_or_else(|| "timeout".to_string(), |s| s.to_string());

        if attempt >= self.max_attempts() {
            return UploadState::Failed(UploadError::ExhaustedRetries {
                attempts: attempt,
                last_status: status,
                body: truncate_body(body, self.error_body_limit),
            });
        }

        let delay = self.policy.delay_for(attempt, retry_after_secs);
        warn!(
            "[BULK-INGEST] Job {} attempt {}/{} got {}; retrying in {}ms{}",
            job,
            attempt,
            self.max_attempts(),
            outcome,
            delay.as_millis(),
            if retry_after_secs.is_some() {
                " (Retry-After)"
            } else {
                ""
            }
        );

        UploadState::RetryScheduled {
            next_attempt: attempt + 1,
            delay,
        }
    }

    /// Reads `[{"errorCode": .., "message": ..}]` into `"[CODE] message"`.
    fn decode_salesforce_error(&self, body: &str) -> Option<String> {
        let fields = self
            .projector
            .project(body, &["0.errorCode", "0.message"])
            .ok()?;

        match (fields.get("0.errorCode"), fields.get("0.message")) {
            (Some(code), Some(message)) => Some(format!("[{}] {}", code, message)),
            (Some(code), None) => Some(format!("[{}]", code)),
            (None, Some(message)) => Some(message.to_string()),
            (None, None) => None,
        }
    }
}

/// Keeps the first `limit` characters of `body` and appends
/// [`TRUNCATION_MARKER`] when anything was cut, so the result is at most
/// `limit + TRUNCATION_MARKER.len()` characters.
pub fn truncate_body(body: &str, limit: usize) -> String {
    match body.char_indices().nth(limit) {
        Some((cut, _)) => format!("{}{}", &body[..cut], TRUNCATION_MARKER),
        None => body.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use secrecy::SecretString;
    use tempfile::TempDir;
    use url::Url;

    use crate::error::ProjectionError;
    use crate::salesforce::transport::TransportFuture;

    // ─────────────────────────────────────────────────────────────────────────
    // Fake Transport
    // ─────────────────────────────────────────────────────────────────────────

    #[derive(Debug, Clone)]
    enum Step {
        Respond(TransportResponse),
        Fail(TransportError),
        Hang,
    }

    /// Replays a fixed script and records every attempt.
    #[derive(Clone, Default)]
    struct FakeTransport {
        script: Arc<Mutex<VecDeque<Step>>>,
        calls: Arc<Mutex<Vec<Duration>>>,
    }

    impl FakeTransport {
        fn scripted(steps: Vec<Step>) -> Self {
            Self {
                script: Arc::new(Mutex::new(steps.into())),
                calls: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn calls(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    impl Transport for FakeTransport {
        fn put_payload<'a>(&'a self, request: &'a UploadRequest) -> TransportFuture<'a> {
            self.calls.lock().unwrap().push(request.timeout);
            let step = self
                .script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Step::Fail(TransportError::Connection("script exhausted".into())));

            Box::pin(async move {
                match step {
                    Step::Respond(response) => Ok(response),
                    Step::Fail(error) => Err(error),
                    Step::Hang => std::future::pending().await,
                }
            })
        }
    }

    fn status(code: u16) -> Step {
        Step::Respond(TransportResponse {
            status: code,
            retry_after: None,
            body: String::new(),
        })
    }

    fn status_with(code: u16, retry_after: Option<&str>, body: &str) -> Step {
        Step::Respond(TransportResponse {
            status: code,
            retry_after: retry_after.map(str::to_string),
            body: body.to_string(),
        })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Helpers
    // ─────────────────────────────────────────────────────────────────────────

    struct Fixture {
        _dir: TempDir,
        payload: std::path::PathBuf,
        target: IngestTarget,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let payload = dir.path().join("payload.csv");
        std::fs::write(&payload, "Name\nAcme\n").unwrap();
        Fixture {
            _dir: dir,
            payload,
            target: IngestTarget::new(
                Url::parse("https://na1.salesforce.com").unwrap(),
                "v60.0",
                "750xx000000001ABC",
                SecretString::from("test_token".to_string()),
            ),
        }
    }

    fn client(transport: FakeTransport, max_attempts: u32) -> UploadClient<FakeTransport> {
        let policy = RetryPolicy {
            max_attempts,
            ..RetryPolicy::default()
        };
        UploadClient::new(transport, policy)
    }

    async fn run(
        client: &UploadClient<FakeTransport>,
        fx: &Fixture,
    ) -> Result<UploadReport, AppError> {
        client
            .upload(&fx.target, &fx.payload, &CancellationToken::new())
            .await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Retry Behaviour
    // ─────────────────────────────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn succeeds_on_third_attempt_with_growing_delays() {
        let fx = fixture();
        let transport = FakeTransport::scripted(vec![status(503), status(503), status(200)]);
        let client = client(transport.clone(), 5);

        let report = run(&client, &fx).await.unwrap();

        assert_eq!(report.status, 200);
        assert_eq!(report.attempts, 3);
        assert_eq!(transport.calls(), 3);
        assert_eq!(report.delays.len(), 2);
        assert!(report.delays[0] >= Duration::from_millis(1_000));
        assert!(report.delays[0] < Duration::from_millis(1_350));
        assert!(report.delays[1] >= Duration::from_millis(2_000));
        assert!(report.delays[1] < Duration::from_millis(2_350));
        assert!(report.delays[0] <= report.delays[1]);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_after_exactly_max_attempts() {
        let fx = fixture();
        let transport = FakeTransport::scripted(vec![
            status_with(500, None, "boom"),
            status_with(500, None, "boom"),
            status_with(500, None, "boom"),
            status(200),
        ]);
        let client = client(transport.clone(), 3);

        match run(&client, &fx).await {
            Err(AppError::Upload(UploadError::ExhaustedRetries {
                attempts,
                last_status,
                body,
            })) => {
                assert_eq!(attempts, 3);
                assert_eq!(last_status, Some(500));
                assert_eq!(body, "boom");
            }
            other => panic!("Expected ExhaustedRetries, got: {:?}", other),
        }
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn non_transient_status_fails_immediately() {
        let fx = fixture();
        let body = r#"[{"errorCode":"INVALIDJOBSTATE","message":"Job is not open"}]"#;
        let transport = FakeTransport::scripted(vec![status_with(400, None, body), status(200)]);
        let client = client(transport.clone(), 5);

        match run(&client, &fx).await {
            Err(AppError::Upload(UploadError::NonRetryableStatus {
                status,
                body: returned,
                salesforce_error,
            })) => {
                assert_eq!(status, 400);
                assert_eq!(returned, body);
                assert_eq!(
                    salesforce_error.as_deref(),
                    Some("[INVALIDJOBSTATE] Job is not open")
                );
            }
            other => panic!("Expected NonRetryableStatus, got: {:?}", other),
        }
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn html_error_page_has_no_salesforce_error() {
        let fx = fixture();
        let transport =
            FakeTransport::scripted(vec![status_with(404, None, "<html>Not Found</html>")]);

        match run(&client(transport, 5), &fx).await {
            Err(AppError::Upload(UploadError::NonRetryableStatus {
                salesforce_error, ..
            })) => assert_eq!(salesforce_error, None),
            other => panic!("Expected NonRetryableStatus, got: {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retry_after_overrides_exponential_delay() {
        let fx = fixture();
        let transport = FakeTransport::scripted(vec![
            status_with(429, Some("7"), ""),
            status(503),
            status(201),
        ]);
        let policy = RetryPolicy {
            max_jitter: Duration::ZERO,
            ..RetryPolicy::default()
        };
        let client = UploadClient::new(transport, policy);

        let report = run(&client, &fx).await.unwrap();

        assert_eq!(report.status, 201);
        assert_eq!(
            report.delays,
            vec![Duration::from_secs(7), Duration::from_secs(2)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_retry_after_falls_back_to_backoff() {
        let fx = fixture();
        let transport = FakeTransport::scripted(vec![
            status_with(503, Some("soon"), ""),
            status(200),
        ]);
        let policy = RetryPolicy {
            max_jitter: Duration::ZERO,
            ..RetryPolicy::default()
        };

        let report = run(&UploadClient::new(transport, policy), &fx).await.unwrap();
        assert_eq!(report.delays, vec![Duration::from_secs(1)]);
    }

    #[tokio::test(start_paused = true)]
    async fn timeouts_count_as_transient() {
        let fx = fixture();
        let transport = FakeTransport::scripted(vec![
            Step::Fail(TransportError::Timeout),
            Step::Fail(TransportError::Timeout),
        ]);
        let client = client(transport.clone(), 2).with_attempt_timeout(Duration::from_secs(9));

        match run(&client, &fx).await {
            Err(AppError::Upload(UploadError::ExhaustedRetries {
                attempts,
                last_status,
                body,
            })) => {
                assert_eq!(attempts, 2);
                assert_eq!(last_status, None);
                assert!(body.is_empty());
            }
            other => panic!("Expected ExhaustedRetries, got: {:?}", other),
        }
        assert_eq!(
            *transport.calls.lock().unwrap(),
            vec![Duration::from_secs(9); 2]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_then_success() {
        let fx = fixture();
        let transport =
            FakeTransport::scripted(vec![Step::Fail(TransportError::Timeout), status(200)]);

        let report = run(&client(transport, 5), &fx).await.unwrap();
        assert_eq!(report.attempts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn connection_failure_is_terminal() {
        let fx = fixture();
        let transport = FakeTransport::scripted(vec![
            Step::Fail(TransportError::Connection("refused".into())),
            status(200),
        ]);

        let result = run(&client(transport.clone(), 5), &fx).await;
        assert!(matches!(
            result,
            Err(AppError::Upload(UploadError::ConnectionFailed(_)))
        ));
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn single_attempt_budget_never_retries() {
        let fx = fixture();
        let transport = FakeTransport::scripted(vec![status(503), status(200)]);

        let result = run(&client(transport.clone(), 1), &fx).await;
        assert!(matches!(
            result,
            Err(AppError::Upload(UploadError::ExhaustedRetries { attempts: 1, .. }))
        ));
        assert_eq!(transport.calls(), 1);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Ready State
    // ─────────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn missing_payload_fails_before_sending() {
        let fx = fixture();
        let transport = FakeTransport::scripted(vec![status(200)]);
        let client = client(transport.clone(), 5);
        let missing = fx.payload.with_file_name("missing.csv");

        let result = client
            .upload(&fx.target, &missing, &CancellationToken::new())
            .await;

        assert!(matches!(
            result,
            Err(AppError::Upload(UploadError::PayloadUnreadable(_)))
        ));
        assert_eq!(transport.calls(), 0);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Cancellation
    // ─────────────────────────────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn cancel_aborts_in_flight_attempt() {
        let fx = fixture();
        let transport = FakeTransport::scripted(vec![Step::Hang]);
        let client = client(transport.clone(), 5);
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let result = client.upload(&fx.target, &fx.payload, &cancel).await;
        assert!(matches!(result, Err(AppError::Cancelled)));
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_delay_schedules_nothing_more() {
        let fx = fixture();
        let transport = FakeTransport::scripted(vec![
            status_with(503, Some("3600"), ""),
            status(200),
        ]);
        let client = client(transport.clone(), 5);
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            trigger.cancel();
        });

        let result = client.upload(&fx.target, &fx.payload, &cancel).await;
        assert!(matches!(result, Err(AppError::Cancelled)));
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn already_cancelled_sends_nothing() {
        let fx = fixture();
        let transport = FakeTransport::scripted(vec![status(200)]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = client(transport.clone(), 5)
            .upload(&fx.target, &fx.payload, &cancel)
            .await;
        assert!(matches!(result, Err(AppError::Cancelled)));
        assert_eq!(transport.calls(), 0);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Helpers Under Test
    // ─────────────────────────────────────────────────────────────────────────

    #[test]
    fn truncate_body_marks_cut_bodies() {
        let long = "a".repeat(2_500);
        let cut = truncate_body(&long, 2_000);

        assert_eq!(cut.len(), 2_000 + TRUNCATION_MARKER.len());
        assert!(cut.ends_with(TRUNCATION_MARKER));
        assert_eq!(truncate_body("short", 2_000), "short");
        assert_eq!(truncate_body(&"a".repeat(2_000), 2_000).len(), 2_000);
    }

    #[test]
    fn truncated_body_length_is_limit_plus_marker() {
        let cut = truncate_body(&"é".repeat(5_000), 2_000);

        assert_eq!(cut.chars().count(), 2_000 + TRUNCATION_MARKER.len());
        assert_eq!(cut.chars().filter(|c| *c == 'é').count(), 2_000);
    }

    #[test]
    fn truncate_body_respects_char_boundaries() {
        assert_eq!(truncate_body("ééé", 2), format!("éé{}", TRUNCATION_MARKER));
    }

    #[test]
    fn projector_failure_never_leaks_into_upload_errors() {
        // Bodies that are not JSON simply carry no decoded Salesforce error.
        let client = client(FakeTransport::default(), 1);
        assert_eq!(client.decode_salesforce_error("<html/>"), None);
        assert!(matches!(
            ResponseProjector::default().project("<html/>", &["0.errorCode"]),
            Err(AppError::Projection(ProjectionError::InvalidBody { .. }))
        ));
    }
}
