//! One export → upload → project cycle.
//!
//! A cycle owns its payload file and its attempt counter; nothing is shared
//! between cycles except the immutable schema and the HTTP client, so any
//! number of them can run side by side.

use std::path::PathBuf;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::{Config, ExportConfig};
use crate::error::AppError;
use crate::response::{ProjectedFields, ResponseProjector};
use crate::salesforce::{
    redact_id, IngestTarget, ReqwestTransport, Transport, UploadClient, UploadReport,
};
use crate::schema::ColumnSchema;
use crate::streaming::{export_payload, Payload};

/// Outcome of a cycle whose upload succeeded.
#[derive(Debug)]
pub struct CycleReport {
    pub payload: Payload,
    pub upload: UploadReport,
    /// Projection of the response body. A malformed body does not undo the
    /// upload, so it is reported here rather than as the cycle's error.
    pub fields: Result<ProjectedFields, AppError>,
}

/// Runs cycles against one transport with one configuration.
pub struct ExportCycle<T> {
    uploader: UploadClient<T>,
    export: ExportConfig,
    projector: ResponseProjector,
}

impl ExportCycle<ReqwestTransport> {
    /// Builds a cycle runner with a fresh `reqwest` client.
    pub fn from_config(config: &Config) -> Result<Self, AppError> {
        config.validate()?;
        let transport = ReqwestTransport::from_config(&config.upload)?;
        Ok(Self::new(transport, config))
    }
}

impl<T: Transport> ExportCycle<T> {
    pub fn new(transport: T, config: &Config) -> Self {
        let projector = ResponseProjector::new(config.projector.clone());
        Self {
            uploader: UploadClient::from_config(transport, &config.upload)
                .with_projector(projector.clone()),
            export: config.export.clone(),
            projector,
        }
    }

    /// Exports `records` through `schema`, uploads the payload to `target`
    /// and projects `paths` out of the response.
    ///
    /// The payload file is deleted when the cycle fails, and after a
    /// successful upload unless `keep_payload` is set. Dropping the future
    /// part way through also deletes it.
    ///
    /// # Errors
    ///
    /// Serialization and upload errors abort the cycle; `AppError::Cancelled`
    /// if `cancel` fired.
    pub async fn run<R, I, S>(
        &self,
        schema: &ColumnSchema<R>,
        records: I,
        target: &IngestTarget,
        paths: &[S],
        cancel: &CancellationToken,
    ) -> Result<CycleReport, AppError>
    where
        R: 'static,
        I: IntoIterator<Item = R> + Send + 'static,
        S: AsRef<str>,
    {
        let job = redact_id(&target.job_id);
        let path = self.payload_path();

        info!(
            "[CYCLE] Job {} export started ({} columns)",
            job,
            schema.len()
        );

        let mut payload = export_payload(
            schema.clone(),
            records,
            path,
            self.export.csv_options(),
            cancel.clone(),
        )
        .await?;

        let upload = self.uploader.upload(target, &payload.path, cancel).await;

        if upload.is_ok() && self.export.keep_payload {
            payload.keep();
        } else if let Err(e) = payload.remove() {
            warn!(
                "[CYCLE] Failed to remove payload {}: {}",
                payload.path.display(),
                e
            );
        }
        let upload = upload?;

        let fields = if paths.is_empty() {
            Ok(ProjectedFields::default())
        } else {
            self.projector.project(&upload.body, paths)
        };
        if let Err(e) = &fields {
            warn!("[CYCLE] Job {} response projection failed: {}", job, e);
        }

        info!(
            "[CYCLE] Job {} done: {} rows, {} bytes, {} attempt(s)",
            job, payload.rows, payload.bytes, upload.attempts
        );

        Ok(CycleReport {
            payload,
            upload,
            fields,
        })
    }

    fn payload_path(&self) -> PathBuf {
        self.export
            .work_dir()
            .join(format!("payload-{}.csv", Uuid::new_v4()))
    }
}

/// Runs one cycle with a `reqwest` transport built from `config`.
pub async fn run_cycle<R, I, S>(
    config: &Config,
    schema: &ColumnSchema<R>,
    records: I,
    target: &IngestTarget,
    paths: &[S],
    cancel: &CancellationToken,
) -> Result<CycleReport, AppError>
where
    R: 'static,
    I: IntoIterator<Item = R> + Send + 'static,
    S: AsRef<str>,
{
    ExportCycle::from_config(config)?
        .run(schema, records, target, paths, cancel)
        .await
}
