//! Writes a complete CSV payload file for upload.

use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{AppError, SerializationError};
use crate::schema::ColumnSchema;
use crate::streaming::atomic_writer::AtomicFileWriter;
use crate::streaming::serializer::{CsvOptions, CsvSerializer};

/// A fully written payload file.
///
/// The file belongs to this value: dropping it deletes the file unless
/// [`Payload::keep`] was called first.
#[derive(Debug)]
pub struct Payload {
    pub path: PathBuf,
    /// Data rows, excluding the header.
    pub rows: u64,
    /// File size in bytes, BOM included.
    pub bytes: u64,
    owned: bool,
}

impl Payload {
    /// Leaves the file on disk after this value is dropped.
    pub fn keep(&mut self) {
        self.owned = false;
    }

    /// Deletes the file now.
    ///
    /// # Errors
    ///
    /// The I/O error from removing the file. It is not retried on drop.
    pub fn remove(&mut self) -> std::io::Result<()> {
        if !self.owned {
            return Ok(());
        }
        self.owned = false;
        std::fs::remove_file(&self.path)
    }
}

impl Drop for Payload {
    fn drop(&mut self) {
        if let Err(e) = self.remove() {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(
                    "[CSV-EXPORT] Failed to remove payload {}: {}",
                    self.path.display(),
                    e
                );
            }
        }
    }
}

/// Serializes `records` to `path`, which only appears once the file is complete.
///
/// Blocking; call [`export_payload`] from async code.
///
/// # Errors
///
/// Any serializer error. No file is left at `path` on failure.
pub fn write_payload<R, I>(
    schema: &ColumnSchema<R>,
    records: I,
    path: &Path,
    options: CsvOptions,
    cancel: &CancellationToken,
) -> Result<Payload, AppError>
where
    I: IntoIterator<Item = R>,
{
    let mut writer = AtomicFileWriter::new(path)?;

    let rows = CsvSerializer::new(schema, options)
        .with_cancellation(cancel.clone())
        .serialize(records, &mut writer)?;

    let path = writer.finish()?;
    let bytes = std::fs::metadata(&path)
        .map_err(|e| SerializationError::SinkWriteFailed(format!("Failed to stat payload: {}", e)))?
        .len();

    info!(
        "[CSV-EXPORT] Payload ready: {} rows, {} bytes -> {}",
        rows,
        bytes,
        path.display()
    );

    Ok(Payload {
        path,
        rows,
        bytes,
        owned: true,
    })
}

/// Runs [`write_payload`] on the blocking thread pool.
///
/// Dropping the returned future cancels the export: the blocking task stops
/// at the next row and leaves no file, and a payload it already finished is
/// deleted when the runtime drops the unclaimed result.
pub async fn export_payload<R, I>(
    schema: ColumnSchema<R>,
    records: I,
    path: PathBuf,
    options: CsvOptions,
    cancel: CancellationToken,
) -> Result<Payload, AppError>
where
    R: 'static,
    I: IntoIterator<Item = R> + Send + 'static,
{
    let cancel = cancel.child_token();
    let _cancel_on_drop = cancel.clone().drop_guard();

    tokio::task::spawn_blocking(move || write_payload(&schema, records, &path, options, &cancel))
        .await
        .map_err(|e| AppError::Internal(format!("Task join error: {}", e)))?
}
