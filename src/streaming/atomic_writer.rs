//! Atomic payload file writer with automatic cleanup on failure.
//!
//! Bytes go to a temporary file in the destination's directory, which
//! replaces the destination on `finish()`. Dropping the writer before then
//! deletes the temporary file, so a failed export never leaves a partial
//! payload where the uploader would pick it up.

use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::error::{AppError, SerializationError};

/// Sink that becomes visible at its final path only once complete.
pub struct AtomicFileWriter {
    temp: NamedTempFile,
    final_path: PathBuf,
}

impl AtomicFileWriter {
    /// Creates the temporary file next to `final_path`.
    ///
    /// # Errors
    ///
    /// `SerializationError::SinkWriteFailed` if `final_path` has no parent
    /// directory or the temporary file cannot be created there.
    pub fn new(final_path: impl AsRef<Path>) -> Result<Self, AppError> {
        let final_path = final_path.as_ref().to_path_buf();

        let parent_dir = match final_path.parent() {
            Some(p) if p.as_os_str().is_empty() => Path::new("."),
            Some(p) => p,
            None => {
                return Err(sink_failed(format!(
                    "Cannot determine parent directory for: {}",
                    final_path.display()
                )))
            }
        };

        let temp = NamedTempFile::new_in(parent_dir)
            .map_err(|e| sink_failed(format!("Failed to create temporary file: {}", e)))?;

        Ok(Self { temp, final_path })
    }

    pub fn final_path(&self) -> &Path {
        &self.final_path
    }

    /// Syncs the data to disk and moves it to the final path.
    ///
    /// # Errors
    ///
    /// `SerializationError::SinkWriteFailed` if syncing or persisting fails.
    /// The temporary file is removed in that case.
    pub fn finish(self) -> Result<PathBuf, AppError> {
        self.temp
            .as_file()
            .sync_all()
            .map_err(|e| sink_failed(format!("Failed to sync payload: {}", e)))?;

        self.temp.persist(&self.final_path).map_err(|e| {
            sink_failed(format!(
                "Failed to persist file to {}: {}",
                self.final_path.display(),
                e.error
            ))
        })?;

        Ok(self.final_path)
    }

    fn file(&mut self) -> &mut File {
        self.temp.as_file_mut()
    }
}

impl Write for AtomicFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file().flush()
    }
}

fn sink_failed(message: String) -> AppError {
    SerializationError::SinkWriteFailed(message).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn entries(dir: &Path) -> usize {
        fs::read_dir(dir).expect("Failed to read dir").count()
    }

    #[test]
    fn finish_moves_bytes_into_place() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let final_path = temp_dir.path().join("payload.csv");

        let mut writer = AtomicFileWriter::new(&final_path).expect("Failed to create writer");
        writer.write_all(b"Name\nAcme\n").expect("Failed to write");
        assert!(!final_path.exists(), "Destination must not appear early");

        let result_path = writer.finish().expect("Failed to finish");

        assert_eq!(result_path, final_path);
        assert_eq!(fs::read_to_string(&final_path).unwrap(), "Name\nAcme\n");
        assert_eq!(entries(temp_dir.path()), 1);
    }

    #[test]
    fn drop_without_finish_leaves_nothing() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let final_path = temp_dir.path().join("payload.csv");

        {
            let mut writer = AtomicFileWriter::new(&final_path).expect("Failed to create writer");
            writer.write_all(b"Name\npartial").expect("Failed to write");
        }

        assert_eq!(entries(temp_dir.path()), 0);
        assert!(!final_path.exists());
    }

    #[test]
    fn finish_replaces_existing_file() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let final_path = temp_dir.path().join("payload.csv");
        fs::write(&final_path, "OLD_CONTENT").unwrap();

        let mut writer = AtomicFileWriter::new(&final_path).expect("Failed to create writer");
        writer.write_all(b"NEW").unwrap();
        writer.finish().expect("Failed to finish");

        assert_eq!(fs::read_to_string(&final_path).unwrap(), "NEW");
    }

    #[test]
    fn missing_directory_is_a_sink_error() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let final_path = temp_dir.path().join("no-such-dir").join("payload.csv");

        assert!(matches!(
            AtomicFileWriter::new(&final_path),
            Err(AppError::Serialization(
                SerializationError::SinkWriteFailed(_)
            ))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn root_path_has_no_parent() {
        assert!(AtomicFileWriter::new("/").is_err());
    }
}
