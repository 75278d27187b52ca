//! Streaming CSV serialization driven by a [`ColumnSchema`].
//!
//! Rows are pulled from the record sequence one at a time and written
//! straight through a buffered sink, so memory use does not grow with the
//! number of records.

use std::borrow::Cow;
use std::convert::Infallible;
use std::fmt::Display;
use std::io::{BufWriter, Write};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{AppError, SerializationError};
use crate::schema::ColumnSchema;

/// UTF-8 byte order mark, written first when requested.
pub const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// Line ending format for CSV files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LineEnding {
    /// Unix-style line ending (\\n).
    #[default]
    LF,
    /// Windows-style line ending (\\r\\n).
    CRLF,
}

impl LineEnding {
    pub fn as_str(self) -> &'static str {
        match self {
            LineEnding::LF => "\n",
            LineEnding::CRLF => "\r\n",
        }
    }
}

/// Output options. Text is always UTF-8.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CsvOptions {
    pub line_ending: LineEnding,
    pub byte_order_marker: bool,
}

/// Escapes one field.
///
/// The value is quoted only if it contains a comma, a double quote, `\r` or
/// `\n`; inner quotes are doubled. Both newline characters trigger quoting
/// whatever the output line ending is.
pub fn escape_field(value: &str) -> Cow<'_, str> {
    if !value.contains(|c: char| matches!(c, ',' | '"' | '\n' | '\r')) {
        return Cow::Borrowed(value);
    }

    let mut escaped = String::with_capacity(value.len() + 2);
    escaped.push('"');
    for c in value.chars() {
        if c == '"' {
            escaped.push('"');
        }
        escaped.push(c);
    }
    escaped.push('"');
    Cow::Owned(escaped)
}

// ─────────────────────────────────────────────────────────────────────────────
// CsvSerializer
// ─────────────────────────────────────────────────────────────────────────────

/// Writes one header row plus one row per record.
pub struct CsvSerializer<'a, R> {
    schema: &'a ColumnSchema<R>,
    options: CsvOptions,
    cancel: Option<CancellationToken>,
}

impl<'a, R> CsvSerializer<'a, R> {
    pub fn new(schema: &'a ColumnSchema<R>, options: CsvOptions) -> Self {
        Self {
            schema,
            options,
            cancel: None,
        }
    }

    /// Stops between rows once `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Serializes `records` into `sink` and returns the number of data rows.
    ///
    /// The record sequence is consumed exactly once and dropped before
    /// returning, on success and on failure alike.
    ///
    /// # Errors
    ///
    /// - `SerializationError::SinkWriteFailed` if a write or the final flush fails
    /// - `AppError::Cancelled` if the cancellation token fired
    ///
    /// On error the sink holds a partial payload that must be discarded.
    pub fn serialize<I, W>(&self, records: I, sink: W) -> Result<u64, AppError>
    where
        I: IntoIterator<Item = R>,
        W: Write,
    {
        self.try_serialize(records.into_iter().map(Ok::<R, Infallible>), sink)
    }

    /// Like [`serialize`](Self::serialize) for sources that can fail per record,
    /// such as a database cursor.
    ///
    /// # Errors
    ///
    /// Additionally `SerializationError::SourceFailed` with the 1-based row
    /// number of the failing record.
    pub fn try_serialize<I, E, W>(&self, records: I, sink: W) -> Result<u64, AppError>
    where
        I: IntoIterator<Item = Result<R, E>>,
        E: Display,
        W: Write,
    {
        let mut out = BufWriter::new(sink);
        let mut line = String::new();
        let mut rows: u64 = 0;

        if self.options.byte_order_marker {
            out.write_all(UTF8_BOM).map_err(sink_error)?;
        }

        self.encode_row(&mut line, self.schema.headers());
        out.write_all(line.as_bytes()).map_err(sink_error)?;

        for item in records {
            if self.is_cancelled() {
                info!("[CSV-EXPORT] Cancelled after {} rows", rows);
                return Err(AppError::Cancelled);
            }

            let record = item.map_err(|e| SerializationError::SourceFailed {
                row: rows + 1,
                reason: e.to_string(),
            })?;

            let values = (0..self.schema.len()).map(|i| self.schema.extract(&record, i));
            self.encode_row(&mut line, values);
            out.write_all(line.as_bytes()).map_err(sink_error)?;
            rows += 1;
        }

        out.flush().map_err(sink_error)?;

        debug!(
            "[CSV-EXPORT] Wrote {} rows x {} columns",
            rows,
            self.schema.len()
        );

        Ok(rows)
    }

    /// Renders one row (fields plus terminator) into `line`, replacing its contents.
    fn encode_row<S, V>(&self, line: &mut String, values: V)
    where
        S: AsRef<str>,
        V: IntoIterator<Item = S>,
    {
        line.clear();
        for (i, value) in values.into_iter().enumerate() {
            if i > 0 {
                line.push(',');
            }
            line.push_str(&escape_field(value.as_ref()));
        }
        line.push_str(self.options.line_ending.as_str());
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancellationToken::is_cancelled)
    }
}

fn sink_error(e: std::io::Error) -> AppError {
    SerializationError::SinkWriteFailed(e.to_string()).into()
}
