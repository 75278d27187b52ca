//! CSV payload production.
//!
//! [`CsvSerializer`] turns any record sequence into RFC 4180 text through a
//! [`ColumnSchema`](crate::schema::ColumnSchema); [`write_payload`] and
//! [`export_payload`] put that text into a file atomically, so the uploader
//! only ever sees complete payloads.

mod atomic_writer;
mod payload;
mod serializer;

pub use atomic_writer::AtomicFileWriter;
pub use payload::{export_payload, write_payload, Payload};
pub use serializer::{escape_field, CsvOptions, CsvSerializer, LineEnding, UTF8_BOM};
