//! Streaming CSV export and resilient Salesforce Bulk API v2 upload.
//!
//! A cycle turns a record sequence into a CSV payload through a
//! [`ColumnSchema`], PUTs it to an ingest job with retry and backoff, and
//! pulls selected fields out of the JSON response.
//!
//! ```ignore
//! use bulk_export::{run_cycle, ColumnSchema, Config, FieldOverrides, IngestTarget};
//!
//! struct Account { name: String, website: Option<String> }
//! bulk_export::field_access!(Account { name, website });
//!
//! let config = Config::load(None)?;
//! let schema = ColumnSchema::<Account>::derived(&FieldOverrides::new().rename("name", "Name"))?;
//! let report = run_cycle(&config, &schema, accounts, &target, &["id"], &cancel).await?;
//! ```

pub mod config;
pub mod error;
pub mod pipeline;
pub mod response;
pub mod salesforce;
pub mod schema;
pub mod streaming;
pub mod telemetry;

pub use config::{Config, ExportConfig, ProjectorConfig, UploadConfig};
pub use error::{AppError, ProjectionError, SchemaError, SerializationError, UploadError};
pub use pipeline::{run_cycle, CycleReport, ExportCycle};
pub use response::{ExtractedField, ProjectedFields, ResponseProjector};
pub use salesforce::{
    IngestTarget, ReqwestTransport, RetryPolicy, Transport, UploadClient, UploadReport,
};
pub use schema::{Column, ColumnSchema, FieldMapping, FieldOverrides, MappingDirection};
pub use streaming::{CsvOptions, CsvSerializer, LineEnding, Payload};
