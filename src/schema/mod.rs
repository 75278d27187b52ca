//! Column schemas: the ordered header/extractor list that drives CSV export.
//!
//! Three ways to build one, all producing the same [`ColumnSchema`]:
//!
//! - **Declared** via [`ColumnSchema::builder`] or [`ColumnSchema::declared`]
//! - **Derived** from a [`FieldAccess`] type via [`ColumnSchema::derived`]
//! - **Mapped** from a [`FieldMapping`] via [`ColumnSchema::mapped`]

mod column;
mod fields;
mod mapping;

pub use column::{Column, ColumnSchema, Extractor, SchemaBuilder};
pub use fields::{CsvValue, FieldAccess, FieldOverride, FieldOverrides};
pub use mapping::{FieldMapping, MappingDirection, MappingEntry};
