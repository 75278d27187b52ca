//! Column definitions and the immutable `ColumnSchema` built from them.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use tracing::warn;

use crate::error::{AppError, SchemaError};

/// Extracts one column value from a record. `None` means absent.
pub type Extractor<R> = Arc<dyn Fn(&R) -> Option<String> + Send + Sync>;

// ─────────────────────────────────────────────────────────────────────────────
// Column
// ─────────────────────────────────────────────────────────────────────────────

/// A header name bound to a way of reading a string value from a record.
pub struct Column<R> {
    header: String,
    extractor: Extractor<R>,
}

impl<R> Column<R> {
    /// Creates a column from a header and an extractor closure.
    pub fn new<F>(header: impl Into<String>, extractor: F) -> Self
    where
        F: Fn(&R) -> Option<String> + Send + Sync + 'static,
    {
        Self {
            header: header.into(),
            extractor: Arc::new(extractor),
        }
    }

    /// Creates a column from an already shared extractor.
    pub fn from_extractor(header: impl Into<String>, extractor: Extractor<R>) -> Self {
        Self {
            header: header.into(),
            extractor,
        }
    }

    pub fn header(&self) -> &str {
        &self.header
    }

    /// Reads the raw value. Never mutates the record.
    pub fn value(&self, record: &R) -> Option<String> {
        (self.extractor)(record)
    }
}

impl<R> Clone for Column<R> {
    fn clone(&self) -> Self {
        Self {
            header: self.header.clone(),
            extractor: Arc::clone(&self.extractor),
        }
    }
}

impl<R> fmt::Debug for Column<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Column")
            .field("header", &self.header)
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ColumnSchema
// ─────────────────────────────────────────────────────────────────────────────

/// Ordered, immutable list of columns.
///
/// Cloning is cheap (the column list is shared), so one schema can be handed
/// to many concurrent export cycles. The serializer only ever sees this type,
/// never the strategy (declared, derived, mapped) that produced it.
pub struct ColumnSchema<R> {
    columns: Arc<[Column<R>]>,
}

impl<R> ColumnSchema<R> {
    /// Builds a declared schema. Column order is exactly the given order.
    ///
    /// # Errors
    ///
    /// `SchemaError::EmptyHeader` if any header is empty.
    pub fn declared(columns: Vec<Column<R>>) -> Result<Self, AppError> {
        Self::from_columns(columns)
    }

    /// Starts a declared schema builder.
    pub fn builder() -> SchemaBuilder<R> {
        SchemaBuilder {
            columns: Vec::new(),
        }
    }

    /// Validates headers and freezes the column list.
    pub(crate) fn from_columns(columns: Vec<Column<R>>) -> Result<Self, AppError> {
        let mut seen = HashSet::with_capacity(columns.len());

        for (position, column) in columns.iter().enumerate() {
            if column.header.is_empty() {
                return Err(SchemaError::EmptyHeader { position }.into());
            }
            if !seen.insert(column.header.as_str()) {
                warn!(
                    "[SCHEMA] Duplicate header '{}' at column {}; readers may not tell the columns apart",
                    column.header, position
                );
            }
        }

        Ok(Self {
            columns: columns.into(),
        })
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Header of column `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index >= self.len()`, like slice indexing.
    pub fn header(&self, index: usize) -> &str {
        self.columns[index].header()
    }

    /// Value of column `index` for `record`; absent values become `""`.
    ///
    /// # Panics
    ///
    /// Panics if `index >= self.len()`, like slice indexing.
    pub fn extract(&self, record: &R, index: usize) -> String {
        self.columns[index].value(record).unwrap_or_default()
    }

    pub fn headers(&self) -> impl Iterator<Item = &str> + '_ {
        self.columns.iter().map(Column::header)
    }

    pub fn columns(&self) -> &[Column<R>] {
        &self.columns
    }
}

impl<R> Clone for ColumnSchema<R> {
    fn clone(&self) -> Self {
        Self {
            columns: Arc::clone(&self.columns),
        }
    }
}

impl<R> fmt::Debug for ColumnSchema<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.headers()).finish()
    }
}

/// Builder for declared schemas.
pub struct SchemaBuilder<R> {
    columns: Vec<Column<R>>,
}

impl<R> SchemaBuilder<R> {
    /// Appends a column.
    pub fn column<F>(mut self, header: impl Into<String>, extractor: F) -> Self
    where
        F: Fn(&R) -> Option<String> + Send + Sync + 'static,
    {
        self.columns.push(Column::new(header, extractor));
        self
    }

    pub fn build(self) -> Result<ColumnSchema<R>, AppError> {
        ColumnSchema::from_columns(self.columns)
    }
}
