//! Explicit external-name → source-field mappings.
//!
//! Mapping files use the properties line format (`key=value`, `key: value`
//! or `key value`). The file can be written either way round; [`MappingDirection`] says which side
//! is the external (header) name.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{AppError, SchemaError};
use crate::schema::column::{Column, ColumnSchema};
use crate::schema::fields::FieldAccess;

/// Which side of a mapping line holds the external header name.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingDirection {
    /// `External=source_field`
    #[default]
    ExternalToSource,
    /// `source_field=External`, inverted on load.
    SourceToExternal,
}

/// One output column: header name and the source field it reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingEntry {
    pub external: String,
    pub source: String,
}

/// Ordered external → source mapping. Several headers may alias one source field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldMapping {
    entries: Vec<MappingEntry>,
}

impl FieldMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a mapping from `(external, source)` pairs, keeping their order.
    pub fn from_pairs<I, E, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (E, S)>,
        E: Into<String>,
        S: Into<String>,
    {
        let mut mapping = Self::new();
        for (external, source) in pairs {
            mapping = mapping.with(external, source);
        }
        mapping
    }

    /// Appends one entry.
    pub fn with(mut self, external: impl Into<String>, source: impl Into<String>) -> Self {
        self.entries.push(MappingEntry {
            external: external.into(),
            source: source.into(),
        });
        self
    }

    /// Parses a properties-style mapping file, preserving file order.
    ///
    /// Blank lines and lines starting with `#` or `!` are skipped. The key
    /// ends at the first `=`, `:` or whitespace; one `=` or `:` may follow,
    /// and the rest of the line is the value. A key seen again replaces the
    /// earlier value but keeps the earlier position.
    ///
    /// # Errors
    ///
    /// `SchemaError::InvalidMapping` with the 1-based line number when a line
    /// has an empty key or no value.
    pub fn parse_properties(text: &str, direction: MappingDirection) -> Result<Self, AppError> {
        let mut mapping = Self::new();

        for (index, raw) in text.lines().enumerate() {
            let line_no = index + 1;
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
                continue;
            }

            let (key, value) = split_property(line);
            if key.is_empty() || value.is_empty() {
                return Err(SchemaError::InvalidMapping {
                    line: line_no,
                    reason: "expected 'key=value', 'key: value' or 'key value'".to_string(),
                }
                .into());
            }

            let entry = match direction {
                MappingDirection::ExternalToSource => MappingEntry {
                    external: key.to_string(),
                    source: value.to_string(),
                },
                MappingDirection::SourceToExternal => MappingEntry {
                    external: value.to_string(),
                    source: key.to_string(),
                },
            };

            let earlier = mapping.entries.iter_mut().find(|e| match direction {
                MappingDirection::ExternalToSource => e.external == entry.external,
                MappingDirection::SourceToExternal => e.source == entry.source,
            });
            match earlier {
                Some(slot) => {
                    debug!(
                        "[SCHEMA] Mapping key '{}' redefined on line {}",
                        key, line_no
                    );
                    *slot = entry;
                }
                None => mapping.entries.push(entry),
            }
        }

        Ok(mapping)
    }

    pub fn entries(&self) -> &[MappingEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Source field read by the first column named `external`.
    pub fn source_for(&self, external: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.external == external)
            .map(|e| e.source.as_str())
    }

    /// Every header that reads `source`, in column order.
    pub fn externals_for(&self, source: &str) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|e| e.source == source)
            .map(|e| e.external.as_str())
            .collect()
    }
}

impl<R: FieldAccess + 'static> ColumnSchema<R> {
    /// Builds a schema whose columns follow `mapping` exactly.
    ///
    /// Every source field is resolved against `R::field_names()` up front, so
    /// a typo fails here, before any file is opened or row written.
    ///
    /// # Errors
    ///
    /// - `SchemaError::UnknownField` naming the missing field and its header
    /// - `SchemaError::EmptyHeader` if an external name is empty
    pub fn mapped(mapping: &FieldMapping) -> Result<Self, AppError> {
        let names = R::field_names();
        let mut columns = Vec::with_capacity(mapping.len());

        for entry in mapping.entries() {
            let field: &'static str = names
                .iter()
                .copied()
                .find(|name| *name == entry.source)
                .ok_or_else(|| SchemaError::UnknownField {
                    field: entry.source.clone(),
                    header: entry.external.clone(),
                })?;

            columns.push(Column::new(entry.external.clone(), move |record: &R| {
                record.field_value(field)
            }));
        }

        Self::from_columns(columns)
    }
}

/// Splits a trimmed properties line into key and value.
fn split_property(line: &str) -> (&str, &str) {
    let is_separator = |c: char| c == '=' || c == ':';
    let key_end = line
        .find(|c: char| is_separator(c) || c.is_whitespace())
        .unwrap_or(line.len());

    let rest = line[key_end..].trim_start();
    let rest = rest.strip_prefix(is_separator).unwrap_or(rest);
    (&line[..key_end], rest.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Lead {
        first_name: String,
        last_name: String,
        company: Option<String>,
    }

    crate::field_access!(Lead {
        first_name,
        last_name,
        company
    });

    fn lead() -> Lead {
        Lead {
            first_name: "Grace".to_string(),
            last_name: "Hopper".to_string(),
            company: None,
        }
    }

    #[test]
    fn parse_external_to_source() {
        let text = "\
# Salesforce field = struct field
LastName = last_name
FirstName: first_name

! another comment
Company=company
";
        let mapping =
            FieldMapping::parse_properties(text, MappingDirection::ExternalToSource).unwrap();

        assert_eq!(mapping.len(), 3);
        assert_eq!(mapping.entries()[0].external, "LastName");
        assert_eq!(mapping.entries()[0].source, "last_name");
        assert_eq!(mapping.source_for("FirstName"), Some("first_name"));
        assert_eq!(mapping.entries()[2].external, "Company");
    }

    #[test]
    fn parse_source_to_external_inverts() {
        let text = "last_name=LastName\nfirst_name=FirstName\n";
        let mapping =
            FieldMapping::parse_properties(text, MappingDirection::SourceToExternal).unwrap();

        assert_eq!(mapping.source_for("LastName"), Some("last_name"));
        assert_eq!(mapping.externals_for("first_name"), vec!["FirstName"]);
    }

    #[test]
    fn parse_accepts_whitespace_separator() {
        let text = "LastName last_name\nFirstName   =  first_name\nCompany\tcompany\n";
        let mapping =
            FieldMapping::parse_properties(text, MappingDirection::ExternalToSource).unwrap();

        assert_eq!(mapping.len(), 3);
        assert_eq!(mapping.source_for("LastName"), Some("last_name"));
        assert_eq!(mapping.source_for("FirstName"), Some("first_name"));
        assert_eq!(mapping.source_for("Company"), Some("company"));
    }

    #[test]
    fn parse_keeps_last_value_for_repeated_key() {
        let text = "LastName=last_name\nFirstName=first_name\nLastName=company\n";
        let mapping =
            FieldMapping::parse_properties(text, MappingDirection::ExternalToSource).unwrap();

        assert_eq!(mapping.len(), 2);
        assert_eq!(mapping.entries()[0].external, "LastName");
        assert_eq!(mapping.entries()[0].source, "company");
        assert_eq!(mapping.entries()[1].external, "FirstName");
    }

    #[test]
    fn parse_repeated_key_follows_direction() {
        let text = "last_name=LastName\nlast_name=Surname\nfirst_name=LastName\n";
        let mapping =
            FieldMapping::parse_properties(text, MappingDirection::SourceToExternal).unwrap();

        assert_eq!(mapping.len(), 2);
        assert_eq!(mapping.externals_for("last_name"), vec!["Surname"]);
        assert_eq!(mapping.source_for("LastName"), Some("first_name"));
    }

    #[test]
    fn parse_rejects_key_without_value() {
        let text = "LastName=last_name\nFirstName\n";

        match FieldMapping::parse_properties(text, MappingDirection::ExternalToSource) {
            Err(AppError::Schema(SchemaError::InvalidMapping { line, .. })) => assert_eq!(line, 2),
            other => panic!("Expected InvalidMapping, got: {:?}", other),
        }
    }

    #[test]
    fn parse_rejects_empty_value() {
        let result = FieldMapping::parse_properties("LastName=\n", MappingDirection::default());
        assert!(matches!(
            result,
            Err(AppError::Schema(SchemaError::InvalidMapping { line: 1, .. }))
        ));
    }

    #[test]
    fn mapped_schema_follows_mapping_order() {
        let mapping = FieldMapping::from_pairs([
            ("LastName", "last_name"),
            ("FirstName", "first_name"),
            ("Company", "company"),
        ]);

        let schema = ColumnSchema::<Lead>::mapped(&mapping).unwrap();
        let record = lead();

        assert_eq!(
            schema.headers().collect::<Vec<_>>(),
            vec!["LastName", "FirstName", "Company"]
        );
        assert_eq!(schema.extract(&record, 0), "Hopper");
        assert_eq!(schema.extract(&record, 2), "");
    }

    #[test]
    fn mapped_schema_allows_aliasing() {
        let mapping = FieldMapping::new()
            .with("LastName", "last_name")
            .with("Name", "last_name");

        let schema = ColumnSchema::<Lead>::mapped(&mapping).unwrap();
        let record = lead();

        assert_eq!(schema.extract(&record, 0), "Hopper");
        assert_eq!(schema.extract(&record, 1), "Hopper");
        assert_eq!(mapping.externals_for("last_name"), vec!["LastName", "Name"]);
    }

    #[test]
    fn mapped_schema_fails_fast_on_unknown_field() {
        let mapping = FieldMapping::new()
            .with("LastName", "last_name")
            .with("Email", "email");

        match ColumnSchema::<Lead>::mapped(&mapping) {
            Err(AppError::Schema(SchemaError::UnknownField { field, header })) => {
                assert_eq!(field, "email");
                assert_eq!(header, "Email");
            }
            other => panic!("Expected UnknownField, got: {:?}", other),
        }
    }
}
