//! Field-level access for derived and mapped schemas.
//!
//! Rust has no runtime reflection, so a record type describes its own field
//! set through [`FieldAccess`]. The [`field_access!`](crate::field_access)
//! macro writes that impl for plain structs. Which fields end up as columns,
//! and under which header, is decided by [`FieldOverrides`] data rather than
//! attributes on the struct.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, SchemaError};
use crate::schema::column::{Column, ColumnSchema};

/// A record type whose fields can be enumerated and read by identifier.
pub trait FieldAccess {
    /// All field identifiers of the type, in any order.
    fn field_names() -> &'static [&'static str];

    /// Value of `field` as text, `None` when absent or unknown.
    fn field_value(&self, field: &str) -> Option<String>;
}

/// Conversion of a field value to its CSV text.
pub trait CsvValue {
    fn to_csv_value(&self) -> Option<String>;
}

macro_rules! impl_csv_value_display {
    ($($ty:ty),* $(,)?) => {
        $(
            impl CsvValue for $ty {
                fn to_csv_value(&self) -> Option<String> {
                    Some(self.to_string())
                }
            }
        )*
    };
}

impl_csv_value_display!(
    String, str, char, bool, i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize,
    f32, f64
);

impl<T: CsvValue> CsvValue for Option<T> {
    fn to_csv_value(&self) -> Option<String> {
        self.as_ref().and_then(CsvValue::to_csv_value)
    }
}

impl<T: CsvValue + ?Sized> CsvValue for &T {
    fn to_csv_value(&self) -> Option<String> {
        (**self).to_csv_value()
    }
}

impl<T: CsvValue + ?Sized> CsvValue for Box<T> {
    fn to_csv_value(&self) -> Option<String> {
        (**self).to_csv_value()
    }
}

/// Implements [`FieldAccess`] for a struct whose listed fields implement
/// [`CsvValue`].
///
/// ```ignore
/// struct Account { id: u64, name: String, website: Option<String> }
/// bulk_export::field_access!(Account { id, name, website });
/// ```
#[macro_export]
macro_rules! field_access {
    ($ty:ty { $($field:ident),+ $(,)? }) => {
        impl $crate::schema::FieldAccess for $ty {
            fn field_names() -> &'static [&'static str] {
                &[$(stringify!($field)),+]
            }

            fn field_value(&self, field: &str) -> Option<String> {
                $(
                    if field == stringify!($field) {
                        return $crate::schema::CsvValue::to_csv_value(&self.$field);
                    }
                )+
                None
            }
        }
    };
}

// ─────────────────────────────────────────────────────────────────────────────
// FieldOverrides
// ─────────────────────────────────────────────────────────────────────────────

/// Per-field inclusion and header rename.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldOverride {
    #[serde(default = "default_included")]
    pub included: bool,
    #[serde(default)]
    pub display_name: Option<String>,
}

fn default_included() -> bool {
    true
}

impl Default for FieldOverride {
    fn default() -> Self {
        Self {
            included: default_included(),
            display_name: None,
        }
    }
}

/// Field identifier → override, evaluated once when a derived schema is built.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldOverrides {
    fields: BTreeMap<String, FieldOverride>,
}

impl FieldOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    /// Excludes `field` from derived schemas.
    pub fn ignore(mut self, field: impl Into<String>) -> Self {
        self.fields.entry(field.into()).or_default().included = false;
        self
    }

    /// Uses `header` instead of the field identifier.
    pub fn rename(mut self, field: impl Into<String>, header: impl Into<String>) -> Self {
        self.fields.entry(field.into()).or_default().display_name = Some(header.into());
        self
    }

    pub fn get(&self, field: &str) -> Option<&FieldOverride> {
        self.fields.get(field)
    }

    fn is_included(&self, field: &str) -> bool {
        self.get(field).map_or(true, |o| o.included)
    }

    fn header_for<'a>(&'a self, field: &'a str) -> &'a str {
        self.get(field)
            .and_then(|o| o.display_name.as_deref())
            .unwrap_or(field)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Derived schemas
// ─────────────────────────────────────────────────────────────────────────────

impl<R: FieldAccess + 'static> ColumnSchema<R> {
    /// Derives a schema from the record type's own field set.
    ///
    /// Ignored fields are dropped, renames applied, and the remaining columns
    /// ordered lexicographically by field identifier, so the result does not
    /// depend on the order `field_names()` happens to list them in.
    ///
    /// # Errors
    ///
    /// - `SchemaError::UnknownField` if an override names a field the type lacks
    /// - `SchemaError::EmptyHeader` if a rename is empty
    pub fn derived(overrides: &FieldOverrides) -> Result<Self, AppError> {
        let names = R::field_names();

        for (field, entry) in &overrides.fields {
            if !names.contains(&field.as_str()) {
                return Err(SchemaError::UnknownField {
                    field: field.clone(),
                    header: entry.display_name.clone().unwrap_or_else(|| field.clone()),
                }
                .into());
            }
        }

        let mut included: Vec<&'static str> = names
            .iter()
            .copied()
            .filter(|name| overrides.is_included(name))
            .collect();
        included.sort_unstable();

        let columns = included
            .into_iter()
            .map(|name| {
                Column::new(overrides.header_for(name), move |record: &R| {
                    record.field_value(name)
                })
            })
            .collect();

        Self::from_columns(columns)
    }
}
