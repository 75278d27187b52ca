//! Dot-path field extraction from JSON response bodies.

use serde_json::Value;
use tracing::{debug, warn};

use crate::config::ProjectorConfig;
use crate::error::{AppError, ProjectionError};

/// One requested path and what it resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedField {
    pub path: String,
    /// `None` when the path is missing, not traversable, or JSON `null`.
    pub value: Option<String>,
}

/// Projection result in request order, one entry per distinct path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectedFields {
    fields: Vec<ExtractedField>,
}

impl ProjectedFields {
    /// Resolved value for `path`, `None` if absent or never requested.
    pub fn get(&self, path: &str) -> Option<&str> {
        self.field(path).and_then(|f| f.value.as_deref())
    }

    pub fn field(&self, path: &str) -> Option<&ExtractedField> {
        self.fields.iter().find(|f| f.path == path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.field(path).is_some()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ExtractedField> {
        self.fields.iter()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Number of paths that resolved to a value.
    pub fn resolved(&self) -> usize {
        self.fields.iter().filter(|f| f.value.is_some()).count()
    }
}

impl IntoIterator for ProjectedFields {
    type Item = ExtractedField;
    type IntoIter = std::vec::IntoIter<ExtractedField>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.into_iter()
    }
}

impl<'a> IntoIterator for &'a ProjectedFields {
    type Item = &'a ExtractedField;
    type IntoIter = std::slice::Iter<'a, ExtractedField>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.iter()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ResponseProjector
// ─────────────────────────────────────────────────────────────────────────────

/// Pulls named fields out of a JSON body. Holds no mutable state; one
/// instance can serve any number of concurrent projections.
#[derive(Debug, Clone, Default)]
pub struct ResponseProjector {
    config: ProjectorConfig,
}

impl ResponseProjector {
    pub fn new(config: ProjectorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ProjectorConfig {
        &self.config
    }

    /// Resolves each path against `body`.
    ///
    /// Segments are split on the configured separator. Object members are
    /// looked up by key; arrays accept a decimal index. Strings come back
    /// raw, numbers and booleans as JSON text, objects and arrays as compact
    /// JSON. A repeated path is answered once, at its first position.
    ///
    /// # Errors
    ///
    /// `ProjectionError::InvalidBody` carrying the first `head_limit`
    /// characters of `body` if it is not a single JSON document.
    pub fn project<S: AsRef<str>>(
        &self,
        body: &str,
        paths: &[S],
    ) -> Result<ProjectedFields, AppError> {
        let document: Value = serde_json::from_str(body).map_err(|e| {
            warn!(
                "[RESPONSE] Body is not valid JSON ({} bytes): {}",
                body.len(),
                e
            );
            ProjectionError::InvalidBody {
                head: body.chars().take(self.config.head_limit).collect(),
            }
        })?;

        let mut fields: Vec<ExtractedField> = Vec::with_capacity(paths.len());
        for path in paths {
            let path = path.as_ref();
            if fields.iter().any(|f| f.path == path) {
                continue;
            }
            fields.push(ExtractedField {
                path: path.to_string(),
                value: self.resolve(&document, path).and_then(render),
            });
        }

        let projected = ProjectedFields { fields };
        debug!(
            "[RESPONSE] Projected {} paths, {} resolved",
            projected.len(),
            projected.resolved()
        );
        Ok(projected)
    }

    fn resolve<'v>(&self, document: &'v Value, path: &str) -> Option<&'v Value> {
        path.split(self.config.separator)
            .try_fold(document, |current, segment| match current {
                Value::Object(map) => map.get(segment),
                Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
                _ => None,
            })
    }
}

fn render(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}
