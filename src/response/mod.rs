//! Response body projection.

mod projector;

pub use projector::{ExtractedField, ProjectedFields, ResponseProjector};
