//! Runtime-discovered schemas
//!
//! There is no declared schema. A collection's shape is inferred by sampling
//! a few documents, cached per database, and used to check that a plan only
//! names fields that exist.

mod cache;
mod inference;
mod types;
mod validator;

pub use cache::SchemaCache;
pub use inference::infer_schema;
pub use types::{FieldType, SchemaDescriptor, TypedField};
pub use validator::SchemaValidator;
