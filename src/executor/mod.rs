//! Plan execution
//!
//! The executor consumes only validated plans. Results come back as
//! transport JSON, enriched with display names of referenced documents.

mod coerce;
mod enrich;
mod errors;
mod executor;

pub use coerce::Coercer;
pub use errors::{ExecutorError, ExecutorResult};
pub use executor::QueryExecutor;
