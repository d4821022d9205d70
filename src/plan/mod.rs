//! Query plan model
//!
//! A `QueryPlan` is the unit flowing through the guard pipeline. It is built
//! leniently from an untrusted candidate document, mutated only during
//! normalization, and frozen once every validator has accepted it.
//!
//! Wire shape:
//!
//! ```text
//! { collection, operation: "find" | "aggregate", query?, pipeline?,
//!   projection?, sort?, limit? }
//! ```

mod errors;
pub mod paths;
mod types;

pub use errors::{PlanError, PlanResult};
pub use types::{Operation, QueryPlan};
pub(crate) use types::{read_limit, read_projection, read_sort, value_kind};
