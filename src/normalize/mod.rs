//! Candidate plan normalization
//!
//! `AliasNormalizer` repairs structural mistakes and rewrites field
//! synonyms; `JoinRepair` corrects joins along known relationships. Both
//! are pure transformations over the plan document and never reject.

mod join;
mod normalizer;
mod rename;

pub use join::JoinRepair;
pub use normalizer::AliasNormalizer;
