//! Safety enforcement
//!
//! The plan-level denylist is authoritative regardless of policy. Text
//! screening applies to natural-language input before template matching.

mod natural;
mod validator;

pub use natural::{sanitize_query, validate_natural_query, InputError};
pub use validator::{SafetyValidator, DENYLIST};
