//! Rule templates
//!
//! A fixed catalogue of common natural-language intents, each producing a
//! pipeline that is correct for the deployment by construction. Template
//! plans skip schema validation but still pass permission and safety
//! checks before execution.
//!
//! Also here: chart plans for visualization requests and collection
//! inference from free text.

mod catalogue;
mod engine;
mod inference;
mod visualization;

pub use engine::{RuleTemplateEngine, TemplateFields, TemplateMatch, TOO_COMPLEX_MARKERS};
pub use inference::infer_collection;
pub use visualization::{chart_title, ChartType, VisualizationPlan};
