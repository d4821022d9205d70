//! Observable guard events
//!
//! Event names are stable upper-case identifiers.

use std::fmt;

use super::logger::Severity;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Request lifecycle
    /// Candidate document received
    PlanReceived,
    /// Candidate normalized into a plan
    PlanNormalized,
    /// A join stage was repaired
    JoinRepaired,
    /// Rule template produced the plan
    TemplateMatched,
    /// Natural-language input rejected before matching
    InputRejected,

    // Rejections
    /// Schema validation rejected the plan
    SchemaRejected,
    /// Permission validation rejected the plan
    PolicyDenied,
    /// Safety validation rejected the plan
    SafetyViolation,

    // Execution
    /// Plan executed
    PlanExecuted,
    /// Document store failed while executing
    ExecutionFailed,
    /// Enrichment failed, unenriched results returned
    EnrichmentFailed,

    // Schema cache
    /// Collection sampled for its schema
    SchemaSampled,
    /// Sampling failed, empty schema used
    SchemaSampleFailed,
    /// Cache dropped for a database switch
    SchemaCacheInvalidated,
    /// Cache filled eagerly
    SchemaPreloaded,
}

impl Event {
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::PlanReceived => "PLAN_RECEIVED",
            Event::PlanNormalized => "PLAN_NORMALIZED",
            Event::JoinRepaired => "JOIN_REPAIRED",
            Event::TemplateMatched => "TEMPLATE_MATCHED",
            Event::InputRejected => "INPUT_REJECTED",
            Event::SchemaRejected => "SCHEMA_REJECTED",
            Event::PolicyDenied => "POLICY_DENIED",
            Event::SafetyViolation => "SAFETY_VIOLATION",
            Event::PlanExecuted => "PLAN_EXECUTED",
            Event::ExecutionFailed => "EXECUTION_FAILED",
            Event::EnrichmentFailed => "ENRICHMENT_FAILED",
            Event::SchemaSampled => "SCHEMA_SAMPLED",
            Event::SchemaSampleFailed => "SCHEMA_SAMPLE_FAILED",
            Event::SchemaCacheInvalidated => "SCHEMA_CACHE_INVALIDATED",
            Event::SchemaPreloaded => "SCHEMA_PRELOADED",
        }
    }

    /// Security-relevant events are always written at ERROR
    pub fn is_security(&self) -> bool {
        matches!(self, Event::SafetyViolation)
    }

    pub fn severity(&self) -> Severity {
        match self {
            Event::SafetyViolation | Event::ExecutionFailed => Severity::Error,
            Event::SchemaRejected
            | Event::PolicyDenied
            | Event::InputRejected
            | Event::EnrichmentFailed
            | Event::SchemaSampleFailed => Severity::Warn,
            Event::PlanNormalized | Event::JoinRepaired | Event::SchemaSampled => Severity::Trace,
            _ => Severity::Info,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
