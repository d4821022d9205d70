//! Observability for the guard pipeline
//!
//! Structured JSON log lines with typed events. Logging never influences
//! pipeline decisions.
//!
//! ```ignore
//! use mqlguard::observability::{Event, Logger};
//!
//! Logger::event(Event::PlanExecuted, &[("collection", "orders"), ("rows", "42")]);
//! ```

mod events;
mod logger;

pub use events::Event;
pub use logger::{Logger, Severity};
