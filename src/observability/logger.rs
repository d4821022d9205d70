//! Structured JSON logger
//!
//! One JSON object per line: `event`, then `severity`, then the fields in
//! key order. Writes are synchronous. ERROR lines go to stderr, the rest
//! to stdout.

use std::fmt;
use std::io::{self, Write};

use serde_json::{Map, Value};

use super::events::Event;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// Per-step detail
    Trace = 0,
    Info = 1,
    /// Rejections and degraded results
    Warn = 2,
    /// Security-relevant rejections and execution failures
    Error = 3,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Trace => "TRACE",
            Severity::Info => "INFO",
            Severity::Warn => "WARN",
            Severity::Error => "ERROR",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

pub struct Logger;

impl Logger {
    /// Log a typed event at its own severity
    pub fn event(event: Event, fields: &[(&str, &str)]) {
        Self::log(event.severity(), event.as_str(), fields);
    }

    pub fn log(severity: Severity, event: &str, fields: &[(&str, &str)]) {
        let line = render(severity, event, fields);
        if severity >= Severity::Error {
            write_line(&mut io::stderr().lock(), &line);
        } else {
            write_line(&mut io::stdout().lock(), &line);
        }
    }
}

/// One log line, newline included
fn render(severity: Severity, event: &str, fields: &[(&str, &str)]) -> String {
    let mut sorted: Vec<&(&str, &str)> = fields.iter().collect();
    sorted.sort_by_key(|(key, _)| *key);

    let mut object = Map::with_capacity(fields.len() + 2);
    object.insert("event".into(), Value::from(event));
    object.insert("severity".into(), Value::from(severity.as_str()));
    for (key, value) in sorted {
        if key == &"event" || key == &"severity" {
            continue;
        }
        object.insert((*key).to_string(), Value::from(*value));
    }

    let mut line = Value::Object(object).to_string();
    line.push('\n');
    line
}

fn write_line<W: Write>(writer: &mut W, line: &str) {
    // Logging never fails a request.
    let _ = writer.write_all(line.as_bytes());
    let _ = writer.flush();
}
