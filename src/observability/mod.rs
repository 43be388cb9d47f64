//! Observability: structured logs, typed events and counters
//!
//! Observability never changes engine behavior. Log writes that fail are
//! dropped; counters are plain atomics.
//!
//! ```ignore
//! use ariadb::observability::{log_event_with_fields, Event};
//!
//! log_event_with_fields(Event::LogRotate, &[("file_no", "3")]);
//! ```

mod events;
mod logger;
mod metrics;

pub use events::Event;
pub use logger::{Logger, Severity};
pub use metrics::{MetricsRegistry, MetricsSnapshot};

fn severity_for(event: Event) -> Severity {
    if event.is_fatal() {
        Severity::Fatal
    } else if event.is_warning() {
        Severity::Warn
    } else {
        Severity::Info
    }
}

/// Log a lifecycle event
pub fn log_event(event: Event) {
    Logger::log(severity_for(event), event.as_str(), &[]);
}

/// Log a lifecycle event with fields
pub fn log_event_with_fields(event: Event, fields: &[(&str, &str)]) {
    Logger::log(severity_for(event), event.as_str(), fields);
}

/// Log an error that crossed an operation boundary
///
/// `component` names the subsystem, `code` the stable error code.
pub fn log_error(component: &str, code: &str, message: &str, fields: &[(&str, &str)]) {
    let mut all: Vec<(&str, &str)> = Vec::with_capacity(fields.len() + 3);
    all.push(("component", component));
    all.push(("code", code));
    all.push(("message", message));
    all.extend_from_slice(fields);
    Logger::log(Severity::Error, "OPERATION_FAILED", &all);
}
