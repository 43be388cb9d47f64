//! Structured JSON logger
//!
//! One log line is one JSON object. `event` and `severity` always come
//! first, the remaining fields follow in key order so two runs over the
//! same inputs print byte-identical lines.

use std::fmt;
use std::io::{self, Write};
use std::sync::atomic::{AtomicU8, Ordering};

use serde_json::{Map, Value};

/// Log severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// Debug-level detail
    Trace = 0,
    /// Normal operations
    Info = 1,
    /// Recoverable issues
    Warn = 2,
    /// Operation failures
    Error = 3,
    /// Unrecoverable, the engine refuses to continue
    Fatal = 4,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Trace => "TRACE",
            Severity::Info => "INFO",
            Severity::Warn => "WARN",
            Severity::Error => "ERROR",
            Severity::Fatal => "FATAL",
        }
    }

    fn from_u8(value: u8) -> Severity {
        match value {
            0 => Severity::Trace,
            1 => Severity::Info,
            2 => Severity::Warn,
            3 => Severity::Error,
            _ => Severity::Fatal,
        }
    }

    fn parse(text: &str) -> Option<Severity> {
        match text.to_ascii_lowercase().as_str() {
            "trace" => Some(Severity::Trace),
            "info" => Some(Severity::Info),
            "warn" => Some(Severity::Warn),
            "error" => Some(Severity::Error),
            "fatal" => Some(Severity::Fatal),
            _ => None,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

const UNSET: u8 = u8::MAX;

static MIN_SEVERITY: AtomicU8 = AtomicU8::new(UNSET);

/// Structured logger writing JSON lines
pub struct Logger;

impl Logger {
    /// Lines below this severity are dropped.
    ///
    /// Defaults to `Info`, or to the level named by `ARIADB_LOG`.
    pub fn min_severity() -> Severity {
        let current = MIN_SEVERITY.load(Ordering::Relaxed);
        if current != UNSET {
            return Severity::from_u8(current);
        }
        let level = std::env::var("ARIADB_LOG")
            .ok()
            .and_then(|v| Severity::parse(&v))
            .unwrap_or(Severity::Info);
        MIN_SEVERITY.store(level as u8, Ordering::Relaxed);
        level
    }

    pub fn set_min_severity(severity: Severity) {
        MIN_SEVERITY.store(severity as u8, Ordering::Relaxed);
    }

    /// Log an event; WARN and below go to stdout, ERROR and FATAL to stderr
    pub fn log(severity: Severity, event: &str, fields: &[(&str, &str)]) {
        if severity < Self::min_severity() {
            return;
        }
        if severity >= Severity::Error {
            Self::log_to_writer(severity, event, fields, &mut io::stderr());
        } else {
            Self::log_to_writer(severity, event, fields, &mut io::stdout());
        }
    }

    fn log_to_writer<W: Write>(
        severity: Severity,
        event: &str,
        fields: &[(&str, &str)],
        writer: &mut W,
    ) {
        let line = Self::format_line(severity, event, fields);
        let _ = writer.write_all(line.as_bytes());
        let _ = writer.flush();
    }

    fn format_line(severity: Severity, event: &str, fields: &[(&str, &str)]) -> String {
        let mut sorted: Vec<_> = fields.iter().collect();
        sorted.sort_by_key(|(k, _)| *k);

        // serde_json::Map keeps insertion order only with preserve_order, so
        // the head keys are written by hand and the rest appended in order.
        let mut output = String::with_capacity(128);
        output.push_str("{\"event\":");
        output.push_str(&Value::String(event.to_string()).to_string());
        output.push_str(",\"severity\":\"");
        output.push_str(severity.as_str());
        output.push('"');

        let mut rest = Map::new();
        for (key, value) in sorted {
            if *key == "event" || *key == "severity" {
                continue;
            }
            rest.insert((*key).to_string(), Value::String((*value).to_string()));
        }
        for (key, value) in rest.iter() {
            output.push(',');
            output.push_str(&Value::String(key.clone()).to_string());
            output.push(':');
            output.push_str(&value.to_string());
        }
        output.push_str("}\n");
        output
    }

    pub fn trace(event: &str, fields: &[(&str, &str)]) {
        Self::log(Severity::Trace, event, fields);
    }

    pub fn info(event: &str, fields: &[(&str, &str)]) {
        Self::log(Severity::Info, event, fields);
    }

    pub fn warn(event: &str, fields: &[(&str, &str)]) {
        Self::log(Severity::Warn, event, fields);
    }

    pub fn error(event: &str, fields: &[(&str, &str)]) {
        Self::log(Severity::Error, event, fields);
    }

    pub fn fatal(event: &str, fields: &[(&str, &str)]) {
        Self::log(Severity::Fatal, event, fields);
    }
}

/// Capture a log line for testing
#[cfg(test)]
pub fn capture_log(severity: Severity, event: &str, fields: &[(&str, &str)]) -> String {
    let mut buffer = Vec::new();
    Logger::log_to_writer(severity, event, fields, &mut buffer);
    String::from_utf8(buffer).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_min_severity_can_be_raised() {
        let before = Logger::min_severity();
        Logger::set_min_severity(Severity::Error);
        assert_eq!(Logger::min_severity(), Severity::Error);
        Logger::set_min_severity(before);
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Trace < Severity::Info);
        assert!(Severity::Info < Severity::Warn);
        assert!(Severity::Warn < Severity::Error);
        assert!(Severity::Error < Severity::Fatal);
    }

    #[test]
    fn test_log_json_format() {
        let output = capture_log(Severity::Info, "TEST_EVENT", &[]);
        let parsed: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(parsed["event"], "TEST_EVENT");
        assert_eq!(parsed["severity"], "INFO");
    }

    #[test]
    fn test_log_fields_sorted_and_deterministic() {
        let a = capture_log(Severity::Warn, "T", &[("zebra", "1"), ("apple", "2"), ("lsn", "3")]);
        let b = capture_log(Severity::Warn, "T", &[("lsn", "3"), ("apple", "2"), ("zebra", "1")]);
        assert_eq!(a, b);
        let apple = a.find("apple").unwrap();
        let lsn = a.find("\"lsn\"").unwrap();
        let zebra = a.find("zebra").unwrap();
        assert!(apple < lsn && lsn < zebra);
    }

    #[test]
    fn test_log_escapes_special_chars() {
        let output = capture_log(Severity::Info, "T", &[("message", "bad \"page\"\nnext")]);
        let parsed: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(parsed["message"], "bad \"page\"\nnext");
    }

    #[test]
    fn test_log_one_line_event_first() {
        let output = capture_log(Severity::Error, "MY_EVENT", &[("a", "1"), ("b", "2")]);
        assert_eq!(output.matches('\n').count(), 1);
        assert!(output.find("\"event\"").unwrap() < output.find("\"severity\"").unwrap());
    }

    #[test]
    fn test_reserved_keys_not_duplicated() {
        let output = capture_log(Severity::Info, "E", &[("event", "other")]);
        assert_eq!(output.matches("\"event\"").count(), 1);
    }
}
