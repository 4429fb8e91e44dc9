//! Event log collected while resolving policy and applying actions
//!
//! Every resolution node and every action gets its own [`EventLog`]. Logs are
//! appended into a shared log once the unit of work is done, so entries of a
//! single unit stay contiguous.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Severity of an event entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSeverity {
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for EventSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventSeverity::Debug => write!(f, "debug"),
            EventSeverity::Info => write!(f, "info"),
            EventSeverity::Warn => write!(f, "warn"),
            EventSeverity::Error => write!(f, "error"),
        }
    }
}

/// A single event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEntry {
    /// When the event happened
    pub timestamp: DateTime<Utc>,

    pub severity: EventSeverity,

    pub message: String,

    /// Structured context (claim id, component key, action name, ...)
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
}

/// Ordered list of events for one unit of work
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventLog {
    /// Scope the log was opened for, e.g. `resolve` or an action name
    pub scope: String,

    /// Objects this log is attached to (claim ids, component keys)
    #[serde(default)]
    pub attached_to: Vec<String>,

    entries: Vec<EventEntry>,

    /// Forward entries to `tracing` as they are recorded
    #[serde(skip)]
    forward: bool,
}

impl EventLog {
    /// Creates a log that also forwards every entry to `tracing`
    pub fn new(scope: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            attached_to: Vec::new(),
            entries: Vec::new(),
            forward: true,
        }
    }

    /// Creates a log that only records entries
    pub fn silent(scope: impl Into<String>) -> Self {
        Self {
            forward: false,
            ..Self::new(scope)
        }
    }

    /// Marks the log as related to an object
    pub fn attach_to(&mut self, object: impl Into<String>) {
        let object = object.into();
        if !self.attached_to.contains(&object) {
            self.attached_to.push(object);
        }
    }

    pub fn debug(&mut self, message: impl Into<String>) {
        self.record(EventSeverity::Debug, message.into(), BTreeMap::new());
    }

    pub fn info(&mut self, message: impl Into<String>) {
        self.record(EventSeverity::Info, message.into(), BTreeMap::new());
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.record(EventSeverity::Warn, message.into(), BTreeMap::new());
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.record(EventSeverity::Error, message.into(), BTreeMap::new());
    }

    /// Records an entry with structured fields
    pub fn with_fields<'a>(
        &mut self,
        severity: EventSeverity,
        message: impl Into<String>,
        fields: impl IntoIterator<Item = (&'a str, String)>,
    ) {
        let fields = fields
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        self.record(severity, message.into(), fields);
    }

    fn record(&mut self, severity: EventSeverity, message: String, fields: BTreeMap<String, String>) {
        if self.forward {
            let scope = self.scope.as_str();
            match severity {
                EventSeverity::Debug => tracing::debug!(scope, ?fields, "{}", message),
                EventSeverity::Info => tracing::info!(scope, ?fields, "{}", message),
                EventSeverity::Warn => tracing::warn!(scope, ?fields, "{}", message),
                EventSeverity::Error => tracing::error!(scope, ?fields, "{}", message),
            }
        }
        self.entries.push(EventEntry {
            timestamp: Utc::now(),
            severity,
            message,
            fields,
        });
    }

    /// Moves all entries of another log to the end of this one
    pub fn append(&mut self, mut other: EventLog) {
        for object in other.attached_to.drain(..) {
            self.attach_to(object);
        }
        self.entries.append(&mut other.entries);
    }

    pub fn entries(&self) -> &[EventEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of entries at or above a severity
    pub fn count_at_least(&self, severity: EventSeverity) -> usize {
        self.entries.iter().filter(|e| e.severity >= severity).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_append() {
        let mut shared = EventLog::silent("apply");
        let mut action = EventLog::silent("action-component-create#x");
        action.attach_to("x");
        action.info("creating");
        action.with_fields(
            EventSeverity::Error,
            "plugin failed",
            [("component", "x".to_string())],
        );

        shared.append(action);

        assert_eq!(shared.len(), 2);
        assert_eq!(shared.attached_to, vec!["x"]);
        assert_eq!(shared.entries()[1].fields["component"], "x");
        assert_eq!(shared.count_at_least(EventSeverity::Warn), 1);
    }

    #[test]
    fn test_attach_is_deduplicated() {
        let mut log = EventLog::silent("resolve");
        log.attach_to("main/claim");
        log.attach_to("main/claim");
        assert_eq!(log.attached_to.len(), 1);
    }
}
