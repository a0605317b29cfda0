//! Canopy Event Log - buffered, structured event stream
//!
//! Every engine invocation (resolve, apply) carries an [`EventLog`] handle.
//! Entries are buffered so callers can inspect or persist what happened
//! during the invocation, and mirrored to `tracing` so operators see them
//! live. Log output is not part of any API contract.

#![deny(unsafe_code)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Unordered field bag attached to an event entry; values are JSON, so
/// entries embed structured data, not just strings.
pub type Fields = BTreeMap<String, serde_json::Value>;

/// Severity of an event entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Debug => write!(f, "debug"),
            Severity::Info => write!(f, "info"),
            Severity::Warn => write!(f, "warn"),
            Severity::Error => write!(f, "error"),
        }
    }
}

/// A single buffered event entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEntry {
    /// Unique entry id
    pub id: Uuid,

    /// Entry timestamp
    pub timestamp: DateTime<Utc>,

    /// Severity level
    pub severity: Severity,

    /// Human-readable message
    pub message: String,

    /// Structured fields
    pub fields: Fields,
}

/// Buffered event log handle.
///
/// Cheap to clone; all clones share the same buffer. Safe to write from
/// concurrent tasks.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    entries: Arc<Mutex<Vec<EventEntry>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry at the given severity.
    pub fn log(&self, severity: Severity, fields: Fields, message: impl Into<String>) {
        let message = message.into();
        match severity {
            Severity::Debug => tracing::debug!(fields = ?fields, "{}", message),
            Severity::Info => tracing::info!(fields = ?fields, "{}", message),
            Severity::Warn => tracing::warn!(fields = ?fields, "{}", message),
            Severity::Error => tracing::error!(fields = ?fields, "{}", message),
        }

        let entry = EventEntry {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            severity,
            message,
            fields,
        };
        self.entries
            .lock()
            .expect("event log buffer poisoned")
            .push(entry);
    }

    pub fn debug(&self, fields: Fields, message: impl Into<String>) {
        self.log(Severity::Debug, fields, message);
    }

    pub fn info(&self, fields: Fields, message: impl Into<String>) {
        self.log(Severity::Info, fields, message);
    }

    pub fn warn(&self, fields: Fields, message: impl Into<String>) {
        self.log(Severity::Warn, fields, message);
    }

    pub fn error(&self, fields: Fields, message: impl Into<String>) {
        self.log(Severity::Error, fields, message);
    }

    /// Snapshot of all buffered entries.
    pub fn entries(&self) -> Vec<EventEntry> {
        self.entries
            .lock()
            .expect("event log buffer poisoned")
            .clone()
    }

    /// Drain the buffer, returning all entries accumulated so far.
    pub fn drain(&self) -> Vec<EventEntry> {
        std::mem::take(&mut *self.entries.lock().expect("event log buffer poisoned"))
    }

    /// Number of entries at or above the given severity.
    pub fn count_at_or_above(&self, severity: Severity) -> usize {
        self.entries
            .lock()
            .expect("event log buffer poisoned")
            .iter()
            .filter(|e| e.severity >= severity)
            .count()
    }
}

/// Convenience constructor for a field bag.
pub fn fields<I, K, V>(pairs: I) -> Fields
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<serde_json::Value>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}
