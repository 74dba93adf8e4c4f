//! Raw filesystem change events.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use notify::EventKind;
use notify::event::ModifyKind;
use serde::Serialize;

/// Kind of change reported for a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operation {
    Create,
    Write,
    Remove,
    Rename,
    Chmod,
    Other,
}

impl Operation {
    /// Map a notify event kind to an operation.
    ///
    /// Returns `None` for access events, which never describe a change.
    pub fn from_kind(kind: &EventKind) -> Option<Self> {
        match kind {
            EventKind::Access(_) => None,
            EventKind::Create(_) => Some(Operation::Create),
            EventKind::Modify(ModifyKind::Name(_)) => Some(Operation::Rename),
            EventKind::Modify(ModifyKind::Metadata(_)) => Some(Operation::Chmod),
            EventKind::Modify(_) => Some(Operation::Write),
            EventKind::Remove(_) => Some(Operation::Remove),
            EventKind::Any | EventKind::Other => Some(Operation::Other),
        }
    }
}

/// A single change to a single path, as observed by the watcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RawEvent {
    pub path: PathBuf,
    #[serde(rename = "op")]
    pub operation: Operation,
    pub observed_at: DateTime<Utc>,
}

impl RawEvent {
    /// Create an event observed now.
    pub fn new(path: impl Into<PathBuf>, operation: Operation) -> Self {
        Self {
            path: path.into(),
            operation,
            observed_at: Utc::now(),
        }
    }

    /// Split a notify event into one raw event per path, preserving order.
    pub fn from_notify(event: notify::Event) -> Vec<RawEvent> {
        let Some(operation) = Operation::from_kind(&event.kind) else {
            return Vec::new();
        };
        let observed_at = Utc::now();

        event
            .paths
            .into_iter()
            .map(|path| RawEvent {
                path,
                operation,
                observed_at,
            })
            .collect()
    }
}
