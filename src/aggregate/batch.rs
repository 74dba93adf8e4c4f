//! Batches of raw events with per-library attribution.

use indexmap::IndexMap;
use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::config::EVENTS_FIELD;
use crate::watcher::{RawEvent, WatchRegistry};

/// A batch that is still collecting events.
///
/// Only constructed from a first event, so it is never empty.
#[derive(Debug)]
pub struct OpenBatch {
    libraries: IndexMap<String, bool>,
    events: Vec<RawEvent>,
}

impl OpenBatch {
    /// Start a batch with every known library marked untouched.
    pub fn new(registry: &WatchRegistry, first: RawEvent) -> Self {
        let libraries = registry
            .libraries()
            .iter()
            .map(|library| (library.clone(), false))
            .collect();

        let mut batch = Self {
            libraries,
            events: Vec::new(),
        };
        batch.attribute(registry, first);
        batch
    }

    /// Append an event and flag every library it belongs to.
    ///
    /// Flags only ever go from `false` to `true`. Events matching no library
    /// are still recorded.
    pub fn attribute(&mut self, registry: &WatchRegistry, event: RawEvent) {
        for library in registry.libraries_for(&event.path) {
            if let Some(touched) = self.libraries.get_mut(library) {
                *touched = true;
            }
        }
        self.events.push(event);
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Stop collecting; the result is immutable.
    pub fn close(self) -> Batch {
        Batch {
            libraries: self.libraries,
            events: self.events,
        }
    }
}

/// A closed batch, ready to publish.
///
/// Serializes as one object: a boolean per library in configuration
/// order, then `events`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    libraries: IndexMap<String, bool>,
    events: Vec<RawEvent>,
}

impl Batch {
    pub fn events(&self) -> &[RawEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Whether `library` was touched. Unknown libraries are never touched.
    pub fn is_touched(&self, library: &str) -> bool {
        self.libraries.get(library).copied().unwrap_or(false)
    }

    /// Library flags in configuration order.
    pub fn libraries(&self) -> impl Iterator<Item = (&str, bool)> {
        self.libraries
            .iter()
            .map(|(library, touched)| (library.as_str(), *touched))
    }

    /// Names of touched libraries.
    pub fn touched(&self) -> impl Iterator<Item = &str> {
        self.libraries()
            .filter(|(_, touched)| *touched)
            .map(|(library, _)| library)
    }

    /// JSON wire payload.
    pub fn to_payload(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

impl Serialize for Batch {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.libraries.len() + 1))?;
        for (library, touched) in &self.libraries {
            map.serialize_entry(library, touched)?;
        }
        map.serialize_entry(EVENTS_FIELD, &self.events)?;
        map.end()
    }
}
