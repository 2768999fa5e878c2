//! Mapping from fully-qualified signal names to signal ids.
//!
//! Campaign documents reference signals by name; the decoder manifest is
//! the authority for name → id assignment. The map is supplied alongside
//! each campaign push.

use std::collections::HashMap;

use vetra_core::SignalId;

/// Name → id lookup for campaign ingestion.
#[derive(Debug, Clone, Default)]
pub struct SignalNameMap {
    map: HashMap<String, SignalId>,
}

impl SignalNameMap {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a name → id mapping, replacing any previous entry.
    pub fn insert(&mut self, name: impl Into<String>, id: SignalId) {
        self.map.insert(name.into(), id);
    }

    /// Resolves a fully-qualified signal name.
    #[must_use]
    pub fn resolve(&self, name: &str) -> Option<SignalId> {
        self.map.get(name).copied()
    }

    /// Number of known names.
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Returns `true` when no name is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl FromIterator<(String, SignalId)> for SignalNameMap {
    fn from_iter<T: IntoIterator<Item = (String, SignalId)>>(iter: T) -> Self {
        Self {
            map: iter.into_iter().collect(),
        }
    }
}
