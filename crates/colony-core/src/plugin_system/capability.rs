//! # Capability and Event Hierarchy
//!
//! Capabilities and event names are dot-separated paths (`"storage.sql.mysql"`,
//! `"plugin_manager.plugin.load_plugin"`). This module holds the pure value
//! logic used to match them against each other.
//!
//! Two relations matter:
//!
//! - **Capability matching**: a request for `"storage"` is satisfied by a
//!   provider of `"storage.sql.mysql"` (the candidate extends the request).
//! - **Event matching**: a handler registered for `"plugin_manager"` receives
//!   `"plugin_manager.plugin.load_plugin"` (the pattern is an ancestor of, or
//!   equal to, the fired name). This is the mirror of capability matching.
//!
//! An empty path never matches anything.
use std::fmt;

/// A capability or event name split into its path segments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct CapabilityPath {
    segments: Vec<String>,
}

impl CapabilityPath {
    /// Parse a dotted path. The empty string yields the empty path.
    pub fn parse(value: &str) -> Self {
        if value.is_empty() {
            return Self::default();
        }
        Self {
            segments: value.split('.').map(str::to_string).collect(),
        }
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Segment-wise equality. Empty paths are never equal to anything.
    pub fn equals(&self, other: &CapabilityPath) -> bool {
        !self.is_empty() && self.segments == other.segments
    }

    /// True iff `self` is a strict prefix of `other`.
    pub fn is_ancestor_of(&self, other: &CapabilityPath) -> bool {
        !self.is_empty()
            && self.len() < other.len()
            && self.segments.iter().zip(other.segments.iter()).all(|(a, b)| a == b)
    }

    /// `[p0, p0.p1, ..., path]`
    pub fn path_and_ancestors(&self) -> Vec<String> {
        (1..=self.segments.len())
            .map(|end| self.segments[..end].join("."))
            .collect()
    }
}

impl fmt::Display for CapabilityPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.segments.join("."))
    }
}

impl From<&str> for CapabilityPath {
    fn from(value: &str) -> Self {
        CapabilityPath::parse(value)
    }
}

pub fn equals(a: &str, b: &str) -> bool {
    CapabilityPath::parse(a).equals(&CapabilityPath::parse(b))
}

pub fn is_ancestor(a: &str, b: &str) -> bool {
    CapabilityPath::parse(a).is_ancestor_of(&CapabilityPath::parse(b))
}

/// True iff `candidate` equals `requested` or descends from it.
pub fn is_capability_or_sub_capability(requested: &str, candidate: &str) -> bool {
    let requested = CapabilityPath::parse(requested);
    let candidate = CapabilityPath::parse(candidate);
    requested.equals(&candidate) || requested.is_ancestor_of(&candidate)
}

/// True iff a handler registered for `pattern` must receive the event `event_name`.
pub fn is_event_handled(pattern: &str, event_name: &str) -> bool {
    let pattern = CapabilityPath::parse(pattern);
    let event = CapabilityPath::parse(event_name);
    pattern.equals(&event) || pattern.is_ancestor_of(&event)
}

/// Every prefix level of `path`, shortest first. Used to populate the capability index.
pub fn path_and_ancestors(path: &str) -> Vec<String> {
    CapabilityPath::parse(path).path_and_ancestors()
}
