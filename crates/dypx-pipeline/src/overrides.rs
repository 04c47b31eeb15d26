//! Caller parameter overrides applied to a resolved template.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::template::NodeSpec;

/// Parameter values keyed by parameter name.
pub type ParamUpdates = BTreeMap<String, Value>;

/// Overrides keyed by a node-title substring.
///
/// Entries keep insertion order; when two entries hit the same parameter of
/// the same node the later one wins. The serialized form is a nested map
/// whose key order is the entry order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OverrideMap {
    entries: Vec<(String, ParamUpdates)>,
}

impl OverrideMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set one parameter for nodes whose title contains `title`.
    pub fn set(&mut self, title: impl Into<String>, name: impl Into<String>, value: impl Into<Value>) {
        let title = title.into();
        let idx = match self.entries.iter().position(|(t, _)| *t == title) {
            Some(idx) => idx,
            None => {
                self.entries.push((title, ParamUpdates::new()));
                self.entries.len() - 1
            }
        };
        self.entries[idx].1.insert(name.into(), value.into());
    }

    /// Builder form of [`OverrideMap::set`].
    pub fn with(mut self, title: impl Into<String>, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(title, name, value);
        self
    }

    /// Updates registered for exactly `title`.
    pub fn get(&self, title: &str) -> Option<&ParamUpdates> {
        self.entries.iter().find(|(t, _)| t == title).map(|(_, u)| u)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamUpdates)> {
        self.entries.iter().map(|(t, u)| (t.as_str(), u))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Serialize for OverrideMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (title, updates) in &self.entries {
            map.serialize_entry(title, updates)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for OverrideMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(OverrideMapVisitor)
    }
}

/// Reads title entries in document order.
struct OverrideMapVisitor;

impl<'de> Visitor<'de> for OverrideMapVisitor {
    type Value = OverrideMap;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a map of node-title substrings to parameter updates")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<OverrideMap, A::Error> {
        let mut map = OverrideMap::new();
        while let Some((title, updates)) = access.next_entry::<String, ParamUpdates>()? {
            for (name, value) in updates {
                map.set(title.clone(), name, value);
            }
            if map.get(&title).is_none() {
                map.entries.push((title, ParamUpdates::new()));
            }
        }
        Ok(map)
    }
}

/// Write `overrides` into copies of `nodes`.
///
/// A title substring (case-sensitive) updates every node containing it.
/// Substrings that match no node and parameter names a node lacks are
/// ignored.
pub fn apply(nodes: &[NodeSpec], overrides: &OverrideMap) -> Vec<NodeSpec> {
    let mut nodes = nodes.to_vec();
    for (title, updates) in overrides.iter() {
        for node in nodes.iter_mut().filter(|n| n.title.contains(title)) {
            for param in node.parameter_defaults.iter_mut() {
                if let Some(value) = updates.get(&param.name) {
                    param.default = value.clone();
                }
            }
        }
    }
    nodes
}
