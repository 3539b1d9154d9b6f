// mcp-protocol/src/types/capability.rs
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// One node of the capability tree a server declares during the handshake
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Capability {
    Flag(bool),
    Group(BTreeMap<String, Capability>),
    List(Vec<Value>),
    /// Strings, numbers and nulls; never counted as support
    Other(Value),
}

impl Capability {
    /// Whether this node, taken as the last segment of a path, means "supported"
    fn is_supported(&self) -> bool {
        match self {
            Capability::Flag(flag) => *flag,
            Capability::Group(group) => !group.is_empty(),
            Capability::List(items) => !items.is_empty(),
            Capability::Other(_) => false,
        }
    }
}

impl From<&Value> for Capability {
    fn from(value: &Value) -> Self {
        match value {
            Value::Bool(flag) => Capability::Flag(*flag),
            Value::Object(map) => Capability::Group(group_from(map)),
            Value::Array(items) => Capability::List(items.clone()),
            other => Capability::Other(other.clone()),
        }
    }
}

fn group_from(map: &Map<String, Value>) -> BTreeMap<String, Capability> {
    map.iter()
        .map(|(key, value)| (key.clone(), Capability::from(value)))
        .collect()
}

/// Why a capability path was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapabilityFailure {
    /// The key is absent
    Missing,
    /// The key is explicitly `false`
    Disabled,
    /// An intermediate key holds something other than a nested group
    NotAGroup,
    /// The final key holds a value that does not mean support
    Unsupported,
    EmptyPath,
}

impl fmt::Display for CapabilityFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            CapabilityFailure::Missing => "is not declared by the server",
            CapabilityFailure::Disabled => "is disabled by the server",
            CapabilityFailure::NotAGroup => "is not a capability group",
            CapabilityFailure::Unsupported => "has no supported value",
            CapabilityFailure::EmptyPath => "is empty",
        };
        f.write_str(text)
    }
}

/// A capability lookup failed at `path` (the keys traversed so far, dot-joined)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("capability '{path}' {reason}")]
pub struct CapabilityError {
    pub path: String,
    pub reason: CapabilityFailure,
}

/// The server's capability tree: feature area -> feature -> flag or nested group
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ServerCapabilities(BTreeMap<String, Capability>);

impl ServerCapabilities {
    pub fn from_object(map: &Map<String, Value>) -> Self {
        Self(group_from(map))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Check that the capability at `path` is supported.
    ///
    /// Every intermediate key must name a nested group. The last key must be
    /// `true`, a non-empty group, or a non-empty list.
    pub fn ensure(&self, path: &[&str]) -> Result<(), CapabilityError> {
        if path.is_empty() {
            return Err(CapabilityError {
                path: String::new(),
                reason: CapabilityFailure::EmptyPath,
            });
        }
        walk(&self.0, path, 0)
    }
}

fn walk(
    group: &BTreeMap<String, Capability>,
    path: &[&str],
    depth: usize,
) -> Result<(), CapabilityError> {
    let fail = |reason| CapabilityError {
        path: path[..=depth].join("."),
        reason,
    };

    let node = group
        .get(path[depth])
        .ok_or_else(|| fail(CapabilityFailure::Missing))?;

    if depth + 1 == path.len() {
        return match node {
            Capability::Flag(false) => Err(fail(CapabilityFailure::Disabled)),
            node if node.is_supported() => Ok(()),
            _ => Err(fail(CapabilityFailure::Unsupported)),
        };
    }

    match node {
        Capability::Group(inner) => walk(inner, path, depth + 1),
        Capability::Flag(false) => Err(fail(CapabilityFailure::Disabled)),
        _ => Err(fail(CapabilityFailure::NotAGroup)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn caps(value: Value) -> ServerCapabilities {
        match value {
            Value::Object(map) => ServerCapabilities::from_object(&map),
            _ => panic!("capability tree must be an object"),
        }
    }

    fn failure(tree: Value, path: &[&str]) -> CapabilityError {
        caps(tree).ensure(path).unwrap_err()
    }

    #[test]
    fn lookup_table() {
        let err = failure(json!({}), &["a", "b"]);
        assert_eq!((err.path.as_str(), err.reason), ("a", CapabilityFailure::Missing));

        let err = failure(json!({"a": {}}), &["a", "b"]);
        assert_eq!((err.path.as_str(), err.reason), ("a.b", CapabilityFailure::Missing));

        let err = failure(json!({"a": {"b": false}}), &["a", "b"]);
        assert_eq!((err.path.as_str(), err.reason), ("a.b", CapabilityFailure::Disabled));

        let err = failure(json!({"a": {"b": {}}}), &["a", "b"]);
        assert_eq!((err.path.as_str(), err.reason), ("a.b", CapabilityFailure::Unsupported));

        assert!(caps(json!({"a": {"b": true}})).ensure(&["a", "b"]).is_ok());
    }

    #[test]
    fn non_empty_groups_and_lists_count_as_support() {
        let tree = caps(json!({"a": {"b": {"deep": true}, "c": ["x"], "d": [], "e": "yes"}}));
        assert!(tree.ensure(&["a", "b"]).is_ok());
        assert!(tree.ensure(&["a", "c"]).is_ok());
        assert_eq!(tree.ensure(&["a", "d"]).unwrap_err().reason, CapabilityFailure::Unsupported);
        assert_eq!(tree.ensure(&["a", "e"]).unwrap_err().reason, CapabilityFailure::Unsupported);
        assert!(tree.ensure(&["a", "b", "deep"]).is_ok());
    }

    #[test]
    fn intermediate_keys_must_be_groups() {
        let tree = caps(json!({"a": true, "off": false}));
        let err = tree.ensure(&["a", "b"]).unwrap_err();
        assert_eq!((err.path.as_str(), err.reason), ("a", CapabilityFailure::NotAGroup));
        let err = tree.ensure(&["off", "b"]).unwrap_err();
        assert_eq!((err.path.as_str(), err.reason), ("off", CapabilityFailure::Disabled));
    }

    #[test]
    fn empty_path_is_rejected() {
        let err = caps(json!({"a": true})).ensure(&[]).unwrap_err();
        assert_eq!(err.reason, CapabilityFailure::EmptyPath);
    }

    #[test]
    fn error_message_names_the_path() {
        let err = failure(json!({"search": {}}), &["search", "entities"]);
        assert_eq!(err.to_string(), "capability 'search.entities' is not declared by the server");
    }

    #[test]
    fn round_trips_to_json() {
        let tree = json!({"a": {"b": true, "c": [1]}, "d": null});
        assert_eq!(caps(tree.clone()).to_value(), tree);
    }
}
