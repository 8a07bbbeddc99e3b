//! Core data model shared by the tree, the targets and the datastore.
//!
//! A [`Path`] addresses a node as a sequence of [`PathElem`]s, each one a name
//! plus ordered list keys. [`Value`] is the tagged union stored at a node.
//! [`Notification`] is the batch exchanged with targets and the reconciliation loop.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One step of a [`Path`]: a node name plus optional list keys.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct PathElem {
    pub name: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub keys: BTreeMap<String, String>,
}

impl PathElem {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            keys: BTreeMap::new(),
        }
    }

    /// Add a list key to this element.
    pub fn with_key(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.keys.insert(key.into(), value.into());
        self
    }
}

impl fmt::Display for PathElem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        for (k, v) in &self.keys {
            write!(f, "[{}={}]", k, v)?;
        }
        Ok(())
    }
}

/// Ordered sequence of path elements. The empty path addresses the root.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Path {
    pub elems: Vec<PathElem>,
}

impl Path {
    pub fn new(elems: Vec<PathElem>) -> Self {
        Self { elems }
    }

    /// The root path.
    pub fn root() -> Self {
        Self::default()
    }

    pub fn is_root(&self) -> bool {
        self.elems.is_empty()
    }

    pub fn len(&self) -> usize {
        self.elems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elems.is_empty()
    }

    /// Concatenate `prefix` and `self`.
    pub fn with_prefix(&self, prefix: &Path) -> Self {
        let mut elems = Vec::with_capacity(prefix.len() + self.len());
        elems.extend(prefix.elems.iter().cloned());
        elems.extend(self.elems.iter().cloned());
        Self { elems }
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.elems.is_empty() {
            return write!(f, "/");
        }
        for elem in &self.elems {
            write!(f, "/{}", elem)?;
        }
        Ok(())
    }
}

/// Error returned when parsing the textual path form fails.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid path {path:?}: {reason}")]
pub struct PathParseError {
    pub path: String,
    pub reason: &'static str,
}

impl FromStr for Path {
    type Err = PathParseError;

    /// Parses `/a/b[k=v][k2=v2]/c`. Key values may contain `/` but not `]`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = |reason| PathParseError {
            path: s.to_string(),
            reason,
        };

        let mut elems = Vec::new();
        let mut rest = s.trim();
        if rest.is_empty() || rest == "/" {
            return Ok(Path::root());
        }
        if let Some(stripped) = rest.strip_prefix('/') {
            rest = stripped;
        }

        while !rest.is_empty() {
            let name_end = rest.find(['/', '[']).unwrap_or(rest.len());
            let name = &rest[..name_end];
            if name.is_empty() {
                return Err(err("empty element name"));
            }
            let mut elem = PathElem::new(name);
            rest = &rest[name_end..];

            while let Some(after) = rest.strip_prefix('[') {
                let close = after.find(']').ok_or_else(|| err("unterminated key"))?;
                let (key, value) = after[..close]
                    .split_once('=')
                    .ok_or_else(|| err("key without '='"))?;
                if key.is_empty() {
                    return Err(err("empty key name"));
                }
                elem.keys.insert(key.to_string(), value.to_string());
                rest = &after[close + 1..];
            }

            elems.push(elem);
            match rest.strip_prefix('/') {
                Some(stripped) => rest = stripped,
                None if rest.is_empty() => {}
                None => return Err(err("unexpected character after key")),
            }
        }

        Ok(Path { elems })
    }
}

/// Value stored at a tree node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    String(String),
    Int(i64),
    Uint(u64),
    Bool(bool),
    Bytes(Vec<u8>),
    Double(f64),
    /// Fixed-point decimal: `digits * 10^-precision`.
    Decimal { digits: i64, precision: u32 },
    /// Enumerated identity, kept by name.
    Enum(String),
    LeafList(Vec<Value>),
    /// Structured JSON (IETF encoded) payload.
    Json(serde_json::Value),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) | Value::Enum(s) => write!(f, "{}", s),
            Value::Int(v) => write!(f, "{}", v),
            Value::Uint(v) => write!(f, "{}", v),
            Value::Bool(v) => write!(f, "{}", v),
            Value::Bytes(v) => write!(f, "{} bytes", v.len()),
            Value::Double(v) => write!(f, "{}", v),
            Value::Decimal { digits, precision } => {
                write!(f, "{}e-{}", digits, precision)
            }
            Value::LeafList(vs) => {
                write!(f, "[")?;
                for (i, v) in vs.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", v)?;
                }
                write!(f, "]")
            }
            Value::Json(v) => write!(f, "{}", v),
        }
    }
}

/// A (path, value) pair: the unit of "update" and "replace".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Update {
    pub path: Path,
    pub value: Value,
}

impl Update {
    pub fn new(path: Path, value: Value) -> Self {
        Self { path, value }
    }
}

/// Timestamped batch of updates and deletes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// Nanoseconds since the Unix epoch, as reported by the producer.
    pub timestamp: i64,
    pub updates: Vec<Update>,
    pub deletes: Vec<Path>,
}

impl Notification {
    pub fn is_empty(&self) -> bool {
        self.updates.is_empty() && self.deletes.is_empty()
    }
}

/// One batch of changes pushed to a target: the pending lists of a candidate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SetRequest {
    pub deletes: Vec<Path>,
    pub replaces: Vec<Update>,
    pub updates: Vec<Update>,
}

impl SetRequest {
    pub fn is_empty(&self) -> bool {
        self.deletes.is_empty() && self.replaces.is_empty() && self.updates.is_empty()
    }
}

/// Operation a target reports for one path of a set request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Invalid,
    Delete,
    Replace,
    Update,
    UnionReplace,
}

/// Per-path result of a set request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateResult {
    pub path: Path,
    pub op: Operation,
}

/// Result of a set request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SetResponse {
    pub timestamp: i64,
    pub results: Vec<UpdateResult>,
}

/// Identity of the schema a datastore is bound to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SchemaId {
    pub name: String,
    pub vendor: String,
    pub version: String,
}

impl fmt::Display for SchemaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.vendor, self.name, self.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_simple_path() {
        let p: Path = "/a/b/c".parse().unwrap();
        assert_eq!(p.len(), 3);
        assert_eq!(p.elems[1].name, "b");
        assert!(p.elems[1].keys.is_empty());
    }

    #[test]
    fn parse_path_with_keys() {
        let p: Path = "/interface[name=ethernet-1/1]/subinterface[index=0][vlan=10]/mtu"
            .parse()
            .unwrap();
        assert_eq!(p.len(), 3);
        assert_eq!(p.elems[0].keys["name"], "ethernet-1/1");
        assert_eq!(p.elems[1].keys["index"], "0");
        assert_eq!(p.elems[1].keys["vlan"], "10");
        assert_eq!(p.elems[2].name, "mtu");
    }

    #[test]
    fn parse_root() {
        assert!("/".parse::<Path>().unwrap().is_root());
        assert!("".parse::<Path>().unwrap().is_root());
    }

    #[test]
    fn parse_without_leading_slash() {
        let p: Path = "a/b".parse().unwrap();
        assert_eq!(p, "/a/b".parse().unwrap());
    }

    #[test]
    fn parse_rejects_malformed() {
        assert!("/a//b".parse::<Path>().is_err());
        assert!("/a[name=x".parse::<Path>().is_err());
        assert!("/a[name]".parse::<Path>().is_err());
        assert!("/a[=x]".parse::<Path>().is_err());
        assert!("/a[k=v]x".parse::<Path>().is_err());
    }

    #[test]
    fn display_roundtrips_textual_form() {
        let text = "/network-instance[name=default]/protocols/bgp";
        let p: Path = text.parse().unwrap();
        assert_eq!(p.to_string(), text);
        assert_eq!(Path::root().to_string(), "/");
    }

    #[test]
    fn keys_are_ordered_by_name() {
        let p: Path = "/l[b=2][a=1]".parse().unwrap();
        assert_eq!(p.to_string(), "/l[a=1][b=2]");
    }

    #[test]
    fn with_prefix_concatenates() {
        let prefix: Path = "/a".parse().unwrap();
        let p: Path = "/b/c".parse().unwrap();
        assert_eq!(p.with_prefix(&prefix), "/a/b/c".parse().unwrap());
    }

    #[test]
    fn set_request_emptiness() {
        let mut req = SetRequest::default();
        assert!(req.is_empty());
        req.deletes.push("/a".parse().unwrap());
        assert!(!req.is_empty());
    }
}
