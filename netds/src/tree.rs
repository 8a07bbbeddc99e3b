//! Versioned configuration tree.
//!
//! Nodes are reference counted and copied on write: [`VersionedTree::clone`]
//! only bumps the root's reference count, and a later mutation copies just the
//! nodes along the mutated path. A clone and its source therefore never observe
//! each other's mutations while sharing every untouched subtree.

use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;

use crate::types::{Notification, Path, PathElem, Update, Value};

/// Errors returned by tree mutations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TreeError {
    #[error("invalid path {0:?}: {1}")]
    InvalidPath(String, &'static str),
}

#[derive(Debug, Clone, Default, PartialEq)]
struct Node {
    value: Option<Value>,
    children: BTreeMap<PathElem, Arc<Node>>,
}

impl Node {
    fn is_empty(&self) -> bool {
        self.value.is_none() && self.children.is_empty()
    }

    fn collect(&self, path: &mut Vec<PathElem>, out: &mut Vec<Update>) {
        if let Some(value) = &self.value {
            out.push(Update::new(Path::new(path.clone()), value.clone()));
        }
        for (elem, child) in &self.children {
            path.push(elem.clone());
            child.collect(path, out);
            path.pop();
        }
    }

    fn count(&self) -> usize {
        usize::from(self.value.is_some()) + self.children.values().map(|c| c.count()).sum::<usize>()
    }

    /// Removes `elems` below this node. Returns whether anything was removed.
    fn remove(&mut self, elems: &[PathElem]) -> bool {
        let Some((first, rest)) = elems.split_first() else {
            return false;
        };
        if rest.is_empty() {
            return self.children.remove(first).is_some();
        }
        let Some(child) = self.children.get_mut(first) else {
            return false;
        };
        let removed = Arc::make_mut(child).remove(rest);
        if removed && child.is_empty() {
            self.children.remove(first);
        }
        removed
    }
}

/// Hierarchical path → value store with cheap snapshots.
#[derive(Debug, Clone, Default)]
pub struct VersionedTree {
    root: Arc<Node>,
}

impl PartialEq for VersionedTree {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.root, &other.root) || self.root == other.root
    }
}

fn validate(path: &Path) -> Result<(), TreeError> {
    if path.is_empty() {
        return Err(TreeError::InvalidPath(path.to_string(), "empty path"));
    }
    if path.elems.iter().any(|e| e.name.is_empty()) {
        return Err(TreeError::InvalidPath(
            path.to_string(),
            "empty element name",
        ));
    }
    Ok(())
}

impl VersionedTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `value` at `path`, creating intermediate nodes as needed.
    pub fn insert_or_replace(&mut self, path: &Path, value: Value) -> Result<(), TreeError> {
        validate(path)?;
        let mut node = Arc::make_mut(&mut self.root);
        for elem in &path.elems {
            let child = node.children.entry(elem.clone()).or_default();
            node = Arc::make_mut(child);
        }
        node.value = Some(value);
        Ok(())
    }

    /// Remove the subtree rooted at `path`.
    ///
    /// Deleting an absent path is a no-op and returns `Ok(false)`. Ancestors left
    /// without value or children are pruned. Deleting the root path `/` clears
    /// the whole tree.
    pub fn delete(&mut self, path: &Path) -> Result<bool, TreeError> {
        if path.is_empty() {
            if self.root.is_empty() {
                return Ok(false);
            }
            self.root = Arc::default();
            return Ok(true);
        }
        validate(path)?;
        if !self.contains(path) {
            return Ok(false);
        }
        Ok(Arc::make_mut(&mut self.root).remove(&path.elems))
    }

    pub fn apply_update(&mut self, update: &Update) -> Result<(), TreeError> {
        self.insert_or_replace(&update.path, update.value.clone())
    }

    /// Apply a notification: all deletes first, then all updates, each in listed order.
    pub fn apply_notification(&mut self, notification: &Notification) -> Result<(), TreeError> {
        for path in &notification.deletes {
            self.delete(path)?;
        }
        for update in &notification.updates {
            self.apply_update(update)?;
        }
        Ok(())
    }

    fn node(&self, path: &Path) -> Option<&Node> {
        let mut node = self.root.as_ref();
        for elem in &path.elems {
            node = node.children.get(elem)?;
        }
        Some(node)
    }

    /// Value stored exactly at `path`.
    pub fn get(&self, path: &Path) -> Option<&Value> {
        self.node(path)?.value.as_ref()
    }

    /// Whether a node exists at `path` (with or without a value).
    pub fn contains(&self, path: &Path) -> bool {
        !path.is_empty() && self.node(path).is_some()
    }

    /// Every (path, value) pair at or below `path`, in path order.
    pub fn subtree(&self, path: &Path) -> Vec<Update> {
        let mut out = Vec::new();
        if let Some(node) = self.node(path) {
            let mut prefix = path.elems.clone();
            node.collect(&mut prefix, &mut out);
        }
        out
    }

    /// Every (path, value) pair in the tree.
    pub fn updates(&self) -> Vec<Update> {
        self.subtree(&Path::root())
    }

    /// Number of values stored.
    pub fn len(&self) -> usize {
        self.root.count()
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    /// Whether both trees share the same root node.
    pub fn shares_root_with(&self, other: &VersionedTree) -> bool {
        Arc::ptr_eq(&self.root, &other.root)
    }
}
