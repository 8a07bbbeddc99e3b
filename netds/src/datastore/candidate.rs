//! Named staged change-sets.

use tokio::sync::Mutex;

use crate::tree::{TreeError, VersionedTree};
use crate::types::SetRequest;

/// A candidate: its own lock around its base snapshot and pending lists.
#[derive(Debug)]
pub(crate) struct Candidate {
    pub(crate) state: Mutex<CandidateState>,
}

impl Candidate {
    pub(crate) fn new(base: VersionedTree) -> Self {
        Self {
            state: Mutex::new(CandidateState::new(base)),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct CandidateState {
    /// Snapshot of main config the edits apply to.
    pub(crate) base: VersionedTree,
    /// Cached resulting view; `None` whenever base or changes moved.
    pub(crate) head: Option<VersionedTree>,
    /// Pending deletes, replaces and updates, in submission order.
    pub(crate) changes: SetRequest,
}

impl CandidateState {
    pub(crate) fn new(base: VersionedTree) -> Self {
        Self {
            base,
            head: None,
            changes: SetRequest::default(),
        }
    }

    pub(crate) fn append(&mut self, request: SetRequest) {
        self.changes.deletes.extend(request.deletes);
        self.changes.replaces.extend(request.replaces);
        self.changes.updates.extend(request.updates);
        self.head = None;
    }

    pub(crate) fn discard(&mut self) {
        self.changes = SetRequest::default();
        self.head = None;
    }

    pub(crate) fn rebase(&mut self, base: VersionedTree) {
        self.base = base;
        self.head = None;
    }

    /// Resulting view of the candidate, cached in `head`.
    pub(crate) fn preview(&mut self) -> Result<VersionedTree, TreeError> {
        if let Some(head) = &self.head {
            return Ok(head.clone());
        }
        let head = compute_view(&self.base, &self.changes)?;
        self.head = Some(head.clone());
        Ok(head)
    }
}

/// Apply `changes` over a copy of `base`: deletes, then replaces, then updates.
///
/// A replace drops whatever was below its path before setting the new value.
pub(crate) fn compute_view(
    base: &VersionedTree,
    changes: &SetRequest,
) -> Result<VersionedTree, TreeError> {
    let mut tree = base.clone();
    for path in &changes.deletes {
        tree.delete(path)?;
    }
    for replace in &changes.replaces {
        tree.delete(&replace.path)?;
        tree.apply_update(replace)?;
    }
    for update in &changes.updates {
        tree.apply_update(update)?;
    }
    Ok(tree)
}
