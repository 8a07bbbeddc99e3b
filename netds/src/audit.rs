//! Audit trail of state-changing datastore events.
//!
//! Events go to the `audit` tracing target so they can be filtered or routed
//! separately from operational logs (`RUST_LOG=audit=info`).

use tracing::info;

/// Datastore audit logger
#[derive(Debug, Clone)]
pub struct DatastoreAuditLogger {
    datastore: String,
}

impl DatastoreAuditLogger {
    pub fn new(datastore: &str) -> Self {
        Self {
            datastore: datastore.to_string(),
        }
    }

    fn log(&self, message: String, object: &str) {
        info!(target: "audit", datastore = %self.datastore, object = %object, "{}", message);
    }

    // Candidate events
    pub fn candidate_created(&self, name: &str) {
        self.log(format!("Candidate created: {}", name), name);
    }

    pub fn candidate_deleted(&self, name: &str) {
        self.log(format!("Candidate deleted: {}", name), name);
    }

    pub fn candidate_discarded(&self, name: &str) {
        self.log(format!("Candidate changes discarded: {}", name), name);
    }

    pub fn candidate_rebased(&self, name: &str) {
        self.log(format!("Candidate rebased onto main: {}", name), name);
    }

    pub fn candidate_committed(&self, name: &str, changes: usize, kept: bool) {
        let outcome = if kept { "kept" } else { "deleted" };
        self.log(
            format!(
                "Candidate committed: {} ({} changes, candidate {})",
                name, changes, outcome
            ),
            name,
        );
    }

    // Target events
    pub fn target_connected(&self) {
        self.log("Target connected".to_string(), &self.datastore);
    }

    pub fn target_disconnected(&self, reason: &str) {
        self.log(format!("Target disconnected: {}", reason), &self.datastore);
    }
}
