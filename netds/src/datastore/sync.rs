//! Reconciliation of target notifications into the main trees.
//!
//! Every path of an incoming notification is classified through the schema
//! server and routed to the config or state tree. A failed lookup or tree
//! operation only skips that path; the loop itself never fails.

use std::sync::Arc;

use tokio::sync::{mpsc, watch, RwLock};
use tracing::{debug, info, warn};

use super::MainTrees;
use crate::schema::SchemaLookup;
use crate::target::supervisor::shutdown_requested;
use crate::target::SyncUpdate;
use crate::tree::VersionedTree;
use crate::types::{Path, SchemaId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Partition {
    Config,
    State,
}

/// Outcome of reconciling one notification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct ReconcileStats {
    pub(crate) applied: usize,
    pub(crate) skipped: usize,
}

pub(crate) struct Reconciler {
    datastore: String,
    main: Arc<MainTrees>,
    schema: Arc<dyn SchemaLookup>,
    schema_id: SchemaId,
}

impl Reconciler {
    pub(crate) fn new(
        datastore: &str,
        main: Arc<MainTrees>,
        schema: Arc<dyn SchemaLookup>,
        schema_id: SchemaId,
    ) -> Self {
        Self {
            datastore: datastore.to_string(),
            main,
            schema,
            schema_id,
        }
    }

    /// Consume `rx` until shutdown or until the producing side is gone.
    ///
    /// Shutdown also interrupts a notification that is still being
    /// reconciled, e.g. one waiting on a slow schema lookup.
    pub(crate) async fn run(
        self,
        mut rx: mpsc::Receiver<SyncUpdate>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(datastore = %self.datastore, "reconciliation loop started");
        loop {
            let update = tokio::select! {
                _ = shutdown_requested(&mut shutdown) => break,
                update = rx.recv() => update,
            };
            let Some(update) = update else {
                debug!(datastore = %self.datastore, "sync channel closed");
                break;
            };
            tokio::select! {
                _ = shutdown_requested(&mut shutdown) => {
                    warn!(datastore = %self.datastore, tree = %update.tree, "shutdown during reconciliation, notification abandoned");
                    break;
                }
                _ = self.reconcile(&update) => {}
            }
        }
        info!(datastore = %self.datastore, "reconciliation loop stopped");
    }

    /// Apply all deletes of the notification, then all updates.
    pub(crate) async fn reconcile(&self, update: &SyncUpdate) -> ReconcileStats {
        let mut stats = ReconcileStats::default();
        let notification = &update.notification;

        for path in &notification.deletes {
            let Some(partition) = self.classify(path).await else {
                stats.skipped += 1;
                continue;
            };
            let mut tree = self.tree(partition).write().await;
            match tree.delete(path) {
                Ok(_) => stats.applied += 1,
                Err(e) => {
                    warn!(datastore = %self.datastore, path = %path, error = %e, "failed to apply delete");
                    stats.skipped += 1;
                }
            }
        }

        for upd in &notification.updates {
            let Some(partition) = self.classify(&upd.path).await else {
                stats.skipped += 1;
                continue;
            };
            let mut tree = self.tree(partition).write().await;
            match tree.apply_update(upd) {
                Ok(()) => stats.applied += 1,
                Err(e) => {
                    warn!(datastore = %self.datastore, path = %upd.path, error = %e, "failed to apply update");
                    stats.skipped += 1;
                }
            }
        }

        debug!(
            datastore = %self.datastore,
            tree = %update.tree,
            applied = stats.applied,
            skipped = stats.skipped,
            "notification reconciled"
        );
        stats
    }

    async fn classify(&self, path: &Path) -> Option<Partition> {
        match self.schema.get_schema(path, &self.schema_id).await {
            Ok(c) if c.is_state => Some(Partition::State),
            Ok(_) => Some(Partition::Config),
            Err(e) => {
                warn!(datastore = %self.datastore, path = %path, error = %e, "schema lookup failed, skipping path");
                None
            }
        }
    }

    fn tree(&self, partition: Partition) -> &RwLock<VersionedTree> {
        match partition {
            Partition::Config => &self.main.config,
            Partition::State => &self.main.state,
        }
    }
}
