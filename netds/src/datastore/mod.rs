//! The datastore: main config/state trees, named candidates, the target
//! session and the reconciliation loop.
//!
//! Commit pushes a candidate's pending changes to the target as one batch. It
//! does not write main: main follows the device through the reconciliation
//! loop, so it may lag a successful commit until the target echoes the change.

mod candidate;
mod sync;

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::audit::DatastoreAuditLogger;
use crate::config::DatastoreConfig;
use crate::error::{DatastoreError, Result};
use crate::schema::SchemaLookup;
use crate::target::{self, Backoff, ConnectionState, FixedBackoff, Supervisor, Target};
use crate::tree::VersionedTree;
use crate::types::{Notification, Path, SchemaId, SetRequest, SetResponse, Update};

use candidate::{compute_view, Candidate};
use sync::Reconciler;

/// Main config and state trees.
#[derive(Debug, Default)]
pub(crate) struct MainTrees {
    pub(crate) config: RwLock<VersionedTree>,
    pub(crate) state: RwLock<VersionedTree>,
}

/// Where a [`GetRequest`] reads from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataSource {
    Main,
    Candidate(String),
}

/// Which partition a [`GetRequest`] reads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DataType {
    #[default]
    Config,
    State,
    All,
}

#[derive(Debug, Clone)]
pub struct GetRequest {
    pub source: DataSource,
    pub data_type: DataType,
    /// Paths to read; empty means the whole tree.
    pub paths: Vec<Path>,
}

pub struct Datastore {
    config: DatastoreConfig,
    main: Arc<MainTrees>,
    candidates: RwLock<HashMap<String, Arc<Candidate>>>,
    target: Arc<dyn Target>,
    supervisor: Supervisor,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    audit: DatastoreAuditLogger,
}

impl std::fmt::Debug for Datastore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Datastore")
            .field("name", &self.config.name)
            .field("schema", &self.config.schema)
            .field("connection", &self.supervisor.current())
            .finish_non_exhaustive()
    }
}

fn check_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(DatastoreError::MissingName);
    }
    Ok(())
}

impl Datastore {
    /// Connect the configured target and start syncing.
    ///
    /// Blocks until the target accepts a connection, retrying every second.
    pub async fn new(config: DatastoreConfig, schema: Arc<dyn SchemaLookup>) -> Result<Self> {
        Self::with_backoff(config, schema, Arc::new(FixedBackoff::default())).await
    }

    /// Like [`Datastore::new`] with a custom reconnect policy.
    pub async fn with_backoff(
        config: DatastoreConfig,
        schema: Arc<dyn SchemaLookup>,
        backoff: Arc<dyn Backoff>,
    ) -> Result<Self> {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let supervisor = Supervisor::new(&config.name, backoff, shutdown_rx);
        info!(datastore = %config.name, sbi = ?config.sbi.kind, "connecting target");
        let target = target::connect(&config.name, &config.sbi, &supervisor).await?;
        Ok(Self::start(config, target, schema, supervisor, shutdown))
    }

    /// Build a datastore around an already connected target.
    pub fn with_target(
        config: DatastoreConfig,
        target: Arc<dyn Target>,
        schema: Arc<dyn SchemaLookup>,
    ) -> Self {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let supervisor =
            Supervisor::new(&config.name, Arc::new(FixedBackoff::default()), shutdown_rx);
        supervisor.set_state(ConnectionState::Connected);
        Self::start(config, target, schema, supervisor, shutdown)
    }

    fn start(
        config: DatastoreConfig,
        target: Arc<dyn Target>,
        schema: Arc<dyn SchemaLookup>,
        supervisor: Supervisor,
        shutdown: watch::Sender<bool>,
    ) -> Self {
        let main = Arc::new(MainTrees::default());
        let audit = DatastoreAuditLogger::new(&config.name);

        // Bounded: a slow reconciliation loop blocks the target's stream reader.
        let (tx, rx) = mpsc::channel(config.sync.buffer_size.max(1));

        let sync_target = Arc::clone(&target);
        let sync_config = config.sync.clone();
        let sync_shutdown = shutdown.subscribe();
        let target_task = tokio::spawn(async move {
            sync_target.sync(&sync_config, tx, sync_shutdown).await;
        });

        let reconciler =
            Reconciler::new(&config.name, Arc::clone(&main), schema, config.schema.clone());
        let reconcile_task = tokio::spawn(reconciler.run(rx, shutdown.subscribe()));

        audit.target_connected();
        info!(datastore = %config.name, schema = %config.schema, "datastore started");

        Self {
            config,
            main,
            candidates: RwLock::new(HashMap::new()),
            target,
            supervisor,
            shutdown,
            tasks: Mutex::new(vec![target_task, reconcile_task]),
            audit,
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn schema(&self) -> &SchemaId {
        &self.config.schema
    }

    pub fn config(&self) -> &DatastoreConfig {
        &self.config
    }

    /// Follow the target session's connection state.
    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.supervisor.state()
    }

    fn ensure_running(&self) -> Result<()> {
        if *self.shutdown.borrow() {
            return Err(DatastoreError::Stopped);
        }
        Ok(())
    }

    /// Snapshot of the main config tree.
    pub async fn main_config(&self) -> VersionedTree {
        self.main.config.read().await.clone()
    }

    /// Snapshot of the main state tree.
    pub async fn main_state(&self) -> VersionedTree {
        self.main.state.read().await.clone()
    }

    fn lookup(
        candidates: &HashMap<String, Arc<Candidate>>,
        name: &str,
    ) -> Result<Arc<Candidate>> {
        check_name(name)?;
        candidates
            .get(name)
            .cloned()
            .ok_or_else(|| DatastoreError::CandidateNotFound(name.to_string()))
    }

    // Candidate lifecycle

    pub async fn create_candidate(&self, name: &str) -> Result<()> {
        check_name(name)?;
        let mut candidates = self.candidates.write().await;
        if candidates.contains_key(name) {
            return Err(DatastoreError::CandidateExists(name.to_string()));
        }
        let base = self.main_config().await;
        candidates.insert(name.to_string(), Arc::new(Candidate::new(base)));
        drop(candidates);

        info!(datastore = %self.config.name, candidate = %name, "candidate created");
        self.audit.candidate_created(name);
        Ok(())
    }

    pub async fn delete_candidate(&self, name: &str) -> Result<()> {
        check_name(name)?;
        let removed = self.candidates.write().await.remove(name);
        if removed.is_none() {
            return Err(DatastoreError::CandidateNotFound(name.to_string()));
        }
        info!(datastore = %self.config.name, candidate = %name, "candidate deleted");
        self.audit.candidate_deleted(name);
        Ok(())
    }

    /// Names of all live candidates, sorted.
    pub async fn list_candidates(&self) -> Vec<String> {
        let mut names: Vec<String> = self.candidates.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Append deletes, replaces and updates to a candidate's pending lists.
    ///
    /// Only that candidate's lock is taken exclusively, so edits to different
    /// candidates proceed concurrently.
    pub async fn set_candidate(&self, name: &str, request: SetRequest) -> Result<()> {
        let candidates = self.candidates.read().await;
        let candidate = Self::lookup(&candidates, name)?;
        let mut state = candidate.state.lock().await;
        debug!(
            datastore = %self.config.name,
            candidate = %name,
            deletes = request.deletes.len(),
            replaces = request.replaces.len(),
            updates = request.updates.len(),
            "candidate edited"
        );
        state.append(request);
        Ok(())
    }

    /// Pending changes of a candidate.
    pub async fn diff(&self, name: &str) -> Result<SetRequest> {
        let candidates = self.candidates.read().await;
        let candidate = Self::lookup(&candidates, name)?;
        let changes = candidate.state.lock().await.changes.clone();
        Ok(changes)
    }

    /// Resulting view of a candidate: its base with pending changes applied.
    pub async fn preview(&self, name: &str) -> Result<VersionedTree> {
        let candidates = self.candidates.read().await;
        let candidate = Self::lookup(&candidates, name)?;
        let view = candidate.state.lock().await.preview()?;
        Ok(view)
    }

    /// The snapshot a candidate's edits apply to.
    pub async fn base(&self, name: &str) -> Result<VersionedTree> {
        let candidates = self.candidates.read().await;
        let candidate = Self::lookup(&candidates, name)?;
        let base = candidate.state.lock().await.base.clone();
        Ok(base)
    }

    /// Reset a candidate's base to the current main config. Pending changes stay.
    pub async fn rebase(&self, name: &str) -> Result<()> {
        let candidates = self.candidates.write().await;
        let candidate = Self::lookup(&candidates, name)?;
        let base = self.main_config().await;
        candidate.state.lock().await.rebase(base);
        drop(candidates);

        info!(datastore = %self.config.name, candidate = %name, "candidate rebased");
        self.audit.candidate_rebased(name);
        Ok(())
    }

    /// Drop a candidate's pending changes. The base is kept.
    pub async fn discard(&self, name: &str) -> Result<()> {
        let candidates = self.candidates.write().await;
        let candidate = Self::lookup(&candidates, name)?;
        candidate.state.lock().await.discard();
        drop(candidates);

        info!(datastore = %self.config.name, candidate = %name, "candidate discarded");
        self.audit.candidate_discarded(name);
        Ok(())
    }

    /// Push a candidate's pending changes to the target as one batch.
    ///
    /// On failure nothing changes: the candidate keeps its base and pending
    /// lists. On success the candidate is removed, or with `stay` it is kept
    /// with empty pending lists and a fresh base.
    pub async fn commit(&self, name: &str, rebase: bool, stay: bool) -> Result<SetResponse> {
        self.ensure_running()?;
        let mut candidates = self.candidates.write().await;
        let candidate = Self::lookup(&candidates, name)?;
        let mut state = candidate.state.lock().await;

        let base = if rebase {
            self.main_config().await
        } else {
            state.base.clone()
        };
        // Reject paths the tree cannot hold before anything reaches the device.
        compute_view(&base, &state.changes)?;

        let num_changes = state.changes.deletes.len()
            + state.changes.replaces.len()
            + state.changes.updates.len();
        let response = match self.target.set(&state.changes).await {
            Ok(response) => response,
            Err(e) => {
                warn!(datastore = %self.config.name, candidate = %name, error = %e, "commit failed");
                return Err(e.into());
            }
        };

        if stay {
            state.discard();
            state.rebase(self.main_config().await);
        } else {
            drop(state);
            candidates.remove(name);
        }
        drop(candidates);

        info!(
            datastore = %self.config.name,
            candidate = %name,
            changes = num_changes,
            stay,
            "candidate committed"
        );
        self.audit.candidate_committed(name, num_changes, stay);
        Ok(response)
    }

    // Reads

    /// Read (path, value) leaves from main or from a candidate's view.
    pub async fn get(&self, request: &GetRequest) -> Result<Vec<Update>> {
        let root = [Path::root()];
        let paths: &[Path] = if request.paths.is_empty() {
            &root
        } else {
            &request.paths
        };

        match &request.source {
            DataSource::Main => {
                let mut out = Vec::new();
                if matches!(request.data_type, DataType::Config | DataType::All) {
                    let config = self.main.config.read().await;
                    out.extend(paths.iter().flat_map(|p| config.subtree(p)));
                }
                if matches!(request.data_type, DataType::State | DataType::All) {
                    let state = self.main.state.read().await;
                    out.extend(paths.iter().flat_map(|p| state.subtree(p)));
                }
                Ok(out)
            }
            DataSource::Candidate(name) => {
                if request.data_type != DataType::Config {
                    return Err(DatastoreError::InvalidArgument(
                        "a candidate datastore does not store state data".to_string(),
                    ));
                }
                let view = self.preview(name).await?;
                Ok(paths.iter().flat_map(|p| view.subtree(p)).collect())
            }
        }
    }

    /// Read paths straight from the target.
    pub async fn get_target(&self, paths: &[Path]) -> Result<Vec<Notification>> {
        self.ensure_running()?;
        Ok(self.target.get(paths).await?)
    }

    /// Stop syncing and close the target. Later calls are no-ops.
    pub async fn stop(&self) {
        if self.shutdown.send_replace(true) {
            return;
        }
        info!(datastore = %self.config.name, "stopping datastore");
        self.target.close().await;

        let tasks = std::mem::take(&mut *self.tasks.lock().await);
        for task in tasks {
            if let Err(e) = task.await {
                warn!(datastore = %self.config.name, error = %e, "background task failed");
            }
        }
        self.supervisor.set_state(ConnectionState::Disconnected);
        self.audit.target_disconnected("datastore stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SchemaError;
    use crate::schema::{Classification, SchemaKind};
    use crate::target::NoopTarget;
    use crate::types::Value;
    use async_trait::async_trait;

    struct AllConfig;

    #[async_trait]
    impl SchemaLookup for AllConfig {
        async fn get_schema(
            &self,
            _path: &Path,
            _schema: &SchemaId,
        ) -> std::result::Result<Classification, SchemaError> {
            Ok(Classification::config(SchemaKind::Field))
        }
    }

    fn datastore() -> Datastore {
        let config = DatastoreConfig {
            name: "lab".into(),
            ..Default::default()
        };
        Datastore::with_target(config, Arc::new(NoopTarget::new("lab")), Arc::new(AllConfig))
    }

    fn p(s: &str) -> Path {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn noop_datastore_connects_immediately() {
        let config = DatastoreConfig {
            name: "lab".into(),
            ..Default::default()
        };
        let ds = Datastore::new(config, Arc::new(AllConfig)).await.unwrap();
        assert_eq!(ds.name(), "lab");
        assert_eq!(*ds.connection_state().borrow(), ConnectionState::Connected);
        ds.stop().await;
        assert_eq!(*ds.connection_state().borrow(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn noop_background_tasks_run_until_stop() {
        let ds = datastore();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(ds.tasks.lock().await.iter().all(|t| !t.is_finished()));

        ds.stop().await;
        assert!(ds.tasks.lock().await.is_empty());
    }

    #[tokio::test]
    async fn empty_name_is_missing_name() {
        let ds = datastore();
        assert!(matches!(ds.create_candidate("").await, Err(DatastoreError::MissingName)));
        assert!(matches!(ds.commit("", false, false).await, Err(DatastoreError::MissingName)));
        assert!(matches!(ds.discard("").await, Err(DatastoreError::MissingName)));
    }

    #[tokio::test]
    async fn candidate_state_reads_are_rejected() {
        let ds = datastore();
        ds.create_candidate("c1").await.unwrap();
        let req = GetRequest {
            source: DataSource::Candidate("c1".into()),
            data_type: DataType::State,
            paths: vec![],
        };
        assert!(matches!(ds.get(&req).await, Err(DatastoreError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn candidate_reads_use_preview() {
        let ds = datastore();
        ds.create_candidate("c1").await.unwrap();
        ds.set_candidate(
            "c1",
            SetRequest {
                updates: vec![Update::new(p("/a/b"), Value::Int(5))],
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let req = GetRequest {
            source: DataSource::Candidate("c1".into()),
            data_type: DataType::Config,
            paths: vec![p("/a")],
        };
        let leaves = ds.get(&req).await.unwrap();
        assert_eq!(leaves, vec![Update::new(p("/a/b"), Value::Int(5))]);

        let main = GetRequest {
            source: DataSource::Main,
            data_type: DataType::All,
            paths: vec![],
        };
        assert!(ds.get(&main).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn stopped_datastore_refuses_commit() {
        let ds = datastore();
        ds.create_candidate("c1").await.unwrap();
        ds.stop().await;
        ds.stop().await;
        assert!(matches!(ds.commit("c1", false, false).await, Err(DatastoreError::Stopped)));
        assert!(matches!(ds.get_target(&[]).await, Err(DatastoreError::Stopped)));
    }
}
