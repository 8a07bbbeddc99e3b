#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use netds::config::{DatastoreConfig, SyncConfig};
use netds::target::supervisor::shutdown_requested;
use netds::{
    Classification, Datastore, Notification, Path, SchemaError, SchemaId, SchemaKind,
    SchemaLookup, SetRequest, SetResponse, SyncUpdate, Target, TargetError, Update, Value,
};
use tokio::sync::{mpsc, watch};

pub fn p(s: &str) -> Path {
    s.parse().unwrap()
}

pub fn update(path: &str, value: Value) -> Update {
    Update::new(p(path), value)
}

/// Target that records every Set, can be told to fail, and streams whatever
/// the test feeds it.
pub struct FakeTarget {
    sets: Mutex<Vec<SetRequest>>,
    fail_sets: AtomicBool,
    feed: Mutex<Option<mpsc::Receiver<SyncUpdate>>>,
}

impl FakeTarget {
    pub fn new() -> (Arc<Self>, mpsc::Sender<SyncUpdate>) {
        let (tx, rx) = mpsc::channel(16);
        let target = Arc::new(Self {
            sets: Mutex::new(Vec::new()),
            fail_sets: AtomicBool::new(false),
            feed: Mutex::new(Some(rx)),
        });
        (target, tx)
    }

    pub fn fail_sets(&self, fail: bool) {
        self.fail_sets.store(fail, Ordering::SeqCst);
    }

    pub fn sets(&self) -> Vec<SetRequest> {
        self.sets.lock().unwrap().clone()
    }
}

#[async_trait]
impl Target for FakeTarget {
    async fn get(&self, _paths: &[Path]) -> Result<Vec<Notification>, TargetError> {
        Ok(Vec::new())
    }

    async fn set(&self, request: &SetRequest) -> Result<SetResponse, TargetError> {
        if self.fail_sets.load(Ordering::SeqCst) {
            return Err(TargetError::Rpc(tonic::Status::unavailable("device unreachable")));
        }
        self.sets.lock().unwrap().push(request.clone());
        Ok(SetResponse {
            timestamp: 1,
            results: Vec::new(),
        })
    }

    async fn sync(
        &self,
        _config: &SyncConfig,
        tx: mpsc::Sender<SyncUpdate>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let Some(mut feed) = self.feed.lock().unwrap().take() else {
            return;
        };
        loop {
            tokio::select! {
                _ = shutdown_requested(&mut shutdown) => return,
                next = feed.recv() => match next {
                    Some(update) => {
                        if tx.send(update).await.is_err() {
                            return;
                        }
                    }
                    None => return,
                },
            }
        }
    }

    async fn close(&self) {}
}

/// Classifies by path prefix: listed state prefixes are state, listed failing
/// prefixes error out, everything else is config.
#[derive(Default)]
pub struct TableSchema {
    state: Vec<Path>,
    failing: Vec<Path>,
}

impl TableSchema {
    pub fn new(state: &[&str], failing: &[&str]) -> Self {
        Self {
            state: state.iter().map(|s| p(s)).collect(),
            failing: failing.iter().map(|s| p(s)).collect(),
        }
    }
}

fn has_prefix(path: &Path, prefix: &Path) -> bool {
    path.elems.len() >= prefix.elems.len()
        && path.elems.iter().zip(&prefix.elems).all(|(a, b)| a == b)
}

#[async_trait]
impl SchemaLookup for TableSchema {
    async fn get_schema(
        &self,
        path: &Path,
        _schema: &SchemaId,
    ) -> Result<Classification, SchemaError> {
        if self.failing.iter().any(|f| has_prefix(path, f)) {
            return Err(SchemaError::Lookup(tonic::Status::internal("lookup failed")));
        }
        if self.state.iter().any(|s| has_prefix(path, s)) {
            return Ok(Classification::state(SchemaKind::Field));
        }
        Ok(Classification::config(SchemaKind::Field))
    }
}

/// Schema server that never answers.
pub struct PendingSchema;

#[async_trait]
impl SchemaLookup for PendingSchema {
    async fn get_schema(
        &self,
        _path: &Path,
        _schema: &SchemaId,
    ) -> Result<Classification, SchemaError> {
        std::future::pending().await
    }
}

pub struct Harness {
    pub ds: Datastore,
    pub target: Arc<FakeTarget>,
    pub feed: mpsc::Sender<SyncUpdate>,
}

pub fn harness(schema: TableSchema) -> Harness {
    harness_with(Arc::new(schema))
}

pub fn harness_with(schema: Arc<dyn SchemaLookup>) -> Harness {
    let (target, feed) = FakeTarget::new();
    let config = DatastoreConfig {
        name: "dev1".into(),
        ..Default::default()
    };
    let ds = Datastore::with_target(config, target.clone(), schema);
    Harness { ds, target, feed }
}

impl Harness {
    /// Push a notification through the fake target's sync stream.
    pub async fn notify(&self, updates: Vec<Update>, deletes: Vec<Path>) {
        self.feed
            .send(SyncUpdate {
                tree: "test".into(),
                notification: Notification {
                    timestamp: 1,
                    updates,
                    deletes,
                },
            })
            .await
            .unwrap();
    }

    /// Wait until main config holds `value` at `path`.
    pub async fn wait_config(&self, path: &str, value: &Value) {
        let path = p(path);
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if self.ds.main_config().await.get(&path) == Some(value) {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("main config never converged");
    }

    /// Wait until main state holds `value` at `path`.
    pub async fn wait_state(&self, path: &str, value: &Value) {
        let path = p(path);
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if self.ds.main_state().await.get(&path) == Some(value) {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("main state never converged");
    }
}
