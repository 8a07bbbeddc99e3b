//! Target that accepts every request and never reports device state.

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use super::supervisor::shutdown_requested;
use super::{SyncUpdate, Target};
use crate::config::SyncConfig;
use crate::error::TargetError;
use crate::types::{Notification, Path, SetRequest, SetResponse};

#[derive(Debug, Clone)]
pub struct NoopTarget {
    name: String,
}

impl NoopTarget {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Target for NoopTarget {
    async fn get(&self, paths: &[Path]) -> Result<Vec<Notification>, TargetError> {
        debug!(target_name = %self.name, num_paths = paths.len(), "noop get");
        Ok(Vec::new())
    }

    async fn set(&self, request: &SetRequest) -> Result<SetResponse, TargetError> {
        debug!(
            target_name = %self.name,
            num_deletes = request.deletes.len(),
            num_replaces = request.replaces.len(),
            num_updates = request.updates.len(),
            "noop set"
        );
        Ok(SetResponse::default())
    }

    async fn sync(
        &self,
        _config: &SyncConfig,
        _tx: mpsc::Sender<SyncUpdate>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        // Holding `_tx` until shutdown keeps the reconciliation loop alive.
        info!(target_name = %self.name, "starting target sync (noop, nothing to stream)");
        shutdown_requested(&mut shutdown).await;
        debug!(target_name = %self.name, "noop sync stopped");
    }

    async fn close(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Update, Value};

    #[tokio::test]
    async fn noop_returns_empty_results() {
        let target = NoopTarget::new("lab");
        assert!(target.get(&["/a".parse().unwrap()]).await.unwrap().is_empty());

        let req = SetRequest {
            updates: vec![Update::new("/a".parse().unwrap(), Value::Int(1))],
            ..Default::default()
        };
        let rsp = target.set(&req).await.unwrap();
        assert!(rsp.results.is_empty());
    }

    #[tokio::test]
    async fn noop_sync_holds_channel_until_shutdown() {
        let target = NoopTarget::new("lab");
        let (tx, mut rx) = mpsc::channel(1);
        let (stop, shutdown) = watch::channel(false);

        let handle = tokio::spawn(async move {
            target.sync(&SyncConfig::default(), tx, shutdown).await;
        });

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(!handle.is_finished());
        assert!(matches!(
            rx.try_recv(),
            Err(mpsc::error::TryRecvError::Empty)
        ));

        stop.send(true).unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(rx.recv().await.is_none());
    }
}
