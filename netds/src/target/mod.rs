//! Southbound target sessions.
//!
//! A [`Target`] applies changes to the managed device and streams device state
//! back as [`SyncUpdate`]s. Two implementations exist:
//! - [`GnmiTarget`]: a gNMI session with perpetual reconnect and resubscribe
//! - [`NoopTarget`]: accepts everything, reports nothing (labs, tests)

pub mod gnmi;
pub mod noop;
pub mod supervisor;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tracing::info;

use crate::config::{SbiConfig, SbiType, SyncConfig};
use crate::error::{DatastoreError, TargetError};
use crate::types::{Notification, Path, SetRequest, SetResponse};

pub use gnmi::GnmiTarget;
pub use noop::NoopTarget;
pub use supervisor::{Backoff, ConnectionState, FixedBackoff, Supervisor};

/// A notification streamed by a target, tagged with the logical sub-tree
/// (sync subscription name) it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncUpdate {
    pub tree: String,
    pub notification: Notification,
}

/// Southbound session toward one device.
#[async_trait]
pub trait Target: Send + Sync {
    /// Read the given paths from the device.
    async fn get(&self, paths: &[Path]) -> Result<Vec<Notification>, TargetError>;

    /// Apply one batch of deletes, replaces and updates.
    async fn set(&self, request: &SetRequest) -> Result<SetResponse, TargetError>;

    /// Stream device notifications into `tx` until `shutdown` fires.
    ///
    /// Stream failures are handled inside (logged, retried); they never reach
    /// the caller.
    async fn sync(
        &self,
        config: &SyncConfig,
        tx: mpsc::Sender<SyncUpdate>,
        shutdown: watch::Receiver<bool>,
    );

    /// Close the session.
    async fn close(&self);
}

/// Build the target configured by `sbi`.
///
/// For a gNMI target the connection is retried on a supervisor task until it
/// succeeds; this call blocks until then. Fails with [`DatastoreError::Stopped`]
/// if the supervisor's shutdown fires first, and with a target error if the
/// configuration itself is unusable.
pub async fn connect(
    name: &str,
    sbi: &SbiConfig,
    supervisor: &Supervisor,
) -> Result<Arc<dyn Target>, DatastoreError> {
    match sbi.kind {
        SbiType::Noop => {
            supervisor.set_state(ConnectionState::Connected);
            info!(datastore = %name, "using noop target");
            Ok(Arc::new(NoopTarget::new(name)))
        }
        SbiType::Gnmi => {
            let builder = gnmi::GnmiTargetBuilder::new(name, sbi, supervisor.clone())?;
            let handle = supervisor.spawn_connect("gnmi target", move || {
                let builder = builder.clone();
                async move { builder.connect().await }
            });
            match handle.await {
                Ok(Some(target)) => Ok(Arc::new(target)),
                Ok(None) => Err(DatastoreError::Stopped),
                Err(e) => Err(TargetError::Subscription(format!("connect task failed: {e}")).into()),
            }
        }
    }
}
