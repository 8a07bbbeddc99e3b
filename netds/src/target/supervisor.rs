//! Connection supervisor for southbound sessions.
//!
//! A [`Supervisor`] owns the `Disconnected → Connecting → Connected` state of one
//! target session and retries a connect routine on its own task until it
//! succeeds or the shutdown signal fires. The delay between attempts comes from
//! an injectable [`Backoff`] policy.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Default delay between reconnect attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Delay policy between consecutive failed attempts.
pub trait Backoff: Send + Sync + fmt::Debug {
    /// Delay before the next attempt; `attempt` starts at 1 for the first failure.
    fn delay(&self, attempt: u32) -> Duration;
}

/// Same delay after every failure.
#[derive(Debug, Clone, Copy)]
pub struct FixedBackoff(pub Duration);

impl Default for FixedBackoff {
    fn default() -> Self {
        Self(DEFAULT_RETRY_DELAY)
    }
}

impl Backoff for FixedBackoff {
    fn delay(&self, _attempt: u32) -> Duration {
        self.0
    }
}

/// Connection state of a target session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
        }
    }
}

/// Resolves once shutdown was signalled or the signalling side was dropped.
pub async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

/// Supervises the connection state of one named target session.
#[derive(Debug, Clone)]
pub struct Supervisor {
    name: String,
    backoff: Arc<dyn Backoff>,
    state: Arc<watch::Sender<ConnectionState>>,
    shutdown: watch::Receiver<bool>,
}

impl Supervisor {
    pub fn new(
        name: impl Into<String>,
        backoff: Arc<dyn Backoff>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            name: name.into(),
            backoff,
            state: Arc::new(state),
            shutdown,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Subscribe to state transitions.
    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn current(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn set_state(&self, state: ConnectionState) {
        self.state.send_if_modified(|current| {
            let changed = *current != state;
            *current = state;
            changed
        });
    }

    /// Sleep for the backoff delay of `attempt`. Returns false if shutdown fired first.
    pub async fn wait_retry(&self, attempt: u32) -> bool {
        let mut shutdown = self.shutdown.clone();
        tokio::select! {
            _ = tokio::time::sleep(self.backoff.delay(attempt)) => true,
            _ = shutdown_requested(&mut shutdown) => false,
        }
    }

    /// Run `connect` until it succeeds. Returns `None` if shutdown fired first.
    pub async fn retry<T, E, F, Fut>(&self, what: &str, mut connect: F) -> Option<T>
    where
        E: fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut shutdown = self.shutdown.clone();
        let mut attempt: u32 = 0;
        loop {
            self.set_state(ConnectionState::Connecting);
            let result = tokio::select! {
                r = connect() => r,
                _ = shutdown_requested(&mut shutdown) => {
                    self.set_state(ConnectionState::Disconnected);
                    return None;
                }
            };
            match result {
                Ok(value) => {
                    self.set_state(ConnectionState::Connected);
                    info!(target_name = %self.name, attempts = attempt + 1, "{} connected", what);
                    return Some(value);
                }
                Err(e) => {
                    attempt = attempt.saturating_add(1);
                    self.set_state(ConnectionState::Disconnected);
                    warn!(target_name = %self.name, attempt, error = %e, "failed to connect {}, retrying", what);
                    if !self.wait_retry(attempt).await {
                        return None;
                    }
                }
            }
        }
    }

    /// Run [`Supervisor::retry`] on its own task.
    pub fn spawn_connect<T, E, F, Fut>(&self, what: &'static str, connect: F) -> JoinHandle<Option<T>>
    where
        T: Send + 'static,
        E: fmt::Display + Send + 'static,
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let supervisor = self.clone();
        tokio::spawn(async move { supervisor.retry(what, connect).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> Arc<dyn Backoff> {
        Arc::new(FixedBackoff(Duration::from_millis(5)))
    }

    #[test]
    fn fixed_backoff_ignores_attempt() {
        let b = FixedBackoff::default();
        assert_eq!(b.delay(1), Duration::from_secs(1));
        assert_eq!(b.delay(100), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn retry_until_success() {
        let (_tx, rx) = watch::channel(false);
        let supervisor = Supervisor::new("dev1", fast(), rx);
        let attempts = Arc::new(AtomicU32::new(0));

        let counter = Arc::clone(&attempts);
        let handle = supervisor.spawn_connect("test session", move || {
            let counter = Arc::clone(&counter);
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 3 {
                    Err("refused")
                } else {
                    Ok(42)
                }
            }
        });

        assert_eq!(handle.await.unwrap(), Some(42));
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
        assert_eq!(supervisor.current(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn retry_stops_on_shutdown() {
        let (tx, rx) = watch::channel(false);
        let supervisor = Supervisor::new("dev1", fast(), rx);

        let handle =
            supervisor.spawn_connect("test session", || async { Err::<(), _>("refused") });

        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.send(true).unwrap();

        assert_eq!(handle.await.unwrap(), None);
        assert_eq!(supervisor.current(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn shutdown_requested_resolves_when_sender_dropped() {
        let (tx, mut rx) = watch::channel(false);
        drop(tx);
        shutdown_requested(&mut rx).await;
    }
}
