//! gNMI target session.
//!
//! Get and Set are unary calls bounded by the configured timeout. Sync opens
//! one Subscribe stream per configured sync entry; any stream failure tears all
//! of them down and the whole set is re-established after the backoff delay.

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::{Stream, StreamExt};
use tonic::metadata::{Ascii, MetadataValue};
use tonic::transport::{Channel, Endpoint};
use tracing::{debug, error, info, warn};

use super::supervisor::{shutdown_requested, ConnectionState, Supervisor};
use super::{SyncUpdate, Target};
use crate::config::{GnmiSync, SbiConfig, SyncConfig, SyncMode};
use crate::error::TargetError;
use crate::proto::convert::{notification_from_gnmi, parse_encoding};
use crate::proto::gnmi::g_nmi_client::GNmiClient;
use crate::proto::gnmi::{
    self, subscribe_request, subscribe_response, subscription_list, Encoding,
};
use crate::types::{Notification, Path, SetRequest, SetResponse};

type AuthPair = (MetadataValue<Ascii>, MetadataValue<Ascii>);

type ResponseStream =
    Pin<Box<dyn Stream<Item = Result<gnmi::SubscribeResponse, tonic::Status>> + Send>>;

/// Validated connection parameters; [`GnmiTargetBuilder::connect`] may be
/// called repeatedly until the device answers.
#[derive(Debug, Clone)]
pub(crate) struct GnmiTargetBuilder {
    name: String,
    endpoint: Endpoint,
    credentials: Option<AuthPair>,
    timeout: Duration,
    supervisor: Supervisor,
}

impl GnmiTargetBuilder {
    pub(crate) fn new(
        name: &str,
        sbi: &SbiConfig,
        supervisor: Supervisor,
    ) -> Result<Self, TargetError> {
        let address = if sbi.address.contains("://") {
            sbi.address.clone()
        } else {
            format!("http://{}", sbi.address)
        };
        let endpoint = Endpoint::from_shared(address)
            .map_err(|e| TargetError::InvalidConfig(format!("address {:?}: {}", sbi.address, e)))?
            .connect_timeout(sbi.timeout());

        let credentials = match &sbi.credentials {
            Some(c) => {
                let username = MetadataValue::try_from(c.username.as_str())
                    .map_err(|e| TargetError::InvalidConfig(format!("username: {}", e)))?;
                let password = MetadataValue::try_from(c.password.as_str())
                    .map_err(|e| TargetError::InvalidConfig(format!("password: {}", e)))?;
                Some((username, password))
            }
            None => None,
        };

        Ok(Self {
            name: name.to_string(),
            endpoint,
            credentials,
            timeout: sbi.timeout(),
            supervisor,
        })
    }

    pub(crate) async fn connect(&self) -> Result<GnmiTarget, TargetError> {
        let channel = self.endpoint.connect().await?;
        info!(target_name = %self.name, address = %self.endpoint.uri(), "connected to gnmi target");
        Ok(GnmiTarget {
            name: self.name.clone(),
            client: GNmiClient::new(channel),
            credentials: self.credentials.clone(),
            timeout: self.timeout,
            supervisor: self.supervisor.clone(),
        })
    }
}

/// gNMI southbound session.
#[derive(Debug, Clone)]
pub struct GnmiTarget {
    name: String,
    client: GNmiClient<Channel>,
    credentials: Option<AuthPair>,
    timeout: Duration,
    supervisor: Supervisor,
}

impl GnmiTarget {
    fn authorize<T>(&self, request: &mut tonic::Request<T>) {
        if let Some((username, password)) = &self.credentials {
            request.metadata_mut().insert("username", username.clone());
            request.metadata_mut().insert("password", password.clone());
        }
    }

    /// Unary request carrying credentials and the RPC deadline.
    fn unary<T>(&self, message: T) -> tonic::Request<T> {
        let mut request = tonic::Request::new(message);
        request.set_timeout(self.timeout);
        self.authorize(&mut request);
        request
    }
}

/// Opens one Subscribe stream per call.
#[async_trait]
trait SubscriptionOpener: Clone + Send + Sync + 'static {
    async fn open(&self, list: &gnmi::SubscriptionList) -> Result<ResponseStream, TargetError>;
}

#[async_trait]
impl SubscriptionOpener for GnmiTarget {
    async fn open(&self, list: &gnmi::SubscriptionList) -> Result<ResponseStream, TargetError> {
        let (req_tx, req_rx) = mpsc::channel(1);
        req_tx
            .send(gnmi::SubscribeRequest {
                request: Some(subscribe_request::Request::Subscribe(list.clone())),
            })
            .await
            .map_err(|_| TargetError::Subscription("request channel closed".into()))?;

        let mut request = tonic::Request::new(ReceiverStream::new(req_rx));
        self.authorize(&mut request);
        let stream = self.client.clone().subscribe(request).await?.into_inner();

        // The request sender lives as long as the response stream, otherwise
        // the server sees a half-closed request side.
        Ok(Box::pin(stream.map(move |item| {
            let _request_side = &req_tx;
            item
        })))
    }
}

/// Run every subscription until shutdown. A failure of any one of them tears
/// all of them down; the whole set is reopened after the backoff delay.
async fn run_sync<O: SubscriptionOpener>(
    opener: &O,
    supervisor: &Supervisor,
    subscriptions: &[SyncSubscription],
    tx: mpsc::Sender<SyncUpdate>,
    mut shutdown: watch::Receiver<bool>,
) {
    let name = supervisor.name();
    let mut attempt: u32 = 0;
    loop {
        let opened = Arc::new(AtomicBool::new(false));
        let (err_tx, mut err_rx) = mpsc::channel::<TargetError>(subscriptions.len());
        let mut tasks = JoinSet::new();
        for sub in subscriptions {
            let opener = opener.clone();
            let supervisor = supervisor.clone();
            let sub = sub.clone();
            let tx = tx.clone();
            let err_tx = err_tx.clone();
            let opened = Arc::clone(&opened);
            tasks.spawn(async move {
                if let Err(e) = run_subscription(&opener, &supervisor, &sub, &tx, &opened).await {
                    let _ = err_tx.send(e).await;
                }
            });
        }
        drop(err_tx);

        let failure = tokio::select! {
            _ = shutdown_requested(&mut shutdown) => {
                tasks.abort_all();
                info!(target_name = %name, "target sync stopped");
                return;
            }
            failure = err_rx.recv() => failure,
        };
        tasks.abort_all();

        let Some(e) = failure else {
            info!(target_name = %name, "sync consumer closed, stopping target sync");
            return;
        };

        attempt = if opened.load(Ordering::Relaxed) {
            1
        } else {
            attempt.saturating_add(1)
        };
        supervisor.set_state(ConnectionState::Disconnected);
        warn!(target_name = %name, attempt, error = %e, "subscription failed, restarting sync");
        if !supervisor.wait_retry(attempt).await {
            return;
        }
        supervisor.set_state(ConnectionState::Connecting);
    }
}

/// Run one sync entry until it fails or the consumer goes away.
async fn run_subscription<O: SubscriptionOpener>(
    opener: &O,
    supervisor: &Supervisor,
    sub: &SyncSubscription,
    tx: &mpsc::Sender<SyncUpdate>,
    opened: &AtomicBool,
) -> Result<(), TargetError> {
    if sub.mode != SyncMode::Once {
        subscribe(opener, supervisor, sub, tx, opened).await?;
        return Ok(());
    }

    let mut ticker = tokio::time::interval(sub.period);
    loop {
        ticker.tick().await;
        if subscribe(opener, supervisor, sub, tx, opened).await? == Flow::ConsumerGone {
            return Ok(());
        }
    }
}

async fn subscribe<O: SubscriptionOpener>(
    opener: &O,
    supervisor: &Supervisor,
    sub: &SyncSubscription,
    tx: &mpsc::Sender<SyncUpdate>,
    opened: &AtomicBool,
) -> Result<Flow, TargetError> {
    let stream = opener.open(&sub.list).await?;
    opened.store(true, Ordering::Relaxed);
    supervisor.set_state(ConnectionState::Connected);
    debug!(target_name = %supervisor.name(), sync = %sub.name, "subscription opened");
    forward(stream, sub, tx).await
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    /// A once-subscription delivered its full snapshot.
    Synced,
    /// The reconciliation side dropped its receiver.
    ConsumerGone,
}

/// Push every notification of a subscribe stream into `tx`.
async fn forward<S>(
    mut stream: S,
    sub: &SyncSubscription,
    tx: &mpsc::Sender<SyncUpdate>,
) -> Result<Flow, TargetError>
where
    S: Stream<Item = Result<gnmi::SubscribeResponse, tonic::Status>> + Unpin,
{
    let once = sub.mode == SyncMode::Once;
    while let Some(response) = stream.next().await {
        match response?.response {
            Some(subscribe_response::Response::Update(n)) => {
                let (notification, skipped) = notification_from_gnmi(&n);
                for s in &skipped {
                    warn!(sync = %sub.name, path = %s.path, error = %s.error, "skipping unconvertible update");
                }
                if notification.is_empty() {
                    continue;
                }
                let update = SyncUpdate {
                    tree: sub.name.clone(),
                    notification,
                };
                if tx.send(update).await.is_err() {
                    return Ok(Flow::ConsumerGone);
                }
            }
            Some(subscribe_response::Response::SyncResponse(_)) => {
                debug!(sync = %sub.name, "sync response received");
                if once {
                    return Ok(Flow::Synced);
                }
            }
            None => {}
        }
    }

    if once {
        Ok(Flow::Synced)
    } else {
        Err(TargetError::Subscription(format!(
            "stream for {} ended",
            sub.name
        )))
    }
}

#[async_trait]
impl Target for GnmiTarget {
    async fn get(&self, paths: &[Path]) -> Result<Vec<Notification>, TargetError> {
        let request = gnmi::GetRequest {
            prefix: None,
            path: paths.iter().map(gnmi::Path::from).collect(),
            encoding: Encoding::JsonIetf as i32,
        };
        let response = self.client.clone().get(self.unary(request)).await?.into_inner();
        let mut notifications = Vec::with_capacity(response.notification.len());
        for n in &response.notification {
            let (notification, skipped) = notification_from_gnmi(n);
            if let Some(s) = skipped.into_iter().next() {
                return Err(s.error);
            }
            notifications.push(notification);
        }
        Ok(notifications)
    }

    async fn set(&self, request: &SetRequest) -> Result<SetResponse, TargetError> {
        let wire = gnmi::SetRequest::try_from(request)?;
        let response = self.client.clone().set(self.unary(wire)).await?.into_inner();
        Ok(SetResponse::from(&response))
    }

    async fn sync(
        &self,
        config: &SyncConfig,
        tx: mpsc::Sender<SyncUpdate>,
        shutdown: watch::Receiver<bool>,
    ) {
        let subscriptions = match build_subscriptions(&config.gnmi) {
            Ok(subs) => subs,
            Err(e) => {
                error!(target_name = %self.name, error = %e, "invalid sync configuration, not syncing");
                return;
            }
        };
        if subscriptions.is_empty() {
            info!(target_name = %self.name, "no sync subscriptions configured");
            return;
        }
        info!(target_name = %self.name, subscriptions = subscriptions.len(), "starting target sync");
        run_sync(self, &self.supervisor, &subscriptions, tx, shutdown).await;
    }

    /// Marks the session disconnected. The underlying channel is shared by
    /// every clone of the client and closes once the last clone is dropped;
    /// the sync tasks holding clones exit on the datastore's shutdown signal.
    async fn close(&self) {
        self.supervisor.set_state(ConnectionState::Disconnected);
        info!(target_name = %self.name, "gnmi target closed");
    }
}

/// One configured sync entry in wire form.
#[derive(Debug, Clone)]
struct SyncSubscription {
    name: String,
    mode: SyncMode,
    period: Duration,
    list: gnmi::SubscriptionList,
}

fn build_subscriptions(entries: &[GnmiSync]) -> Result<Vec<SyncSubscription>, TargetError> {
    entries.iter().map(build_subscription).collect()
}

fn build_subscription(entry: &GnmiSync) -> Result<SyncSubscription, TargetError> {
    let encoding = parse_encoding(&entry.encoding).ok_or_else(|| {
        TargetError::InvalidConfig(format!(
            "sync {}: unknown encoding {:?}",
            entry.name, entry.encoding
        ))
    })?;

    let mode = match entry.mode {
        SyncMode::OnChange => gnmi::SubscriptionMode::OnChange,
        SyncMode::Sample => gnmi::SubscriptionMode::Sample,
        SyncMode::TargetDefined | SyncMode::Once => gnmi::SubscriptionMode::TargetDefined,
    };
    let sample_interval = entry
        .sample_interval()
        .map(|d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
        .unwrap_or(0);

    let mut subscription = Vec::with_capacity(entry.paths.len());
    for raw in &entry.paths {
        let path: Path = raw.parse().map_err(|e| {
            TargetError::InvalidConfig(format!("sync {}: {}", entry.name, e))
        })?;
        subscription.push(gnmi::Subscription {
            path: Some(gnmi::Path::from(&path)),
            mode: mode as i32,
            sample_interval,
        });
    }

    let list_mode = match entry.mode {
        SyncMode::Once => subscription_list::Mode::Once,
        _ => subscription_list::Mode::Stream,
    };

    Ok(SyncSubscription {
        name: entry.name.clone(),
        mode: entry.mode,
        period: entry.period(),
        list: gnmi::SubscriptionList {
            prefix: None,
            subscription,
            mode: list_mode as i32,
            encoding: encoding as i32,
        },
    })
}
