//! The shardlink client endpoint.
//!
//! `IpcClient` runs a background connection loop (connect, login, serve,
//! reconnect) and hands out a request API that looks synchronous to callers:
//! `send_request` suspends until the matching response arrives.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use shardlink_core::config::IpcSection;
use shardlink_core::error::{ShardLinkError, ShardLinkResult};
use shardlink_core::{ClusterMember, Envelope, Handler, HandlerRegistry, PendingCalls};

use crate::connection;

/// Settings for one client endpoint.
#[derive(Clone)]
pub struct ClientConfig {
    /// WebSocket endpoint of the server, e.g. `ws://127.0.0.1:12321/ws`.
    pub url: String,
    pub shared_secret: String,
    /// Display name sent at login. The server picks `Bot N` when absent.
    pub name: Option<String>,
    /// Fixed pause between reconnect attempts.
    pub reconnect_delay: Duration,
    /// Per-call timeout (`None` waits forever).
    pub request_timeout: Option<Duration>,
}

impl ClientConfig {
    pub fn new(url: impl Into<String>, shared_secret: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            shared_secret: shared_secret.into(),
            name: None,
            reconnect_delay: Duration::from_secs(2),
            request_timeout: None,
        }
    }

    /// Build from the `[ipc]` config section, validating the secret and URL.
    pub fn from_ipc(ipc: &IpcSection) -> ShardLinkResult<Self> {
        ipc.validate_secret()?;
        Ok(Self {
            url: ipc.ws_url()?,
            shared_secret: ipc.shared_secret.clone(),
            name: ipc.name.clone(),
            reconnect_delay: ipc.reconnect_delay(),
            request_timeout: ipc.request_timeout(),
        })
    }
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("url", &self.url)
            .field("name", &self.name)
            .field("reconnect_delay", &self.reconnect_delay)
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

/// Connectivity of the client endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// No socket; waiting to (re)connect.
    Disconnected,
    /// Socket opening or login in flight.
    Connecting,
    /// Logged in; requests flow.
    Online,
    /// The server refused the login.
    Rejected,
}

/// State shared between the public handle and the connection loop.
pub(crate) struct Shared {
    pub(crate) config: ClientConfig,
    pub(crate) registry: HandlerRegistry,
    pub(crate) member: Arc<dyn ClusterMember>,
    pub(crate) pending: PendingCalls,
    status_tx: watch::Sender<ConnectionStatus>,
    shutdown_tx: watch::Sender<bool>,
    /// Mailbox of the live connection, if any.
    outgoing: watch::Sender<Option<mpsc::Sender<Envelope>>>,
}

impl Shared {
    pub(crate) fn set_status(&self, status: ConnectionStatus) {
        let previous = self.status_tx.send_replace(status);
        if previous != status {
            debug!(?previous, ?status, "connection status changed");
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    pub(crate) fn shutdown_rx(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    pub(crate) fn set_outgoing(&self, tx: Option<mpsc::Sender<Envelope>>) {
        self.outgoing.send_replace(tx);
    }

    /// Wait until a live mailbox other than `dead` is installed.
    async fn mailbox_replaced(&self, dead: Option<&mpsc::Sender<Envelope>>) -> ShardLinkResult<()> {
        let mut outgoing = self.outgoing.subscribe();
        let mut shutdown = self.shutdown_rx();
        tokio::select! {
            result = async {
                outgoing
                    .wait_for(|current| match (current, dead) {
                        (Some(current), Some(dead)) => !current.same_channel(dead),
                        (Some(_), None) => true,
                        (None, _) => false,
                    })
                    .await
                    .map(|_| ())
            } => result.map_err(|_| ShardLinkError::Closed),
            _ = closed(&mut shutdown) => Err(ShardLinkError::Closed),
        }
    }
}

/// Resolve once the shutdown flag is set.
pub(crate) async fn closed(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|closed| *closed).await;
}

/// The shardlink client endpoint.
pub struct IpcClient {
    shared: Arc<Shared>,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl IpcClient {
    /// Start the background connection loop and return immediately.
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect(
        config: ClientConfig,
        registry: HandlerRegistry,
        member: Arc<dyn ClusterMember>,
    ) -> Self {
        let (status_tx, _) = watch::channel(ConnectionStatus::Disconnected);
        let (shutdown_tx, _) = watch::channel(false);
        info!(url = %config.url, handlers = registry.len(), "starting shardlink client");

        let shared = Arc::new(Shared {
            config,
            registry,
            member,
            pending: PendingCalls::new(),
            status_tx,
            shutdown_tx,
            outgoing: watch::channel(None).0,
        });
        let loop_handle = tokio::spawn(connection::run(shared.clone()));

        Self {
            shared,
            loop_handle: Mutex::new(Some(loop_handle)),
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.shared.status_tx.borrow()
    }

    /// Watch status changes.
    pub fn status_watch(&self) -> watch::Receiver<ConnectionStatus> {
        self.shared.status_tx.subscribe()
    }

    pub fn is_online(&self) -> bool {
        self.status() == ConnectionStatus::Online
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.shared.registry
    }

    /// Number of calls still waiting for a response.
    pub fn pending_calls(&self) -> usize {
        self.shared.pending.len()
    }

    /// Wait until the endpoint is logged in.
    ///
    /// Fails with `AuthFailed` if the server rejected the login and with
    /// `Closed` once the endpoint is shut down.
    pub async fn wait_online(&self) -> ShardLinkResult<()> {
        if self.shared.is_closed() {
            return Err(ShardLinkError::Closed);
        }
        let mut status = self.shared.status_tx.subscribe();
        let mut shutdown = self.shared.shutdown_rx();

        tokio::select! {
            result = async {
                status
                    .wait_for(|s| matches!(s, ConnectionStatus::Online | ConnectionStatus::Rejected))
                    .await
                    .map(|s| *s)
            } => match result {
                Ok(ConnectionStatus::Online) => Ok(()),
                Ok(_) => Err(ShardLinkError::AuthFailed(
                    "server rejected the shared secret".into(),
                )),
                Err(_) => Err(ShardLinkError::Closed),
            },
            _ = closed(&mut shutdown) => Err(ShardLinkError::Closed),
        }
    }

    /// Send a request through the named handler.
    ///
    /// Returns `Some(reply)` for handlers that wait for a reply, `None` for
    /// fire-and-forget handlers. Unknown names fail before anything is sent.
    /// Dropping the returned future cancels the call.
    pub async fn send_request(&self, name: &str, args: Value) -> ShardLinkResult<Option<Value>> {
        let handler = self.shared.registry.get(name)?.clone();
        if matches!(handler, Handler::Login) {
            return Err(ShardLinkError::InvalidMessage(
                "login is sent by the connection loop".into(),
            ));
        }

        let data = handler.build_request(args)?;

        if !handler.wait() {
            self.deliver(Envelope::request(name, None, data)).await?;
            return Ok(None);
        }

        let call = self.shared.pending.register(None);
        debug!(handler = name, rtoken = call.rtoken(), "sending request");
        self.deliver(Envelope::request(name, Some(call.rtoken().to_string()), data))
            .await?;
        let reply = call.wait(self.shared.config.request_timeout).await?;
        Ok(Some(reply.data))
    }

    /// Queue an envelope on the live connection once online.
    ///
    /// A connection that drops before taking the envelope is not an error:
    /// the envelope is held until the next login succeeds.
    async fn deliver(&self, mut envelope: Envelope) -> ShardLinkResult<()> {
        loop {
            self.wait_online().await?;
            let current = self.shared.outgoing.borrow().clone();
            let Some(tx) = current else {
                self.shared.mailbox_replaced(None).await?;
                continue;
            };
            match tx.send(envelope).await {
                Ok(()) => return Ok(()),
                Err(mpsc::error::SendError(returned)) => {
                    debug!(
                        handler = %returned.handler,
                        "connection dropped while sending, holding for reconnect"
                    );
                    envelope = returned;
                    self.shared.mailbox_replaced(Some(&tx)).await?;
                }
            }
        }
    }

    /// Stop reconnecting, close the socket and abandon pending calls.
    ///
    /// Calling it more than once is harmless.
    pub async fn shutdown(&self) {
        let first = !self.shared.shutdown_tx.send_replace(true);
        let handle = self
            .loop_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                debug!(error = %e, "connection loop ended abnormally");
            }
        }
        let abandoned = self.shared.pending.abandon_all();
        self.shared.set_outgoing(None);
        self.shared.set_status(ConnectionStatus::Disconnected);
        if first {
            info!(abandoned, "shardlink client shut down");
        }
    }
}

impl Drop for IpcClient {
    fn drop(&mut self) {
        self.shared.shutdown_tx.send_replace(true);
        self.shared.pending.abandon_all();
        let handle = self
            .loop_handle
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(h) = handle {
            h.abort();
        }
    }
}
