//! The shardlink server endpoint.
//!
//! `IpcServer` binds the HTTP listener, owns the connection table, the
//! ownership maps, the return-path table and the server's own pending calls.
//! Each accepted socket is driven by one actor task (see `transport`);
//! requests are routed on spawned tasks (see `routing`).

use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use shardlink_core::error::{ShardLinkError, ShardLinkResult};
use shardlink_core::{ClusterMember, Envelope, HandlerRegistry, Owner, OwnershipMap, PendingCalls};

use crate::config::ServerConfig;
use crate::connection::{ConnectionInfo, ConnectionState};
use crate::transport;

/// Where a relayed request came from and where it went.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ReturnPath {
    pub origin: u64,
    pub target: u64,
}

/// State shared by the listener, every socket actor and every routing task.
pub(crate) struct ServerInner {
    pub config: ServerConfig,
    pub registry: HandlerRegistry,
    /// Accepted sockets by connection id. Ordered so broadcasts are too.
    pub connections: RwLock<BTreeMap<u64, ConnectionState>>,
    pub ownership: RwLock<OwnershipMap>,
    /// rtoken → path, for requests relayed on behalf of a client.
    pub return_paths: Mutex<HashMap<String, ReturnPath>>,
    /// Calls the server itself is waiting on.
    pub pending: PendingCalls,
    next_conn_id: AtomicU64,
    closed: AtomicBool,
    pub shutdown_tx: broadcast::Sender<()>,
}

impl ServerInner {
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn next_conn_id(&self) -> u64 {
        self.next_conn_id.fetch_add(1, Ordering::Relaxed)
    }

    pub async fn register_connection(&self, state: ConnectionState) {
        debug!(conn_id = state.id, remote = %state.remote, "connection registered");
        self.connections.write().await.insert(state.id, state);
    }

    pub async fn is_authenticated(&self, conn_id: u64) -> bool {
        self.connections
            .read()
            .await
            .get(&conn_id)
            .is_some_and(|c| c.authenticated)
    }

    /// Queue an envelope on a connection's mailbox.
    pub async fn send_to(&self, conn_id: u64, envelope: Envelope) -> ShardLinkResult<()> {
        let tx = self
            .connections
            .read()
            .await
            .get(&conn_id)
            .map(|c| c.tx.clone())
            .ok_or_else(|| ShardLinkError::Transport(format!("connection {conn_id} is gone")))?;
        tx.send(envelope)
            .await
            .map_err(|_| ShardLinkError::Transport(format!("connection {conn_id} is closing")))
    }

    /// Forget everything tied to a closed socket.
    pub async fn disconnect(&self, conn_id: u64) {
        let removed = self.connections.write().await.remove(&conn_id);
        let (shards, guilds) = self.ownership.write().await.release(conn_id);
        let purged = {
            let mut paths = self.return_paths.lock().await;
            let before = paths.len();
            paths.retain(|_, path| path.origin != conn_id && path.target != conn_id);
            before - paths.len()
        };
        let abandoned = self.pending.abandon_target(conn_id);

        let name = removed
            .map(|c| c.name)
            .unwrap_or_else(|| format!("conn-{conn_id}"));
        info!(
            conn_id,
            name = %name,
            shards,
            guilds,
            return_paths = purged,
            abandoned,
            "connection closed"
        );
    }
}

/// The shardlink server endpoint.
pub struct IpcServer {
    inner: Arc<ServerInner>,
    local_addr: SocketAddr,
    serve_handle: Mutex<Option<JoinHandle<()>>>,
}

impl IpcServer {
    /// Bind the listener and start serving.
    ///
    /// The server claims everything `member` owns as `Local` before the
    /// first client can log in.
    pub async fn start(
        config: ServerConfig,
        registry: HandlerRegistry,
        member: Arc<dyn ClusterMember>,
    ) -> ShardLinkResult<Self> {
        let listener = TcpListener::bind(&config.listen_addr).await.map_err(|e| {
            ShardLinkError::Transport(format!("bind {} failed: {e}", config.listen_addr))
        })?;
        let local_addr = listener.local_addr()?;

        let mut ownership = OwnershipMap::new();
        ownership.claim(Owner::Local, &member.shard_ids(), &member.guild_ids());

        let inner = Arc::new(ServerInner {
            config,
            registry,
            connections: RwLock::new(BTreeMap::new()),
            ownership: RwLock::new(ownership),
            return_paths: Mutex::new(HashMap::new()),
            pending: PendingCalls::new(),
            next_conn_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            shutdown_tx: broadcast::channel(1).0,
        });

        let app = transport::router(inner.clone());
        let mut shutdown_rx = inner.shutdown_tx.subscribe();
        let serve_handle = tokio::spawn(async move {
            let result = axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            })
            .await;
            if let Err(e) = result {
                warn!(error = %e, "HTTP server error");
            }
        });

        info!(
            addr = %local_addr,
            name = %inner.config.name,
            handlers = inner.registry.len(),
            "shardlink server ready"
        );

        Ok(Self {
            inner,
            local_addr,
            serve_handle: Mutex::new(Some(serve_handle)),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.inner.registry
    }

    /// Issue a request from the server's own side.
    ///
    /// Runs the same routing a client request would get: answered locally,
    /// sent to the owning peer, or fanned out and aggregated.
    pub async fn send_request(&self, name: &str, args: Value) -> ShardLinkResult<Option<Value>> {
        if self.inner.is_closed() {
            return Err(ShardLinkError::Closed);
        }
        self.inner.originate(name, args).await
    }

    /// Number of authenticated clients.
    pub async fn clients_count(&self) -> usize {
        self.inner
            .connections
            .read()
            .await
            .values()
            .filter(|c| c.authenticated)
            .count()
    }

    /// Every accepted socket, authenticated or not, by connection id.
    pub async fn connections(&self) -> Vec<ConnectionInfo> {
        let connections = self.inner.connections.read().await;
        let owners = self.inner.ownership.read().await;
        connections.values().map(|c| c.info(&owners)).collect()
    }

    pub async fn shard_owner(&self, shard_id: u64) -> Option<Owner> {
        self.inner.ownership.read().await.shard_owner(shard_id)
    }

    pub async fn guild_owner(&self, guild_id: u64) -> Option<Owner> {
        self.inner.ownership.read().await.guild_owner(guild_id)
    }

    /// Outstanding relays awaiting a response.
    pub async fn return_path_count(&self) -> usize {
        self.inner.return_paths.lock().await.len()
    }

    /// Stop accepting, close every socket and abandon pending calls.
    ///
    /// Calling it more than once is harmless.
    pub async fn shutdown(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("shutting down shardlink server");
        let _ = self.inner.shutdown_tx.send(());
        let abandoned = self.inner.pending.abandon_all();

        let handle = self.serve_handle.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "HTTP server task failed");
            }
        }
        info!(abandoned, "shardlink server stopped");
    }
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        let _ = self.inner.shutdown_tx.send(());
        if let Some(h) = self.serve_handle.get_mut().take() {
            h.abort();
        }
    }
}
