//! HTTP routes and the per-socket actor.
//!
//! `GET /` answers with a short plain-text banner, `GET /ws` upgrades to the
//! shardlink WebSocket. Each socket gets one actor that multiplexes inbound
//! frames, its outbound mailbox and the shutdown signal.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use shardlink_core::envelope::{self, MAX_FRAME_SIZE};
use shardlink_core::error::{ShardLinkError, ShardLinkResult};
use shardlink_core::Envelope;

use crate::connection::{ConnectionState, MAILBOX_CAPACITY};
use crate::server::ServerInner;

/// Body served on `GET /`.
pub(crate) const INDEX_BODY: &str = "This is a websocket IPC server for shardlink";

pub(crate) fn router(inner: Arc<ServerInner>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/ws", get(upgrade))
        .with_state(inner)
}

async fn index() -> &'static str {
    INDEX_BODY
}

async fn upgrade(
    ws: WebSocketUpgrade,
    State(inner): State<Arc<ServerInner>>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
) -> Response {
    ws.max_message_size(MAX_FRAME_SIZE)
        .on_upgrade(move |socket| handle_socket(inner, socket, remote))
}

/// Drive one socket until it closes or the server shuts down.
async fn handle_socket(inner: Arc<ServerInner>, socket: WebSocket, remote: SocketAddr) {
    let mut shutdown_rx = inner.shutdown_tx.subscribe();
    if inner.is_closed() {
        return;
    }

    let conn_id = inner.next_conn_id();
    let (tx, mut mailbox) = mpsc::channel::<Envelope>(MAILBOX_CAPACITY);
    inner
        .register_connection(ConnectionState::new(conn_id, remote, tx))
        .await;
    info!(conn_id, remote = %remote, "WebSocket connection accepted");

    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                debug!(conn_id, "shutdown signal received, closing socket");
                let _ = sink.send(Message::Close(None)).await;
                break;
            }

            Some(env) = mailbox.recv() => {
                if let Err(e) = write(&mut sink, &env).await {
                    debug!(conn_id, error = %e, "write failed");
                    break;
                }
            }

            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    if let Some(reply) = inner.on_frame(conn_id, text.as_str()).await {
                        if let Err(e) = write(&mut sink, &reply).await {
                            debug!(conn_id, error = %e, "write failed");
                            break;
                        }
                    }
                }
                Some(Ok(Message::Binary(_))) => {
                    warn!(conn_id, "ignoring binary frame");
                }
                Some(Ok(Message::Close(_))) | None => {
                    debug!(conn_id, "peer closed the socket");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(conn_id, error = %e, "socket error");
                    break;
                }
            },
        }
    }

    inner.disconnect(conn_id).await;
}

async fn write(sink: &mut SplitSink<WebSocket, Message>, env: &Envelope) -> ShardLinkResult<()> {
    let text = envelope::encode(env)?;
    sink.send(Message::Text(text.into()))
        .await
        .map_err(|e| ShardLinkError::Transport(format!("WS send failed: {e}")))
}
