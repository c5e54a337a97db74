//! Background connection loop of the client endpoint.
//!
//! One iteration: open the socket, send the login, then multiplex the
//! outgoing mailbox, inbound frames and the shutdown signal until the socket
//! goes away. Between iterations the loop sleeps for the fixed reconnect
//! delay.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use shardlink_core::envelope;
use shardlink_core::error::{ShardLinkError, ShardLinkResult};
use shardlink_core::handler::{LoginRequest, LoginResponse};
use shardlink_core::{Envelope, LOGIN_HANDLER};

use crate::client::{closed, ConnectionStatus, Shared};

/// Per-connection outgoing mailbox size.
const OUTGOING_CAPACITY: usize = 64;

/// Run until the endpoint is shut down.
pub(crate) async fn run(shared: Arc<Shared>) {
    let mut shutdown_rx = shared.shutdown_rx();
    let delay = shared.config.reconnect_delay;

    loop {
        if shared.is_closed() {
            break;
        }
        shared.set_status(ConnectionStatus::Connecting);

        match serve(&shared, &mut shutdown_rx).await {
            Ok(()) => info!(url = %shared.config.url, "connection closed"),
            Err(e) => warn!(url = %shared.config.url, error = %e, "connection failed"),
        }
        // Offline before the mailbox goes, so senders never see a stale Online.
        shared.set_status(ConnectionStatus::Disconnected);
        shared.set_outgoing(None);

        if shared.is_closed() {
            break;
        }
        debug!(delay_ms = delay.as_millis() as u64, "reconnecting after delay");

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = closed(&mut shutdown_rx) => break,
        }
    }

    shared.set_status(ConnectionStatus::Disconnected);
    debug!("connection loop ended");
}

/// One connection: connect, login, serve until the socket closes.
async fn serve(shared: &Arc<Shared>, shutdown_rx: &mut watch::Receiver<bool>) -> ShardLinkResult<()> {
    let connected = tokio::select! {
        result = connect_async(shared.config.url.as_str()) => result,
        _ = closed(shutdown_rx) => return Ok(()),
    };
    let (ws, _response) =
        connected.map_err(|e| ShardLinkError::Transport(format!("WebSocket connect error: {e}")))?;
    info!(url = %shared.config.url, "WebSocket connected");

    let (mut sink, mut stream) = ws.split();
    let (out_tx, mut out_rx) = mpsc::channel::<Envelope>(OUTGOING_CAPACITY);

    // Login goes out before anything else on this socket.
    let login_call = shared.pending.register(None);
    let login = LoginRequest::for_member(
        shared.config.shared_secret.clone(),
        shared.member.as_ref(),
        shared.config.name.clone(),
    );
    let login_env = Envelope::request(
        LOGIN_HANDLER,
        Some(login_call.rtoken().to_string()),
        login.to_data()?,
    );
    sink.send(Message::Text(envelope::encode(&login_env)?))
        .await
        .map_err(|e| ShardLinkError::Transport(format!("WS write error: {e}")))?;
    debug!(shards = login.shards.len(), guilds = login.guilds.len(), "login sent");

    shared.set_outgoing(Some(out_tx.clone()));

    let login_reply = login_call.wait(None);
    tokio::pin!(login_reply);
    let mut login_done = false;

    loop {
        tokio::select! {
            reply = &mut login_reply, if !login_done => {
                login_done = true;
                if let Ok(reply) = reply {
                    on_login_reply(shared, reply);
                }
            }

            Some(env) = out_rx.recv() => {
                let text = match envelope::encode(&env) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(handler = %env.handler, error = %e, "failed to encode envelope");
                        continue;
                    }
                };
                sink.send(Message::Text(text))
                    .await
                    .map_err(|e| ShardLinkError::Transport(format!("WS write error: {e}")))?;
            }

            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) => on_frame(shared, &out_tx, &text),
                Some(Ok(Message::Binary(_))) => {
                    debug!("ignoring binary frame");
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!(?frame, "server closed the connection");
                    return Ok(());
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    return Err(ShardLinkError::Transport(format!("WS read error: {e}")));
                }
                None => return Ok(()),
            },

            _ = closed(shutdown_rx) => {
                let _ = sink.send(Message::Close(None)).await;
                return Ok(());
            }
        }
    }
}

fn on_login_reply(shared: &Shared, reply: Envelope) {
    let response = LoginResponse::from_data(&reply.data);
    if response.success {
        info!(message = %response.message, "logged in");
        shared.set_status(ConnectionStatus::Online);
    } else {
        warn!(message = %response.message, "login rejected by server");
        shared.set_status(ConnectionStatus::Rejected);
    }
}

/// Dispatch one inbound text frame.
fn on_frame(shared: &Arc<Shared>, out_tx: &mpsc::Sender<Envelope>, text: &str) {
    let env = match envelope::decode(text) {
        Ok(env) => env,
        Err(e) => {
            warn!(error = %e, "dropping malformed frame");
            return;
        }
    };

    if env.is_response() {
        if let Err(orphan) = shared.pending.resolve(env) {
            warn!(
                handler = %orphan.handler,
                rtoken = orphan.rtoken.as_deref().unwrap_or("-"),
                "dropping response with no waiter"
            );
        }
        return;
    }

    let handler = match shared.registry.get(&env.handler) {
        Ok(handler) => handler.clone(),
        Err(e) => {
            warn!(error = %e, "dropping request");
            return;
        }
    };

    // Answer off the read loop so a slow handler never stalls the socket.
    let out_tx = out_tx.clone();
    tokio::spawn(async move {
        let Some(reply) = handler.answer(env.data.clone()).await else {
            return;
        };
        if env.rtoken.is_none() {
            return;
        }
        if out_tx.send(env.response_to(reply)).await.is_err() {
            debug!(handler = %env.handler, "connection gone before reply was sent");
        }
    });
}
