//! Request routing, relaying and broadcast fan-out.

use std::sync::Arc;

use futures_util::future::join_all;
use serde_json::Value;
use tracing::{debug, warn};

use shardlink_core::envelope;
use shardlink_core::error::{ShardLinkError, ShardLinkResult};
use shardlink_core::handler::{BroadcastHandler, BroadcastReply, LoginResponse, Peer};
use shardlink_core::{Envelope, Handler, Owner, LOGIN_HANDLER};

use crate::server::{ReturnPath, ServerInner};

impl ServerInner {
    /// Handle one inbound text frame from `conn_id`.
    ///
    /// Returns a reply the socket actor must write itself. Everything else
    /// goes through mailboxes.
    pub(crate) async fn on_frame(self: &Arc<Self>, conn_id: u64, text: &str) -> Option<Envelope> {
        if !self.is_authenticated(conn_id).await {
            return match envelope::decode_as_login(text) {
                Ok(env) => Some(self.handle_login(conn_id, env).await),
                Err(e) => {
                    warn!(conn_id, error = %e, "unreadable frame before login");
                    let failure = LoginResponse::rejected(format!("malformed login: {e}"));
                    Some(Envelope::request(LOGIN_HANDLER, None, Value::Null).response_to(failure.to_data()))
                }
            };
        }

        let env = match envelope::decode(text) {
            Ok(env) => env,
            Err(e) => {
                warn!(conn_id, error = %e, "dropping malformed frame");
                return None;
            }
        };

        if env.is_response() {
            self.on_response(conn_id, env).await;
            return None;
        }

        let handler = match self.registry.get(&env.handler) {
            Ok(handler) => handler.clone(),
            Err(e) => {
                warn!(conn_id, error = %e, "no handler, cannot route request");
                return None;
            }
        };

        if matches!(handler, Handler::Login) {
            return Some(self.handle_login(conn_id, env).await);
        }

        let inner = self.clone();
        tokio::spawn(async move { inner.route_request(conn_id, handler, env).await });
        None
    }

    /// Route an authenticated request according to its handler variant.
    async fn route_request(self: Arc<Self>, origin: u64, handler: Handler, env: Envelope) {
        debug!(origin, handler = %env.handler, rtoken = ?env.rtoken, "routing request");

        if handler.server_reply() {
            if let Some(reply) = handler.answer(env.data.clone()).await {
                self.reply(origin, &env, reply).await;
            }
            return;
        }

        match handler {
            Handler::Login => {}
            Handler::PointToPoint(h) => {
                let owner = {
                    let owners = self.ownership.read().await;
                    h.route(&owners, &env.data)
                };
                match owner {
                    Some(Owner::Local) => {
                        if let Some(reply) = h.answer(env.data.clone()).await {
                            self.reply(origin, &env, reply).await;
                        }
                    }
                    Some(Owner::Remote(target)) => self.relay(origin, target, env).await,
                    None => match h.unrouted(&env.data) {
                        Some(reply) => self.reply(origin, &env, reply).await,
                        None => warn!(origin, handler = %env.handler, "no owner for request"),
                    },
                }
            }
            Handler::Broadcast(h) => {
                if env.rtoken.is_none() {
                    self.notify_all(&h, env.data).await;
                    return;
                }
                let merged = self.fan_out(&h, env.data.clone()).await;
                self.reply(origin, &env, merged).await;
            }
        }
    }

    /// Forward a request verbatim, remembering where its response goes.
    ///
    /// With a request timeout configured the return path expires after it,
    /// so a target that never answers does not pin the entry.
    async fn relay(self: &Arc<Self>, origin: u64, target: u64, env: Envelope) {
        let rtoken = env.rtoken.clone();
        if let Some(rtoken) = &rtoken {
            let path = ReturnPath { origin, target };
            self.return_paths.lock().await.insert(rtoken.clone(), path);
            if let Some(limit) = self.config.request_timeout {
                let inner = self.clone();
                let rtoken = rtoken.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(limit).await;
                    inner.expire_return_path(&rtoken, path).await;
                });
            }
        }
        debug!(origin, target, handler = %env.handler, "relaying request");

        if let Err(e) = self.send_to(target, env).await {
            warn!(origin, target, error = %e, "relay failed");
            if let Some(rtoken) = rtoken {
                self.return_paths.lock().await.remove(&rtoken);
            }
        }
    }

    async fn expire_return_path(&self, rtoken: &str, path: ReturnPath) {
        let mut paths = self.return_paths.lock().await;
        if paths.get(rtoken) == Some(&path) {
            paths.remove(rtoken);
            debug!(rtoken, origin = path.origin, target = path.target, "return path expired");
        }
    }

    /// Send a response back to the asker when it expects one.
    async fn reply(&self, conn_id: u64, request: &Envelope, data: Value) {
        if request.rtoken.is_none() {
            return;
        }
        if let Err(e) = self.send_to(conn_id, request.response_to(data)).await {
            debug!(conn_id, handler = %request.handler, error = %e, "reply not delivered");
        }
    }

    /// Deliver a response: server waiter first, then return path.
    async fn on_response(self: &Arc<Self>, from: u64, env: Envelope) {
        let env = match self.pending.resolve(env) {
            Ok(()) => return,
            Err(env) => env,
        };

        let path = match env.rtoken.as_deref() {
            Some(rtoken) => self.return_paths.lock().await.remove(rtoken),
            None => None,
        };
        let Some(path) = path else {
            let orphan = ShardLinkError::OrphanResponse(env.rtoken.clone().unwrap_or_default());
            warn!(from, handler = %env.handler, error = %orphan, "dropping response");
            return;
        };

        // Off the actor so two sockets relaying to each other never wait on
        // each other's mailbox.
        let inner = self.clone();
        tokio::spawn(async move {
            if let Err(e) = inner.send_to(path.origin, env).await {
                debug!(from, origin = path.origin, error = %e, "relayed response not delivered");
            }
        });
    }

    /// The server plus every authenticated client, server first.
    async fn peers(&self) -> Vec<Peer> {
        let connections = self.connections.read().await;
        let mut peers = Vec::with_capacity(connections.len() + 1);
        peers.push(Peer {
            owner: Owner::Local,
            name: self.config.name.clone(),
        });
        peers.extend(connections.values().filter(|c| c.authenticated).map(|c| Peer {
            owner: Owner::Remote(c.id),
            name: c.name.clone(),
        }));
        peers
    }

    /// Ask every target and merge the answers.
    ///
    /// A target that fails, times out or disconnects is left out.
    pub(crate) async fn fan_out(&self, handler: &Arc<dyn BroadcastHandler>, data: Value) -> Value {
        let peers = self.peers().await;
        let targets = handler.targets(&peers, &data);
        debug!(handler = handler.name(), targets = targets.len(), "fanning out");

        let calls = targets.into_iter().map(|peer| {
            let handler = handler.clone();
            let data = data.clone();
            async move {
                let answer = match peer.owner {
                    Owner::Local => handler.answer(data).await,
                    Owner::Remote(id) => match self.call_peer(id, handler.name(), data).await {
                        Ok(reply) => Some(reply.data),
                        Err(e) => {
                            debug!(peer = %peer.name, error = %e, "broadcast target did not answer");
                            None
                        }
                    },
                };
                answer.map(|data| BroadcastReply { peer, data })
            }
        });

        let replies: Vec<BroadcastReply> = join_all(calls).await.into_iter().flatten().collect();
        handler.aggregate(replies)
    }

    /// Fire-and-forget broadcast.
    async fn notify_all(&self, handler: &Arc<dyn BroadcastHandler>, data: Value) {
        let peers = self.peers().await;
        for peer in handler.targets(&peers, &data) {
            match peer.owner {
                Owner::Local => {
                    handler.answer(data.clone()).await;
                }
                Owner::Remote(id) => {
                    let env = Envelope::request(handler.name(), None, data.clone());
                    if let Err(e) = self.send_to(id, env).await {
                        debug!(peer = %peer.name, error = %e, "notify not delivered");
                    }
                }
            }
        }
    }

    /// Send a request to one connection and wait for its response.
    pub(crate) async fn call_peer(&self, conn_id: u64, handler: &str, data: Value) -> ShardLinkResult<Envelope> {
        let call = self.pending.register(Some(conn_id));
        let env = Envelope::request(handler, Some(call.rtoken().to_string()), data);
        self.send_to(conn_id, env).await?;
        call.wait(self.config.request_timeout).await
    }

    /// Run a request on behalf of the server itself.
    pub(crate) async fn originate(&self, name: &str, args: Value) -> ShardLinkResult<Option<Value>> {
        let handler = self.registry.get(name)?.clone();
        let data = handler.build_request(args)?;

        if handler.server_reply() && !matches!(handler, Handler::Login) {
            return Ok(handler.answer(data).await);
        }

        match handler {
            Handler::Login => Err(ShardLinkError::InvalidMessage(
                "the server does not log in".into(),
            )),
            Handler::PointToPoint(h) => {
                let owner = {
                    let owners = self.ownership.read().await;
                    h.route(&owners, &data)
                };
                match owner {
                    Some(Owner::Local) => Ok(h.answer(data).await),
                    Some(Owner::Remote(target)) if !h.wait() => {
                        self.send_to(target, Envelope::request(name, None, data)).await?;
                        Ok(None)
                    }
                    Some(Owner::Remote(target)) => {
                        Ok(Some(self.call_peer(target, name, data).await?.data))
                    }
                    None => Ok(h.unrouted(&data)),
                }
            }
            Handler::Broadcast(h) => {
                if !h.wait() {
                    self.notify_all(&h, data).await;
                    return Ok(None);
                }
                Ok(Some(self.fan_out(&h, data).await))
            }
        }
    }
}
