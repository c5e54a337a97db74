//! Server side of the login handshake.

use tracing::{info, warn};

use shardlink_core::handler::{LoginRequest, LoginResponse};
use shardlink_core::{secrets_match, Envelope, Owner};

use crate::server::ServerInner;

/// Name for a client that did not pick one: `Bot N`, N being the number of
/// connections already authenticated.
pub(crate) fn default_name(authenticated_peers: usize) -> String {
    format!("Bot {authenticated_peers}")
}

impl ServerInner {
    /// Check a login request and build the response envelope.
    ///
    /// A failed login leaves the connection open and unauthenticated.
    pub(crate) async fn handle_login(&self, conn_id: u64, env: Envelope) -> Envelope {
        let response = match LoginRequest::from_data(&env.data) {
            Err(e) => {
                warn!(conn_id, error = %e, "login rejected: malformed payload");
                LoginResponse::rejected(e.to_string())
            }
            Ok(request) if !secrets_match(&self.config.shared_secret, &request.shared_secret) => {
                warn!(conn_id, "login rejected: bad shared secret");
                LoginResponse::rejected("invalid shared secret")
            }
            Ok(request) => match self.authenticate(conn_id, request).await {
                Some(name) => LoginResponse::accepted(&name),
                None => LoginResponse::rejected("connection closed during login"),
            },
        };
        env.response_to(response.to_data())
    }

    /// Mark the connection authenticated and claim what it owns.
    async fn authenticate(&self, conn_id: u64, request: LoginRequest) -> Option<String> {
        let name = {
            let mut connections = self.connections.write().await;
            let peers = connections
                .values()
                .filter(|c| c.authenticated && c.id != conn_id)
                .count();
            let conn = connections.get_mut(&conn_id)?;
            conn.name = request
                .name
                .clone()
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| default_name(peers));
            conn.authenticated = true;
            conn.name.clone()
        };

        {
            let mut ownership = self.ownership.write().await;
            // A re-login replaces the earlier claims.
            ownership.release(conn_id);
            ownership.claim(Owner::Remote(conn_id), &request.shards, &request.guilds);
        }

        info!(
            conn_id,
            name = %name,
            shards = ?request.shards,
            guilds = request.guilds.len(),
            "client logged in"
        );
        Some(name)
    }
}
