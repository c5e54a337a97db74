//! shardlink-server: the rendezvous endpoint of a shardlink cluster.
//!
//! Accepts WebSocket connections on `/ws`, authenticates them with the shared
//! secret, keeps the shard and guild ownership maps, and routes every request
//! to the server's own handlers, to the single owning peer, or to everyone.

pub mod config;
pub mod connection;
mod login;
mod routing;
pub mod server;
mod transport;

pub use config::ServerConfig;
pub use connection::ConnectionInfo;
pub use server::IpcServer;
