//! shardlink-client: the client endpoint of a shardlink cluster.
//!
//! An [`IpcClient`] owns one outbound WebSocket connection to the server,
//! logs in with the shared secret, keeps the connection alive across server
//! restarts, answers inbound requests with the registered handlers, and
//! exposes [`IpcClient::send_request`] for correlated calls.

pub mod client;
mod connection;

pub use client::{ClientConfig, ConnectionStatus, IpcClient};
