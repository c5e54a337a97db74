//! shardlink-core: Shared protocol library for shardlink.
//!
//! Provides the JSON wire envelope, the error taxonomy, correlation tokens,
//! the pending-call table, the handler traits and registry, the built-in
//! handlers, server-side ownership maps, and the shared config file model.

pub mod config;
pub mod envelope;
pub mod error;
pub mod handler;
pub mod member;
pub mod ownership;
pub mod pending;
pub mod token;

// Re-export commonly used items at crate root.
pub use config::ConfigFile;
pub use envelope::{Envelope, EnvelopeKind};
pub use error::{ShardLinkError, ShardLinkResult};
pub use handler::{Handler, HandlerRegistry, LOGIN_HANDLER};
pub use member::{ClusterMember, GuildRecord, GuildSummary, ShardStatus, StaticMember};
pub use ownership::{OwnershipMap, Owner};
pub use pending::PendingCalls;
pub use token::{generate_rtoken, secrets_match};
