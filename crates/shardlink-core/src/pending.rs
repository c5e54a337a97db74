//! Pending-call table: rtoken → single-fulfillment waiter.
//!
//! A waiter is registered immediately before the correlated request is sent
//! and leaves the table when it is fulfilled, abandoned, or when its
//! [`PendingCall`] handle is dropped.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::debug;

use crate::envelope::Envelope;
use crate::error::{ShardLinkError, ShardLinkResult};
use crate::token::generate_rtoken;

struct Waiter {
    tx: oneshot::Sender<Envelope>,
    /// Connection the request was sent to, when the caller tracks it.
    target: Option<u64>,
}

type Table = Arc<Mutex<HashMap<String, Waiter>>>;

/// Shared table of outstanding correlated calls.
#[derive(Clone, Default)]
pub struct PendingCalls {
    table: Table,
}

impl PendingCalls {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a waiter under a fresh rtoken.
    ///
    /// `target` tags the waiter with the connection the request goes to so
    /// it can be abandoned if that connection disappears.
    pub fn register(&self, target: Option<u64>) -> PendingCall {
        let (tx, rx) = oneshot::channel();
        let mut table = lock(&self.table);
        let mut rtoken = generate_rtoken();
        while table.contains_key(&rtoken) {
            rtoken = generate_rtoken();
        }
        table.insert(rtoken.clone(), Waiter { tx, target });
        debug!(rtoken = %rtoken, pending = table.len(), "registered pending call");

        PendingCall {
            rtoken,
            rx,
            table: self.table.clone(),
        }
    }

    /// Deliver a response to its waiter.
    ///
    /// Hands the envelope back when no waiter holds its rtoken.
    pub fn resolve(&self, envelope: Envelope) -> Result<(), Envelope> {
        let waiter = match envelope.rtoken.as_deref() {
            Some(rtoken) => lock(&self.table).remove(rtoken),
            None => None,
        };
        match waiter {
            Some(waiter) => {
                // The caller may have given up between removal and send.
                let _ = waiter.tx.send(envelope);
                Ok(())
            }
            None => Err(envelope),
        }
    }

    /// Whether a waiter is registered under `rtoken`.
    pub fn contains(&self, rtoken: &str) -> bool {
        lock(&self.table).contains_key(rtoken)
    }

    /// Abandon every waiter whose request went to `target`.
    pub fn abandon_target(&self, target: u64) -> usize {
        let mut table = lock(&self.table);
        let before = table.len();
        table.retain(|_, waiter| waiter.target != Some(target));
        before - table.len()
    }

    /// Abandon every outstanding waiter.
    pub fn abandon_all(&self) -> usize {
        let mut table = lock(&self.table);
        let count = table.len();
        table.clear();
        count
    }

    /// Number of outstanding calls.
    pub fn len(&self) -> usize {
        lock(&self.table).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Handle for one outstanding call.
pub struct PendingCall {
    rtoken: String,
    rx: oneshot::Receiver<Envelope>,
    table: Table,
}

impl PendingCall {
    pub fn rtoken(&self) -> &str {
        &self.rtoken
    }

    /// Wait for the response, optionally bounded by `timeout`.
    ///
    /// Returns [`ShardLinkError::Closed`] if the waiter was abandoned.
    pub async fn wait(mut self, timeout: Option<Duration>) -> ShardLinkResult<Envelope> {
        let rx = &mut self.rx;
        let result = match timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(result) => result,
                Err(_) => return Err(ShardLinkError::Timeout),
            },
            None => rx.await,
        };
        result.map_err(|_| ShardLinkError::Closed)
    }
}

impl Drop for PendingCall {
    fn drop(&mut self) {
        lock(&self.table).remove(&self.rtoken);
    }
}

fn lock(table: &Table) -> MutexGuard<'_, HashMap<String, Waiter>> {
    table.lock().unwrap_or_else(PoisonError::into_inner)
}
