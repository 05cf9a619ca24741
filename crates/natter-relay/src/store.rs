//! Per-identity message logs.
//!
//! Every identity owns one append-only log. A delivered message is written to
//! both the sender's and the recipient's log, and each log numbers its entries
//! independently starting at 1.
//!
//! ```text
//! append(alice, bob, "hi")
//!        |
//!        +--> log[alice]: #1 alice->bob "hi"
//!        +--> log[bob]:   #1 alice->bob "hi"
//! ```

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::error::StoreError;
use crate::types::Identity;

/// A message as recorded in one identity's log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    /// Position in the owning log, starting at 1
    pub seq: u64,
    /// When the store accepted the message
    pub timestamp: DateTime<Utc>,
    /// Sender identity
    pub from: Identity,
    /// Recipient identity
    pub to: Identity,
    /// Message text
    pub content: String,
}

/// Append-only message storage.
///
/// Implementations must be safe to share across sessions. Reads of one log
/// must not block appends to another.
#[async_trait]
pub trait MessageStore: Send + Sync + 'static {
    /// Record a message in the sender's and the recipient's logs.
    ///
    /// Returns the sequence numbers assigned in the sender's and the
    /// recipient's log, in that order.
    async fn append(
        &self,
        from: &Identity,
        to: &Identity,
        content: &str,
    ) -> Result<(u64, u64), StoreError>;

    /// All entries of `identity`'s log with `seq >= since_seq`, oldest first.
    async fn query(
        &self,
        identity: &Identity,
        since_seq: u64,
    ) -> Result<Vec<StoredMessage>, StoreError>;

    /// Newest sequence number in `identity`'s log, 0 if the log is empty.
    async fn last_seq(&self, identity: &Identity) -> Result<u64, StoreError>;
}

#[derive(Debug, Default)]
struct MessageLog {
    messages: Vec<StoredMessage>,
}

impl MessageLog {
    fn append(
        &mut self,
        from: &Identity,
        to: &Identity,
        content: &str,
        timestamp: DateTime<Utc>,
    ) -> u64 {
        let seq = self.messages.len() as u64 + 1;
        self.messages.push(StoredMessage {
            seq,
            timestamp,
            from: from.clone(),
            to: to.clone(),
            content: content.to_string(),
        });
        seq
    }

    // Sequence numbers are dense, so entry `seq` lives at index `seq - 1`.
    fn since(&self, since_seq: u64) -> Vec<StoredMessage> {
        let start = usize::try_from(since_seq.saturating_sub(1)).unwrap_or(usize::MAX);
        self.messages
            .get(start..)
            .map(<[StoredMessage]>::to_vec)
            .unwrap_or_default()
    }

    fn last_seq(&self) -> u64 {
        self.messages.len() as u64
    }
}

/// In-memory message store.
///
/// Logs live for the lifetime of the process. The map of logs is sharded by
/// DashMap and each log has its own lock, so a reader of one log only
/// contends with writers of that same log.
#[derive(Debug, Default)]
pub struct InMemoryMessageStore {
    logs: DashMap<Identity, Arc<RwLock<MessageLog>>>,
}

impl InMemoryMessageStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of identities that own a log.
    pub fn log_count(&self) -> usize {
        self.logs.len()
    }

    fn log_for(&self, identity: &Identity) -> Arc<RwLock<MessageLog>> {
        if let Some(log) = self.logs.get(identity) {
            return Arc::clone(log.value());
        }
        Arc::clone(self.logs.entry(identity.clone()).or_default().value())
    }

    fn existing_log(&self, identity: &Identity) -> Option<Arc<RwLock<MessageLog>>> {
        self.logs.get(identity).map(|log| Arc::clone(log.value()))
    }

    fn append_to(
        &self,
        owner: &Identity,
        from: &Identity,
        to: &Identity,
        content: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let log = self.log_for(owner);
        let mut log = log
            .write()
            .map_err(|_| StoreError::poisoned(owner.as_str()))?;
        Ok(log.append(from, to, content, timestamp))
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    #[instrument(skip(self, content), fields(from = %from, to = %to))]
    async fn append(
        &self,
        from: &Identity,
        to: &Identity,
        content: &str,
    ) -> Result<(u64, u64), StoreError> {
        let timestamp = Utc::now();

        let from_seq = self.append_to(from, from, to, content, timestamp)?;
        let to_seq = self.append_to(to, from, to, content, timestamp)?;
        debug!(from_seq, to_seq, "Stored message");
        Ok((from_seq, to_seq))
    }

    async fn query(
        &self,
        identity: &Identity,
        since_seq: u64,
    ) -> Result<Vec<StoredMessage>, StoreError> {
        let Some(log) = self.existing_log(identity) else {
            return Ok(Vec::new());
        };
        let log = log
            .read()
            .map_err(|_| StoreError::poisoned(identity.as_str()))?;
        Ok(log.since(since_seq))
    }

    async fn last_seq(&self, identity: &Identity) -> Result<u64, StoreError> {
        let Some(log) = self.existing_log(identity) else {
            return Ok(0);
        };
        let log = log
            .read()
            .map_err(|_| StoreError::poisoned(identity.as_str()))?;
        Ok(log.last_seq())
    }
}
