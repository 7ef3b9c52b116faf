//! Queued artifact: one unit of pending upload work.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{ArtifactId, Attributes, Payload};

/// One captured artifact awaiting delivery.
///
/// This is also the persisted record format: the store keeps an ordered JSON
/// array of these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedArtifact {
    pub id: ArtifactId,

    pub payload: Payload,

    /// Owner metadata, passed through to the transport.
    #[serde(default)]
    pub attributes: Attributes,

    /// Set once at enqueue time. Display only.
    pub enqueued_at: DateTime<Utc>,

    /// Failed delivery attempts so far.
    #[serde(default)]
    pub retry_count: u32,
}

impl QueuedArtifact {
    pub fn new(
        id: ArtifactId,
        payload: Payload,
        attributes: Attributes,
        enqueued_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            payload,
            attributes,
            enqueued_at,
            retry_count: 0,
        }
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }
}
