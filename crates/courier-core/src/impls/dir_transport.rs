//! Outbox directory transport.
//!
//! Each artifact becomes `<outbox>/<id>.json`, written to `<id>.json.part`
//! first and renamed. Re-delivering the same id overwrites the same file.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::domain::{ArtifactId, Attributes, Payload};
use crate::ports::{TransportError, UploadTransport};
use crate::queue::QueuedArtifact;

/// Document written per delivered artifact.
#[derive(Debug, Serialize)]
struct Delivery<'a> {
    id: ArtifactId,
    payload: &'a Payload,
    attributes: &'a Attributes,
    enqueued_at: DateTime<Utc>,
    /// 1 on the first delivery attempt.
    attempt: u32,
}

#[derive(Debug, Clone)]
pub struct DirectoryTransport {
    outbox: PathBuf,
}

impl DirectoryTransport {
    pub fn new(outbox: impl Into<PathBuf>) -> Self {
        Self {
            outbox: outbox.into(),
        }
    }

    pub fn outbox(&self) -> &PathBuf {
        &self.outbox
    }

    pub fn delivered_path(&self, id: ArtifactId) -> PathBuf {
        self.outbox.join(format!("{id}.json"))
    }
}

fn io_error(err: std::io::Error) -> TransportError {
    TransportError::Io(err.to_string())
}

#[async_trait]
impl UploadTransport for DirectoryTransport {
    async fn send(&self, artifact: &QueuedArtifact) -> Result<(), TransportError> {
        let doc = Delivery {
            id: artifact.id,
            payload: &artifact.payload,
            attributes: &artifact.attributes,
            enqueued_at: artifact.enqueued_at,
            attempt: artifact.retry_count.saturating_add(1),
        };
        let body = serde_json::to_vec_pretty(&doc).map_err(|e| TransportError::Io(e.to_string()))?;

        tokio::fs::create_dir_all(&self.outbox).await.map_err(io_error)?;

        let target = self.delivered_path(artifact.id);
        let part = self.outbox.join(format!("{}.json.part", artifact.id));
        tokio::fs::write(&part, &body).await.map_err(io_error)?;
        tokio::fs::rename(&part, &target).await.map_err(io_error)?;

        debug!(artifact_id = %artifact.id, path = %target.display(), "artifact written to outbox");
        Ok(())
    }
}
