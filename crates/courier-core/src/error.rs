use thiserror::Error;

use crate::domain::ArtifactId;
use crate::ports::StoreError;
use crate::queue::FailureDisposition;

/// The in-memory change a failed persist left in place.
#[derive(Debug, Clone, PartialEq)]
pub enum Applied {
    /// The artifact is queued under this id and will be delivered.
    Enqueued(ArtifactId),
    /// `true` if the artifact was removed.
    Delivered(bool),
    Failure(FailureDisposition),
    RetriesReset(usize),
    /// `flush` changes nothing in memory.
    Nothing,
}

#[derive(Debug, Error)]
pub enum QueueError {
    /// The persisted slot could not be read at all (corruption is not an
    /// error; it loads as empty).
    #[error("failed to load persisted queue: {0}")]
    Load(#[source] StoreError),

    /// The mutation was applied in memory but could not be persisted.
    /// `applied` carries what the call would have returned.
    #[error("failed to persist queue: {source}")]
    Persist {
        #[source]
        source: StoreError,
        applied: Applied,
    },
}

impl QueueError {
    pub fn applied(&self) -> Option<&Applied> {
        match self {
            QueueError::Persist { applied, .. } => Some(applied),
            QueueError::Load(_) => None,
        }
    }

    /// Id of an artifact that was queued even though the save failed.
    pub fn enqueued_id(&self) -> Option<ArtifactId> {
        match self.applied() {
            Some(Applied::Enqueued(id)) => Some(*id),
            _ => None,
        }
    }
}
