//! Queue module: artifact records, retry policy, attempt state and the
//! persistent upload queue.

mod record;
mod retry;
mod state;
mod upload_queue;

pub use record::QueuedArtifact;
pub use retry::{RetryDecision, RetryPolicy};
pub use state::AttemptState;
pub use upload_queue::{AttemptGuard, UploadQueue, UploadQueueBuilder};

use crate::domain::ArtifactId;

/// Result of asking the queue for the next artifact to attempt.
///
/// The check ("is an attempt outstanding? is the queue empty?") and the act
/// (mark the head in-flight) happen under one lock.
#[derive(Debug, Clone, PartialEq)]
pub enum Claim {
    /// Another attempt is outstanding for this artifact.
    Busy(ArtifactId),

    /// Nothing queued.
    Empty,

    /// The head, now marked in-flight. The caller must report its outcome.
    Ready(QueuedArtifact),
}

/// What `report_failure` did with the artifact.
#[derive(Debug, Clone, PartialEq)]
pub enum FailureDisposition {
    /// Moved to the tail with the new retry count.
    Requeued { retry_count: u32 },

    /// Retries exhausted; removed permanently. Carries the lost artifact so the
    /// caller can record it.
    Dropped(QueuedArtifact),

    /// No artifact with that id is queued.
    NotFound,
}

impl FailureDisposition {
    pub fn is_drop(&self) -> bool {
        matches!(self, FailureDisposition::Dropped(_))
    }
}
