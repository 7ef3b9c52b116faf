//! Events - キューで発生したドメインイベント
//!
//! UploadQueue は変更のたびに EventSink へイベントを送る。
//! 撮影データが失われるのは `Dropped` のときだけ。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ArtifactId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum QueueEvent {
    /// A new artifact was appended to the tail.
    Enqueued {
        artifact_id: ArtifactId,
        pending: usize,
    },

    /// The transport confirmed delivery and the artifact was removed.
    Delivered {
        artifact_id: ArtifactId,
        pending: usize,
    },

    /// A delivery attempt failed and the artifact moved to the tail.
    Requeued {
        artifact_id: ArtifactId,
        retry_count: u32,
        pending: usize,
    },

    /// Retries exhausted; the artifact is gone for good.
    Dropped {
        artifact_id: ArtifactId,
        attempts: u32,
        enqueued_at: DateTime<Utc>,
        pending: usize,
    },

    /// "Retry all": retry counts were zeroed.
    RetriesReset { artifacts: usize },

    /// Writing the slot failed; memory and storage disagree until the next
    /// successful persist.
    PersistFailed { error: String },
}

impl QueueEvent {
    pub fn name(&self) -> &'static str {
        match self {
            QueueEvent::Enqueued { .. } => "enqueued",
            QueueEvent::Delivered { .. } => "delivered",
            QueueEvent::Requeued { .. } => "requeued",
            QueueEvent::Dropped { .. } => "dropped",
            QueueEvent::RetriesReset { .. } => "retries_reset",
            QueueEvent::PersistFailed { .. } => "persist_failed",
        }
    }

    pub fn artifact_id(&self) -> Option<ArtifactId> {
        match self {
            QueueEvent::Enqueued { artifact_id, .. }
            | QueueEvent::Delivered { artifact_id, .. }
            | QueueEvent::Requeued { artifact_id, .. }
            | QueueEvent::Dropped { artifact_id, .. } => Some(*artifact_id),
            QueueEvent::RetriesReset { .. } | QueueEvent::PersistFailed { .. } => None,
        }
    }

    pub fn is_drop(&self) -> bool {
        matches!(self, QueueEvent::Dropped { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    #[test]
    fn events_are_tagged_by_name() {
        let id = ArtifactId::from_ulid(Ulid::new());
        let event = QueueEvent::Requeued {
            artifact_id: id,
            retry_count: 2,
            pending: 5,
        };

        let v = serde_json::to_value(&event).unwrap();
        assert_eq!(v["event"], "requeued");
        assert_eq!(v["artifact_id"], id.to_string());
        assert_eq!(v["retry_count"], 2);
        assert_eq!(event.name(), "requeued");
    }

    #[test]
    fn only_dropped_counts_as_drop() {
        let id = ArtifactId::from_ulid(Ulid::new());
        let dropped = QueueEvent::Dropped {
            artifact_id: id,
            attempts: 3,
            enqueued_at: Utc::now(),
            pending: 0,
        };
        let delivered = QueueEvent::Delivered {
            artifact_id: id,
            pending: 0,
        };

        assert!(dropped.is_drop());
        assert!(!delivered.is_drop());
        assert_eq!(dropped.artifact_id(), Some(id));
        assert_eq!(QueueEvent::RetriesReset { artifacts: 1 }.artifact_id(), None);
    }
}
