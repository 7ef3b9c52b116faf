use serde::{Deserialize, Serialize};

/// Read-only status for a pending-uploads indicator.
///
/// Counters cover the lifetime of this queue instance. At any point
/// `pending == loaded + enqueued - delivered - dropped`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStatus {
    pub pending: usize,
    pub is_syncing: bool,

    /// Filled in by the sync loop, which owns the connectivity monitor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_online: Option<bool>,

    /// Storage is behind memory after a failed persist.
    pub needs_persist: bool,

    /// Artifacts restored from storage at open.
    pub loaded: usize,
    pub enqueued: u64,
    pub delivered: u64,
    pub failed_attempts: u64,
    pub dropped: u64,
}
