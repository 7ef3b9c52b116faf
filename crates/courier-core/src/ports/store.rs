//! PersistentStore port - キュー全体を保存する単一スロット
//!
//! # 契約
//! - `load`: 以前の状態がない、またはパースできない場合は空の列を返す（破損は致命的ではない）
//! - `save`: スロット全体を原子的に置き換える（途中状態は観測されない）
//! - どちらも同期的。`save` が返るまで呼び出し元の変更操作は完了しない

use tracing::warn;

use crate::queue::QueuedArtifact;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Durable slot holding the serialized queue.
pub trait PersistentStore: Send + Sync {
    /// Read the persisted sequence in delivery order.
    fn load(&self) -> Result<Vec<QueuedArtifact>, StoreError>;

    /// Replace the persisted sequence with `artifacts`.
    fn save(&self, artifacts: &[QueuedArtifact]) -> Result<(), StoreError>;
}

/// Decode a slot's raw JSON, treating anything unparseable as empty.
pub(crate) fn decode_slot(raw: &str, slot: &str) -> Vec<QueuedArtifact> {
    if raw.trim().is_empty() {
        return Vec::new();
    }
    match serde_json::from_str::<Vec<QueuedArtifact>>(raw) {
        Ok(artifacts) => artifacts,
        Err(err) => {
            warn!(slot, error = %err, "persisted queue is corrupt, starting empty");
            Vec::new()
        }
    }
}
