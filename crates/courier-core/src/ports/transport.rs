//! UploadTransport port - 1 件の artifact をリモートへ届ける
//!
//! # 契約
//! - 1 回の呼び出しで 1 artifact
//! - artifact id に対して冪等であること（at-least-once 配送を前提にしている）
//! - 結果は成功 / 失敗のみ。失敗の種類によらずキュー側は retry_count を進める

use std::time::Duration;

use async_trait::async_trait;

use crate::queue::QueuedArtifact;

/// Why a delivery attempt failed. Every variant is treated as transient.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("network error: {0}")]
    Network(String),

    #[error("server rejected upload with status {status}: {message}")]
    Server { status: u16, message: String },

    #[error("upload timed out after {0:?}")]
    Timeout(Duration),

    #[error("I/O error: {0}")]
    Io(String),
}

#[async_trait]
pub trait UploadTransport: Send + Sync {
    /// Deliver one artifact. May suspend for a network round trip; the caller
    /// bounds it with a timeout.
    async fn send(&self, artifact: &QueuedArtifact) -> Result<(), TransportError>;
}
