//! courier-core
//!
//! Offline-durable upload queue. Captured artifacts are persisted on every
//! change and delivered one at a time when the network allows.
//!
//! # モジュール構成
//! - **domain**: ids, payload, events
//! - **ports**: 抽象化レイヤー（PersistentStore, ConnectivityMonitor, UploadTransport, Clock, IdGenerator, EventSink）
//! - **queue**: UploadQueue と retry/drop の状態遷移
//! - **sync_loop**: タイマー・再接続・手動トリガーで配送を進める
//! - **impls**: ports の実装（file/memory store, connectivity, outbox transport, event sinks）
//! - **config** / **error** / **observability**

pub mod config;
pub mod domain;
pub mod error;
pub mod impls;
pub mod observability;
pub mod ports;
pub mod queue;
pub mod sync_loop;

pub use config::{ConfigError, QueueConfig};
pub use domain::{ArtifactId, Attributes, Payload, QueueEvent};
pub use error::{Applied, QueueError};
pub use observability::QueueStatus;
pub use queue::{AttemptGuard, Claim, FailureDisposition, QueuedArtifact, RetryPolicy, UploadQueue};
pub use sync_loop::{SyncHandle, SyncLoop, TickOutcome, Trigger};
