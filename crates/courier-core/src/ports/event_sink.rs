//! EventSink port - イベント記録の抽象化
//!
//! # 実装
//! - TracingEventSink: tracing へ出力（デフォルト）
//! - MemoryEventSink: メモリに蓄積（テスト、テレメトリ集計用）

use crate::domain::QueueEvent;

/// Receives every queue event.
///
/// Called while the queue lock is held, so implementations must not block
/// for long and must not call back into the queue.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &QueueEvent);
}
