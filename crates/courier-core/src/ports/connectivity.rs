//! ConnectivityMonitor port - ネットワーク状態の抽象化
//!
//! 現在の online/offline と、その変化通知だけを提供する。
//! ポーリング実装でも OS イベント駆動でもよい。

use tokio::sync::watch;

pub trait ConnectivityMonitor: Send + Sync {
    /// Current state; `true` means online.
    fn is_online(&self) -> bool;

    /// Receiver that observes every state change.
    ///
    /// SyncLoop watches this for offline→online edges.
    fn subscribe(&self) -> watch::Receiver<bool>;
}
