//! Ports - 抽象化レイヤー
//!
//! キューが依存する外部要素（ストレージ、ネットワーク状態、送信先、時刻、採番、
//! イベント記録）を trait として定義する。実装は構築時に注入するので、
//! テストでは決定的な fake に差し替えられる。

pub mod clock;
pub mod connectivity;
pub mod event_sink;
pub mod id_generator;
pub mod store;
pub mod transport;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::connectivity::ConnectivityMonitor;
pub use self::event_sink::EventSink;
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::store::{PersistentStore, StoreError};
pub use self::transport::{TransportError, UploadTransport};
