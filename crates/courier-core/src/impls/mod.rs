//! Impls - ports の実装
//!
//! - **JsonFileStore** / **MemoryStore**: PersistentStore
//! - **ManualConnectivity** / **PollingConnectivity**: ConnectivityMonitor
//! - **DirectoryTransport**: UploadTransport（outbox ディレクトリへ書き出す）
//! - **TracingEventSink** / **MemoryEventSink**: EventSink

pub mod connectivity;
pub mod dir_transport;
pub mod event_sink;
pub mod file_store;
pub mod memory_store;

pub use self::connectivity::{ManualConnectivity, PollingConnectivity, Probe, TcpProbe};
pub use self::dir_transport::DirectoryTransport;
pub use self::event_sink::{MemoryEventSink, TracingEventSink};
pub use self::file_store::JsonFileStore;
pub use self::memory_store::MemoryStore;
