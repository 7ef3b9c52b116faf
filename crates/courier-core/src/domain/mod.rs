//! Domain model (ids, payload, events).

pub mod events;
pub mod ids;
pub mod payload;

pub use events::QueueEvent;
pub use ids::{ArtifactId, ParseIdError};
pub use payload::{Attributes, Payload};
