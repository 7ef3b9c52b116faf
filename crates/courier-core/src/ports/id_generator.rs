//! IdGenerator port - ID 生成の抽象化
//!
//! # 実装
//! - **UlidGenerator**: ULID ベース（本番用）

use ulid::Ulid;

use crate::domain::ArtifactId;
use crate::ports::Clock;

/// Generates artifact ids.
///
/// `Send + Sync` because the queue calls it from whatever task enqueues.
pub trait IdGenerator: Send + Sync {
    fn generate_artifact_id(&self) -> ArtifactId;
}

/// ULID generator driven by a [`Clock`].
///
/// The timestamp half comes from the clock, the rest is random, so a
/// FixedClock still yields distinct ids.
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_artifact_id(&self) -> ArtifactId {
        let timestamp_ms = self.clock.now().timestamp_millis().max(0) as u64;
        let ulid = Ulid::from_parts(timestamp_ms, rand::random());
        ArtifactId::from_ulid(ulid)
    }
}
