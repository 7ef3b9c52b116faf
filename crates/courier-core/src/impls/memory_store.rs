use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use crate::ports::store::decode_slot;
use crate::ports::{PersistentStore, StoreError};
use crate::queue::QueuedArtifact;

/// In-process slot holding the same JSON a file store would write.
///
/// Saves can be made to fail, and raw (possibly corrupt) content can be
/// injected, to exercise the queue's persistence error paths.
#[derive(Debug, Default)]
pub struct MemoryStore {
    slot: Mutex<Option<String>>,
    fail_saves: AtomicBool,
    saves: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_raw(raw: impl Into<String>) -> Self {
        Self {
            slot: Mutex::new(Some(raw.into())),
            ..Self::default()
        }
    }

    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    /// Successful saves so far.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn raw(&self) -> Option<String> {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl PersistentStore for MemoryStore {
    fn load(&self) -> Result<Vec<QueuedArtifact>, StoreError> {
        let slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(slot
            .as_deref()
            .map(|raw| decode_slot(raw, "memory"))
            .unwrap_or_default())
    }

    fn save(&self, artifacts: &[QueuedArtifact]) -> Result<(), StoreError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store rejects saves".to_string()));
        }
        let raw = serde_json::to_string(artifacts)?;
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(raw);
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
