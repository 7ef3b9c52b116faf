//! Attempt state machine.

use crate::domain::ArtifactId;

/// Whether a delivery attempt is outstanding.
///
/// State transitions:
/// - Idle -> Attempting (head claimed by `begin_attempt`)
/// - Attempting -> Idle (outcome reported for that artifact, or the claim
///   released by a dropped `AttemptGuard`)
///
/// This flag is the only mutual exclusion between attempts: a second claim
/// while `Attempting` is refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AttemptState {
    #[default]
    Idle,

    Attempting(ArtifactId),
}

impl AttemptState {
    pub fn is_attempting(self) -> bool {
        matches!(self, AttemptState::Attempting(_))
    }

    pub fn in_flight(self) -> Option<ArtifactId> {
        match self {
            AttemptState::Idle => None,
            AttemptState::Attempting(id) => Some(id),
        }
    }
}
