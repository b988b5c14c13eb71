use crate::model::AppointmentStatus;
use crate::notify::NoticeKind;

use super::EngineError;

use AppointmentStatus::*;

/// Outcome of a legal status request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Re-approving an approved appointment. Nothing is written or fired.
    Unchanged,
    Moved {
        from: AppointmentStatus,
        to: AppointmentStatus,
    },
}

/// Side effect owed by a transition, fired once on commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    Notify(NoticeKind),
    /// Credit the staff member with the service price and one completion.
    RecordCompletion,
}

/// Legal moves:
///
/// | from \ to    | APPROVED | COMPLETED | CANCELED |
/// |--------------|----------|-----------|----------|
/// | NOT_APPROVED | yes      | yes       | yes      |
/// | APPROVED     | no-op    | yes       | yes      |
/// | COMPLETED    | -        | -         | yes      |
/// | CANCELED     | -        | -         | -        |
///
/// Nothing ever moves back to NOT_APPROVED.
pub fn transition(from: AppointmentStatus, to: AppointmentStatus) -> Result<Transition, EngineError> {
    match (from, to) {
        (Approved, Approved) => Ok(Transition::Unchanged),
        (NotApproved, Approved | Completed | Canceled)
        | (Approved, Completed | Canceled)
        | (Completed, Canceled) => Ok(Transition::Moved { from, to }),
        _ => Err(EngineError::IllegalStatusTransition { from, to }),
    }
}

impl Transition {
    pub fn effect(&self) -> Option<Effect> {
        match self {
            Transition::Unchanged => None,
            Transition::Moved { to, .. } => match to {
                Approved => Some(Effect::Notify(NoticeKind::Approved)),
                Canceled => Some(Effect::Notify(NoticeKind::Canceled)),
                Completed => Some(Effect::RecordCompletion),
                NotApproved => None,
            },
        }
    }
}
