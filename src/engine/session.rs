// Recording session state machine.
//
// Idle → Starting → Recording → Idle. The poll interval handle lives inside
// the `Recording` variant, so leaving the state is what stops the poller —
// there is no separate flag to forget. Every state change bumps an epoch;
// timer firings and in-flight responses stamped with an older epoch are
// discarded instead of reviving a session that already ended.

use super::timer::TimerHandle;
use crate::protocol::Session;

#[derive(Debug)]
pub(crate) enum RecordingState {
    Idle,
    Starting {
        epoch: u64,
    },
    Recording {
        session: Session,
        epoch: u64,
        #[allow(dead_code)]
        poller: TimerHandle,
    },
}

impl RecordingState {
    pub(crate) fn is_idle(&self) -> bool {
        matches!(self, RecordingState::Idle)
    }

    pub(crate) fn is_recording(&self) -> bool {
        matches!(self, RecordingState::Recording { .. })
    }

    pub(crate) fn session_id(&self) -> Option<&str> {
        match self {
            RecordingState::Recording { session, .. } => Some(session.id.as_str()),
            _ => None,
        }
    }

    /// Epoch of the in-progress start or active session, if any.
    pub(crate) fn epoch(&self) -> Option<u64> {
        match self {
            RecordingState::Idle => None,
            RecordingState::Starting { epoch } => Some(*epoch),
            RecordingState::Recording { epoch, .. } => Some(*epoch),
        }
    }
}
