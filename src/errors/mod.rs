//! Structured error codes surfaced with engine notices.
//!
//! Every user-facing notice can carry a stable code that hosting UIs, the
//! CLI, and log pipelines can match on without parsing message text.
//!
//! Codes are grouped by category:
//!
//! | Range  | Category   | Meaning                                   |
//! |--------|------------|-------------------------------------------|
//! | E1xxx  | Validation | Sequence/step rejected before execution   |
//! | E2xxx  | Gateway    | Automation backend request failed         |
//! | E3xxx  | Session    | Recording session lifecycle problem       |
//! | E4xxx  | Execution  | Direct execution / playback outcome       |

use std::fmt;

/// Stable 4-digit error code. First digit is the category, the remaining
/// three identify the specific condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorCode(u16);

impl ErrorCode {
    // E1xxx: validation / mapping. The offending input never reaches the
    // backend.

    /// Recorded action kind has no catalog entry; the action was dropped.
    pub const UNKNOWN_ACTION_KIND: Self = Self(1001);
    /// One or more steps are missing a target element or value.
    pub const INCOMPLETE_SEQUENCE: Self = Self(1002);
    /// The sequence is empty; there is nothing to execute.
    pub const EMPTY_SEQUENCE: Self = Self(1003);
    /// A saved test file could not be read or parsed.
    pub const INVALID_TEST_FILE: Self = Self(1004);

    // E2xxx: gateway. The backend call itself failed.

    /// Network-level failure reaching the automation backend.
    pub const BACKEND_UNREACHABLE: Self = Self(2001);
    /// The backend answered with a non-2xx HTTP status.
    pub const BACKEND_STATUS: Self = Self(2002);
    /// The backend rejected the request body (`success: false`).
    pub const BACKEND_REJECTED: Self = Self(2003);

    // E3xxx: recording session lifecycle.

    /// stop was requested but no session is active.
    pub const NO_ACTIVE_SESSION: Self = Self(3001);
    /// The backend reported the session as ended or unknown.
    pub const SESSION_ENDED: Self = Self(3002);
    /// start was requested while a session is already starting or active.
    pub const ALREADY_RECORDING: Self = Self(3003);
    /// start was requested before a target site was loaded.
    pub const SITE_NOT_LOADED: Self = Self(3004);
    /// start was requested without a usable URL.
    pub const MISSING_URL: Self = Self(3005);

    // E4xxx: execution / playback outcome.

    /// The direct execution ran and reported an overall failure.
    pub const EXECUTION_FAILED: Self = Self(4001);
    /// The direct execution request itself could not be completed.
    pub const EXECUTION_ERROR: Self = Self(4002);

    pub fn category(&self) -> ErrorCategory {
        match self.0 / 1000 {
            1 => ErrorCategory::Validation,
            2 => ErrorCategory::Gateway,
            3 => ErrorCategory::Session,
            _ => ErrorCategory::Execution,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "E{:04}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Validation,
    Gateway,
    Session,
    Execution,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCategory::Validation => "validation",
            ErrorCategory::Gateway => "gateway",
            ErrorCategory::Session => "session",
            ErrorCategory::Execution => "execution",
        };
        f.write_str(name)
    }
}
