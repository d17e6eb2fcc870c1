//! Request lifecycle state machine
//!
//! ```text
//! Idle -> Validating -> Blocked
//!                    -> Executing -> Succeeded | Failed
//!                    -> Failed        (rules provider unavailable)
//!                    -> Idle          (aborted)
//! Blocked | Succeeded | Failed -> Idle        (reset)
//!                              -> Validating  (next submission)
//! ```

use crate::error::TransitionError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// State of the request slot for one query kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestState {
    /// Nothing tracked
    #[default]
    Idle,
    /// Rules being fetched and evaluated
    Validating,
    /// Rejected by policy (terminal)
    Blocked,
    /// Executor call in flight
    Executing,
    /// Executor returned a result (terminal)
    Succeeded,
    /// Execution or rules lookup failed (terminal)
    Failed,
}

impl RequestState {
    /// Lowercase name
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Validating => "validating",
            Self::Blocked => "blocked",
            Self::Executing => "executing",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    /// Blocked, Succeeded or Failed
    #[inline]
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Blocked | Self::Succeeded | Self::Failed)
    }

    /// Validating or Executing; a new submission of the same kind is refused
    #[inline]
    #[must_use]
    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::Validating | Self::Executing)
    }
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// States reachable from `from` in one step
#[must_use]
pub fn allowed_transitions(from: RequestState) -> &'static [RequestState] {
    use RequestState::{Blocked, Executing, Failed, Idle, Succeeded, Validating};
    match from {
        Idle => &[Validating],
        Validating => &[Blocked, Executing, Failed, Idle],
        Executing => &[Succeeded, Failed],
        Blocked | Succeeded | Failed => &[Idle, Validating],
    }
}

/// Check a transition against the table
///
/// # Errors
/// [`TransitionError`] when `to` is not reachable from `from`.
pub fn validate_transition(from: RequestState, to: RequestState) -> Result<(), TransitionError> {
    if allowed_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(TransitionError { from, to })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use RequestState::*;

    const ALL: [RequestState; 6] = [Idle, Validating, Blocked, Executing, Succeeded, Failed];

    #[test]
    fn happy_path_is_allowed() {
        assert!(validate_transition(Idle, Validating).is_ok());
        assert!(validate_transition(Validating, Executing).is_ok());
        assert!(validate_transition(Executing, Succeeded).is_ok());
        assert!(validate_transition(Succeeded, Idle).is_ok());
    }

    #[test]
    fn execution_cannot_be_skipped() {
        assert_eq!(
            validate_transition(Validating, Succeeded),
            Err(TransitionError {
                from: Validating,
                to: Succeeded
            })
        );
        assert!(validate_transition(Idle, Executing).is_err());
        assert!(validate_transition(Executing, Idle).is_err());
        assert!(validate_transition(Executing, Blocked).is_err());
    }

    #[test]
    fn terminal_states_only_leave_by_reset_or_resubmit() {
        for from in ALL.into_iter().filter(RequestState::is_terminal) {
            for to in ALL {
                let ok = validate_transition(from, to).is_ok();
                assert_eq!(ok, matches!(to, Idle | Validating), "{from} -> {to}");
            }
        }
    }

    #[test]
    fn no_self_loops() {
        for state in ALL {
            assert!(validate_transition(state, state).is_err(), "{state}");
        }
    }
}
