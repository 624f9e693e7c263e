//! Errors surfaced by the duel client.

use std::fmt;

use duel_core::{MachineError, SubmitRejected};
use duel_types::SessionStatus;
use thiserror::Error;

use crate::transport::ApiError;

/// The mutating call an error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    /// Submit-answer
    Answer,
    /// Request-reveal
    Reveal,
    /// Signal-ready
    Ready,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Answer => "submit-answer",
            Self::Reveal => "request-reveal",
            Self::Ready => "signal-ready",
        };
        f.write_str(name)
    }
}

/// A mutating call failed. Local state was rolled back to before the call.
#[derive(Debug, Error)]
#[error("{action} failed: {source}")]
pub struct SubmissionError {
    /// Which call failed
    pub action: ActionKind,
    /// Underlying API error
    #[source]
    pub source: ApiError,
}

impl SubmissionError {
    /// Whether the user may simply try again.
    pub fn is_retryable(&self) -> bool {
        self.source.is_retryable()
    }
}

/// Errors returned by [`crate::DuelClient`] methods.
#[derive(Debug, Error)]
pub enum DuelError {
    /// The engine is stopped or was never started
    #[error("duel client is not running")]
    NotRunning,

    /// The call was refused by its single-flight guard
    #[error("request rejected: {0}")]
    Rejected(#[from] SubmitRejected),

    /// The action is not allowed in the current phase
    #[error(transparent)]
    Machine(#[from] MachineError),

    /// The session is over
    #[error("session ended ({0:?})")]
    Terminal(SessionStatus),
}
