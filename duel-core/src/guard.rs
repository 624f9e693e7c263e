//! Single-flight guards for the mutating calls.
//!
//! Each guard is set *before* the network call and cleared only when the
//! response (or failure) is handled. Guards are keyed by question id, so a new
//! question re-arms them without an explicit reset.

use duel_types::QuestionId;
use thiserror::Error;

/// Why a mutating call was not issued.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmitRejected {
    /// The same call is already awaiting its response
    #[error("a request for this question is already in flight")]
    InFlight,

    /// The call already succeeded for this question
    #[error("already done for this question")]
    AlreadyDone,

    /// There is no question to act on
    #[error("no active question")]
    NoQuestion,

    /// There is no option selected to submit
    #[error("no option selected")]
    NothingSelected,
}

/// Guard for one kind of call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SingleFlight {
    in_flight: Option<QuestionId>,
    done_for: Option<QuestionId>,
}

impl SingleFlight {
    /// Create an armed guard.
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the guard for `question_id`.
    ///
    /// A call still in flight for an older question does not block a call
    /// for a newer one.
    pub fn try_begin(&mut self, question_id: &QuestionId) -> Result<(), SubmitRejected> {
        if self.done_for.as_ref() == Some(question_id) {
            return Err(SubmitRejected::AlreadyDone);
        }
        if self.in_flight.as_ref() == Some(question_id) {
            return Err(SubmitRejected::InFlight);
        }
        self.in_flight = Some(question_id.clone());
        Ok(())
    }

    /// Release the guard after the response for `question_id` was handled.
    ///
    /// On success the call is recorded as done for that question.
    pub fn finish(&mut self, question_id: &QuestionId, succeeded: bool) {
        if self.in_flight.as_ref() == Some(question_id) {
            self.in_flight = None;
        }
        if succeeded {
            self.done_for = Some(question_id.clone());
        }
    }

    /// Record the outcome as done without a call, e.g. when the server
    /// delivered it through the transport.
    pub fn mark_done(&mut self, question_id: &QuestionId) {
        self.done_for = Some(question_id.clone());
    }

}

/// The three guarded calls.
#[derive(Debug, Clone, Default)]
pub struct ActionGuards {
    /// Submit-answer
    pub answer: SingleFlight,
    /// Request-reveal
    pub reveal: SingleFlight,
    /// Signal-ready
    pub ready: SingleFlight,
}
