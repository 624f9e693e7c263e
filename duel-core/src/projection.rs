//! The client's local projection of a duel session.
//!
//! The server owns the session. The client holds a projection that may be
//! briefly ahead of the server (an answer submitted but not yet confirmed)
//! or behind it (a stale snapshot still in flight). The reconciler in
//! [`crate::reconcile`] is the only code that merges server input into it;
//! the duel machine in [`crate::machine`] is the only code that applies local
//! user actions.

use std::collections::BTreeMap;

use duel_types::{
    OptionId, Participant, ParticipantResponse, Question, QuestionId, SessionStatus, UserId,
};

/// Per-question answer state of the local participant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalAnswerState {
    /// The user's current pick. Mutable until submitted.
    pub selected_option_id: Option<OptionId>,
    /// Monotonic false -> true within a question, except on submission failure.
    pub has_submitted_final: bool,
    /// An answer submission is awaiting its response.
    pub is_submit_in_flight: bool,
}

/// Disclosure of the correct option and both participants' choices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevealState {
    /// Question this reveal belongs to
    pub question_id: QuestionId,
    /// The correct option
    pub correct_option_id: OptionId,
    /// One entry per participant
    pub responses: Vec<ParticipantResponse>,
}

impl RevealState {
    /// The response recorded for `user`, if any.
    pub fn response_for(&self, user: &UserId) -> Option<&ParticipantResponse> {
        self.responses.iter().find(|r| &r.user_id == user)
    }
}

/// Per-participant readiness for the next question.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadyState {
    flags: BTreeMap<UserId, bool>,
    /// Server-confirmed: every participant is ready
    pub all_ready: bool,
}

impl ReadyState {
    /// A cleared ready state covering `participants`.
    pub fn cleared(participants: &[Participant]) -> Self {
        Self {
            flags: participants
                .iter()
                .map(|p| (p.user_id.clone(), false))
                .collect(),
            all_ready: false,
        }
    }

    /// Whether `user` is ready.
    pub fn is_ready(&self, user: &UserId) -> bool {
        self.flags.get(user).copied().unwrap_or(false)
    }

    /// Set one participant's flag.
    pub fn set(&mut self, user: &UserId, ready: bool) {
        self.flags.insert(user.clone(), ready);
    }

    /// Number of participants flagged ready.
    pub fn ready_count(&self) -> usize {
        self.flags.values().filter(|r| **r).count()
    }
}

/// The local projection of one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalState {
    /// The participant this client acts for
    pub local_user: UserId,
    /// Last known session status
    pub status: SessionStatus,
    /// Roster in server order, with server-computed scores
    pub participants: Vec<Participant>,
    /// Question currently being played
    pub question: Option<Question>,
    /// Local answer state for `question`
    pub answer: LocalAnswerState,
    /// Reveal for `question`, once it happened
    pub reveal: Option<RevealState>,
    /// Readiness for the question after `question`
    pub ready: ReadyState,
    /// Both participants answered `question`
    pub both_answered: bool,
    /// Terminal: the session is over for this client
    pub complete: bool,
}

impl LocalState {
    /// A fresh projection for `local_user`, before any server input.
    pub fn new(local_user: UserId) -> Self {
        Self {
            local_user,
            status: SessionStatus::Waiting,
            participants: Vec::new(),
            question: None,
            answer: LocalAnswerState::default(),
            reveal: None,
            ready: ReadyState::default(),
            both_answered: false,
            complete: false,
        }
    }

    /// Id of the current question.
    pub fn question_id(&self) -> Option<&QuestionId> {
        self.question.as_ref().map(|q| &q.id)
    }

    /// Ordinal of the current question.
    pub fn ordinal(&self) -> Option<u32> {
        self.question.as_ref().map(|q| q.ordinal)
    }

    /// Whether `question_id` is the question currently being played.
    pub fn is_current(&self, question_id: &QuestionId) -> bool {
        self.question_id() == Some(question_id)
    }

    /// The local participant's roster entry.
    pub fn local_participant(&self) -> Option<&Participant> {
        self.participants
            .iter()
            .find(|p| p.user_id == self.local_user)
    }

    /// The other participant's roster entry.
    pub fn opponent(&self) -> Option<&Participant> {
        self.participants
            .iter()
            .find(|p| p.user_id != self.local_user)
    }

    /// The reveal leader is the first participant in roster order.
    ///
    /// With no roster yet the client considers itself leader.
    pub fn is_reveal_leader(&self) -> bool {
        self.participants
            .first()
            .map_or(true, |p| p.user_id == self.local_user)
    }

    /// Whether the local participant is flagged ready.
    pub fn is_locally_ready(&self) -> bool {
        self.ready.is_ready(&self.local_user)
    }

    /// Reset everything scoped to a single question and adopt `question`.
    pub(crate) fn begin_question(&mut self, question: Question) {
        self.question = Some(question);
        self.answer = LocalAnswerState::default();
        self.reveal = None;
        self.ready = ReadyState::cleared(&self.participants);
        self.both_answered = false;
    }
}
