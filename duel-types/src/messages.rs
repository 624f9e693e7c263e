//! Session payloads and request/response bodies.
//!
//! These mirror the server's JSON: `snake_case` fields, lowercase enum
//! strings. Optional fields default so that older servers omitting them
//! still decode.

use serde::{Deserialize, Serialize};

use crate::{OptionId, ProtocolError, QuestionId, UserId};

/// Lifecycle of a session as reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Created, waiting for both participants.
    Waiting,
    /// Questions are being played.
    InProgress,
    /// All questions played; scores are final.
    Completed,
    /// Abandoned or timed out server-side.
    Expired,
}

impl SessionStatus {
    /// True for statuses after which no further play is possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Expired)
    }
}

/// One selectable answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionOption {
    /// Option identifier
    pub id: OptionId,
    /// Display label
    pub label: String,
}

/// A question as delivered by the server. Immutable once delivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    /// Question identifier
    pub id: QuestionId,
    /// Prompt text
    pub prompt: String,
    /// Options in display order
    pub options: Vec<QuestionOption>,
    /// 1-based position within the session
    pub ordinal: u32,
    /// Total number of questions in the session
    pub total: u32,
}

impl Question {
    /// Check whether `option` is one of this question's options.
    pub fn has_option(&self, option: &OptionId) -> bool {
        self.options.iter().any(|o| &o.id == option)
    }

    /// True if this is the last question of the session.
    pub fn is_last(&self) -> bool {
        self.ordinal >= self.total
    }
}

/// A participant as reported by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    /// User identifier
    pub user_id: UserId,
    /// Display name
    pub display_name: String,
    /// Server-computed score
    #[serde(default)]
    pub score: i32,
    /// Number of wrong answers so far
    #[serde(default)]
    pub error_count: u32,
    /// Ready for the next question
    #[serde(default)]
    pub ready_for_next: bool,
    /// Has answered the current question
    #[serde(default)]
    pub has_answered: bool,
    /// The participant's own answer, only ever sent to that participant
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_option_id: Option<OptionId>,
}

/// Full session state, as returned by `GET status` and pushed by
/// `session_updated`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    /// Session status
    pub status: SessionStatus,
    /// Question currently being played
    #[serde(default)]
    pub current_question: Option<Question>,
    /// Both participants answered the current question
    #[serde(default)]
    pub has_both_answered: bool,
    /// Participants in roster order
    #[serde(default)]
    pub participants: Vec<Participant>,
    /// Both participants signalled ready for the next question
    #[serde(default)]
    pub all_ready_for_next: bool,
}

impl SessionSnapshot {
    /// Decode a snapshot from a JSON body.
    pub fn from_json(bytes: &[u8]) -> Result<Self, ProtocolError> {
        serde_json::from_slice(bytes).map_err(ProtocolError::Decode)
    }

    /// Find a participant by user id.
    pub fn participant(&self, user: &UserId) -> Option<&Participant> {
        self.participants.iter().find(|p| &p.user_id == user)
    }
}

/// Body of `POST answer`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerRequest {
    /// Question being answered
    pub question_id: QuestionId,
    /// Chosen option
    pub selected_option_id: OptionId,
}

/// Response to `POST answer`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerResponse {
    /// Whether the chosen option was correct
    pub is_correct: bool,
    /// Both participants have now answered
    #[serde(default)]
    pub has_both_answered: bool,
}

/// Body of `POST reveal`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevealRequest {
    /// Question to reveal
    pub question_id: QuestionId,
}

/// One participant's outcome for a revealed question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantResponse {
    /// Participant
    pub user_id: UserId,
    /// Chosen option, if the participant answered
    #[serde(default)]
    pub selected_option_id: Option<OptionId>,
    /// Correctness of the chosen option
    #[serde(default)]
    pub is_correct: bool,
    /// Updated score, when the server includes it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<i32>,
}

/// Response to `POST reveal`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevealResponse {
    /// The correct option
    pub correct_option_id: OptionId,
    /// One entry per participant
    #[serde(default)]
    pub responses: Vec<ParticipantResponse>,
}

impl RevealResponse {
    /// Attach the question this reveal answers.
    pub fn into_event(self, question_id: QuestionId) -> crate::RevealedEvent {
        crate::RevealedEvent {
            question_id,
            correct_option_id: self.correct_option_id,
            responses: self.responses,
        }
    }
}

/// Outcome of `POST next`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NextStatus {
    /// Both ready; the session moved to the next question
    Moved,
    /// This participant is ready; the opponent is not yet
    WaitingForBoth,
    /// That was the last question
    Completed,
}

/// Response to `POST next`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NextResponse {
    /// What happened
    pub status: NextStatus,
    /// The new question when `status` is `moved`
    #[serde(default)]
    pub current_question: Option<Question>,
}
