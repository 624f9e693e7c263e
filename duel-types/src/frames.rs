//! Push-channel frames.
//!
//! Each frame is a JSON object tagged by its `event` field:
//!
//! ```text
//! {"event": "session_updated", "status": "in_progress", ...}
//! {"event": "question_revealed", "question_id": "q1", "correct_option_id": "b", ...}
//! {"event": "participant_ready", "user_id": "u2", "all_ready": false}
//! {"event": "pong"}
//! ```

use serde::{Deserialize, Serialize};

use crate::{OptionId, ParticipantResponse, ProtocolError, QuestionId, SessionSnapshot, UserId};

/// A frame received on the session topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ChannelFrame {
    /// Full session snapshot
    SessionUpdated(SessionSnapshot),
    /// The current question was revealed
    QuestionRevealed(RevealedEvent),
    /// A participant signalled ready for the next question
    ParticipantReady(ReadyEvent),
    /// Reply to a keepalive ping
    Pong,
}

impl ChannelFrame {
    /// Serialize to JSON bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(self).map_err(ProtocolError::Encode)
    }

    /// Deserialize from JSON bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        serde_json::from_slice(bytes).map_err(ProtocolError::Decode)
    }
}

/// Reveal of a question: the correct option and both participants' choices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevealedEvent {
    /// Question that was revealed
    pub question_id: QuestionId,
    /// The correct option
    pub correct_option_id: OptionId,
    /// One entry per participant
    #[serde(default)]
    pub responses: Vec<ParticipantResponse>,
}

/// A participant became ready for the next question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadyEvent {
    /// Who became ready
    pub user_id: UserId,
    /// Question the readiness refers to, when the server includes it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question_id: Option<QuestionId>,
    /// Both participants are now ready
    #[serde(default)]
    pub all_ready: bool,
}
