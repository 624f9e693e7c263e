//! # duel-types
//!
//! Wire format types for the QuizDuel session sync protocol.
//!
//! This crate provides the foundational types used across all QuizDuel crates:
//! - [`SessionId`], [`UserId`], [`QuestionId`], [`OptionId`] - Identifiers
//! - [`SessionSnapshot`], [`Participant`], [`Question`] - The session projection
//! - [`AnswerRequest`], [`RevealResponse`], [`NextResponse`], ... - Request/response bodies
//! - [`ChannelFrame`] - Push-channel frames
//! - [`ProtocolError`] - Malformed or unexpected payloads

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod frames;
mod ids;
mod messages;

pub use error::ProtocolError;
pub use frames::{ChannelFrame, ReadyEvent, RevealedEvent};
pub use ids::{OptionId, QuestionId, SessionId, UserId};
pub use messages::{
    AnswerRequest, AnswerResponse, NextResponse, NextStatus, Participant, ParticipantResponse,
    Question, QuestionOption, RevealRequest, RevealResponse, SessionSnapshot, SessionStatus,
};
