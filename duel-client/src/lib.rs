//! # quizduel-client
//!
//! Client engine for QuizDuel real-time duel sync.
//!
//! This is the library the app embeds: one [`DuelClient`] per participant per
//! session. It runs the pure logic from `quizduel-core` on a single engine
//! task and performs all I/O around it.
//!
//! ## Features
//!
//! - **Push first, poll as fallback**: exactly one active source at a time,
//!   with generation filtering so a stale source can never write state
//! - **Optimistic local actions**: a picked or submitted answer survives
//!   stale snapshots; failed submissions roll back
//! - **Lockstep countdown and single reveal** across both clients
//! - **Transport Abstraction**: pluggable [`PushChannel`] and [`DuelApi`]
//!   collaborators, with mocks for tests
//!
//! ## Example
//!
//! ```ignore
//! use quizduel_client::{DuelClient, DuelConfig};
//!
//! let config = DuelConfig::from_file(Path::new("duel.toml"))?;
//! let (mut client, mut events) = DuelClient::start(session, me, config, channel, api)?;
//!
//! client.select_option(option).await?;
//! client.submit_answer().await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod channel;
pub mod client;
pub mod config;
pub mod error;
mod poller;
pub mod selector;
pub mod submitter;
pub mod transport;

pub use client::{DuelClient, DuelEvent, DuelView};
pub use config::{ConfigError, DuelConfig};
pub use error::{ActionKind, DuelError, SubmissionError};
pub use selector::{ActiveSource, Feed, SelectorSettings, TransportSelector};
pub use submitter::{ActionSubmitter, Completion};
pub use transport::{
    ApiCall, ApiError, DuelApi, MockApi, MockChannel, PushChannel, TransportError,
};

pub use duel_core::{DuelPhase, LocalState, MachineError, SubmitRejected};
