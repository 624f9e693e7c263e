//! # quizduel-core
//!
//! Pure logic for QuizDuel sync (no I/O, instant tests).
//!
//! This crate implements the state machines and merge rules of the duel
//! engine without any network, timer or task code, enabling fast unit tests.
//!
//! ## Design Philosophy
//!
//! All modules in this crate are **pure** - they take input and produce output
//! without side effects. This enables:
//! - Instant unit tests (no mocks, no async)
//! - Deterministic behavior (same input → same output)
//! - Easy reasoning about state transitions
//!
//! The actual I/O (push channel, polling, mutating calls, countdown timers)
//! is performed by `quizduel-client`, which interprets the commands and
//! actions produced here.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod channel;
pub mod guard;
pub mod machine;
pub mod projection;
pub mod reconcile;

pub use channel::{calculate_backoff, ChannelAction, ChannelEvent, ChannelSignal, ChannelState};
pub use guard::{ActionGuards, SingleFlight, SubmitRejected};
pub use machine::{Command, DuelMachine, DuelPhase, MachineConfig, MachineError};
pub use projection::{LocalAnswerState, LocalState, ReadyState, RevealState};
pub use reconcile::{is_stale, reconcile, Incoming, ReconcileLock, Signal};
