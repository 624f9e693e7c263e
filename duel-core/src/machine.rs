//! Per-question duel state machine.
//!
//! The machine is driven by three inputs: local user actions
//! ([`DuelMachine::select_option`], [`DuelMachine::submit`],
//! [`DuelMachine::request_ready`]), reconciler [`Signal`]s, and countdown
//! ticks. It never performs I/O; it returns [`Command`]s that the client
//! event loop executes.
//!
//! ```text
//! Idle -> Selected -> Submitting -> Submitted -> WaitingForOpponent
//!                                             -> BothAnswered -> CountingDown
//!   -> Revealed -> WaitingForOpponentReady | AllReady -> Advanced -> Idle
//! ```
//!
//! The current phase is derived from the projection after every step, so a
//! client that joins mid-question (or receives a snapshot that skips ahead)
//! lands in the right phase without replaying the steps in between.

use std::time::Duration;

use duel_types::{OptionId, QuestionId};
use thiserror::Error;

use crate::projection::{LocalAnswerState, LocalState};
use crate::reconcile::{ReconcileLock, Signal};

/// Default countdown length in ticks.
pub const DEFAULT_COUNTDOWN_TICKS: u8 = 3;

/// Default time the reveal follower waits for the leader's reveal.
pub const DEFAULT_FOLLOWER_GRACE: Duration = Duration::from_millis(1500);

/// Per-question lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuelPhase {
    /// Nothing selected yet (or no question yet).
    Idle,
    /// An option is selected but not submitted.
    Selected,
    /// The answer call is in flight.
    Submitting,
    /// The answer call succeeded. Transient.
    Submitted,
    /// Answered; the opponent has not.
    WaitingForOpponent,
    /// Both answered; the countdown is about to start.
    BothAnswered,
    /// Counting down to the reveal.
    CountingDown {
        /// Ticks left
        remaining: u8,
    },
    /// Correct answer and both choices are visible.
    Revealed,
    /// This client is ready; the opponent is not.
    WaitingForOpponentReady,
    /// Both ready; waiting for the next question.
    AllReady,
    /// Moving to the next question. Transient.
    Advanced,
    /// The session is over. Terminal.
    Completed,
}

/// A local action the machine refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MachineError {
    /// No question is being played
    #[error("no active question")]
    NoActiveQuestion,

    /// The option does not belong to the current question
    #[error("option is not part of the current question")]
    UnknownOption,

    /// The answer for this question was already submitted
    #[error("answer already submitted")]
    AlreadySubmitted,

    /// The question was already revealed
    #[error("question already revealed")]
    AlreadyRevealed,

    /// Submit was requested with no option selected
    #[error("no option selected")]
    NothingSelected,

    /// Ready was requested before the reveal
    #[error("question not revealed yet")]
    NotRevealed,

    /// Ready was already signalled for this question
    #[error("already ready for the next question")]
    AlreadyReady,

    /// The session is over
    #[error("session complete")]
    SessionComplete,
}

/// Side effects requested by the machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Call submit-answer.
    SubmitAnswer {
        /// Question being answered
        question_id: QuestionId,
        /// Chosen option
        option_id: OptionId,
    },
    /// Call request-reveal.
    RequestReveal {
        /// Question to reveal
        question_id: QuestionId,
    },
    /// Call signal-ready.
    SignalReady {
        /// Question the client is ready after
        question_id: QuestionId,
    },
    /// Start ticking the countdown.
    StartCountdown {
        /// Number of ticks
        ticks: u8,
    },
    /// Stop ticking the countdown.
    StopCountdown,
    /// Call back into [`DuelMachine::on_reveal_fallback`] after a delay.
    ScheduleRevealFallback {
        /// Question the fallback is for
        question_id: QuestionId,
        /// Delay
        after: Duration,
    },
    /// Drop any scheduled reveal fallback.
    CancelRevealFallback,
}

/// Tunables of the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MachineConfig {
    /// Countdown length in ticks
    pub countdown_ticks: u8,
    /// Time the follower waits for the leader's reveal
    pub reveal_follower_grace: Duration,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            countdown_ticks: DEFAULT_COUNTDOWN_TICKS,
            reveal_follower_grace: DEFAULT_FOLLOWER_GRACE,
        }
    }
}

/// The duel state machine for one client.
#[derive(Debug, Clone)]
pub struct DuelMachine {
    config: MachineConfig,
    phase: DuelPhase,
    journal: Vec<DuelPhase>,
    countdown_started: bool,
    countdown_remaining: Option<u8>,
    reveal_requested: bool,
    reveal_retried: bool,
    ready_in_flight: bool,
}

impl DuelMachine {
    /// Create a machine in the Idle phase.
    pub fn new(config: MachineConfig) -> Self {
        Self {
            config,
            phase: DuelPhase::Idle,
            journal: Vec::new(),
            countdown_started: false,
            countdown_remaining: None,
            reveal_requested: false,
            reveal_retried: false,
            ready_in_flight: false,
        }
    }

    /// Current phase.
    pub fn phase(&self) -> DuelPhase {
        self.phase
    }

    /// Ticks left on the countdown, if one is running or just ran out.
    pub fn countdown_remaining(&self) -> Option<u8> {
        self.countdown_remaining
    }

    /// The part of the machine's state the reconciler must respect.
    pub fn lock(&self) -> ReconcileLock {
        ReconcileLock {
            countdown_started: self.countdown_started,
        }
    }

    /// Phases entered since the last call, oldest first.
    pub fn take_transitions(&mut self) -> Vec<DuelPhase> {
        std::mem::take(&mut self.journal)
    }

    /// The user picked an option. Re-selecting replaces the pick.
    pub fn select_option(
        &mut self,
        state: &mut LocalState,
        option_id: OptionId,
    ) -> Result<(), MachineError> {
        let question = Self::active_question(state)?;
        if state.reveal.is_some() {
            return Err(MachineError::AlreadyRevealed);
        }
        if state.answer.has_submitted_final || state.answer.is_submit_in_flight {
            return Err(MachineError::AlreadySubmitted);
        }
        if !question.has_option(&option_id) {
            return Err(MachineError::UnknownOption);
        }

        state.answer.selected_option_id = Some(option_id);
        self.settle(state);
        Ok(())
    }

    /// The user confirmed the pick.
    ///
    /// Returns `Ok(None)` when a submission is already in flight: the tap is
    /// absorbed rather than reported.
    pub fn submit(&mut self, state: &mut LocalState) -> Result<Option<Command>, MachineError> {
        let question_id = Self::active_question(state)?.id.clone();
        if state.answer.is_submit_in_flight {
            return Ok(None);
        }
        if state.reveal.is_some() {
            return Err(MachineError::AlreadyRevealed);
        }
        if state.answer.has_submitted_final {
            return Err(MachineError::AlreadySubmitted);
        }
        let option_id = state
            .answer
            .selected_option_id
            .clone()
            .ok_or(MachineError::NothingSelected)?;

        state.answer.has_submitted_final = true;
        state.answer.is_submit_in_flight = true;
        self.settle(state);

        Ok(Some(Command::SubmitAnswer {
            question_id,
            option_id,
        }))
    }

    /// The answer call failed: roll back to Idle so the user can resubmit.
    pub fn on_submit_failed(&mut self, state: &mut LocalState, question_id: &QuestionId) {
        if state.is_current(question_id) && state.answer.is_submit_in_flight {
            state.answer = LocalAnswerState::default();
        }
        self.settle(state);
    }

    /// The answer call was not issued because the answer is already on
    /// record for this question. The answer stays final.
    pub fn on_submit_absorbed(&mut self, state: &mut LocalState, question_id: &QuestionId) {
        if state.is_current(question_id) {
            state.answer.is_submit_in_flight = false;
        }
        self.settle(state);
    }

    /// The answer call succeeded and its response was reconciled into
    /// `state`, producing `signals`.
    pub fn on_answer_accepted(&mut self, state: &LocalState, signals: &[Signal]) -> Vec<Command> {
        if self.phase == DuelPhase::Submitting {
            self.enter(DuelPhase::Submitted);
        }
        self.on_signals(state, signals)
    }

    /// React to reconciler output.
    pub fn on_signals(&mut self, state: &LocalState, signals: &[Signal]) -> Vec<Command> {
        let mut commands = Vec::new();

        for signal in signals {
            match signal {
                Signal::QuestionChanged { .. } => {
                    if matches!(
                        self.phase,
                        DuelPhase::Revealed
                            | DuelPhase::WaitingForOpponentReady
                            | DuelPhase::AllReady
                    ) {
                        self.enter(DuelPhase::Advanced);
                    }
                    self.reset_question_scope();
                    commands.push(Command::StopCountdown);
                    commands.push(Command::CancelRevealFallback);
                }
                Signal::BothAnswered => {
                    if !self.countdown_started && state.reveal.is_none() {
                        self.enter(DuelPhase::BothAnswered);
                        self.countdown_started = true;
                        self.countdown_remaining = Some(self.config.countdown_ticks);
                        commands.push(Command::StartCountdown {
                            ticks: self.config.countdown_ticks,
                        });
                    }
                }
                Signal::Revealed => {
                    // Pins both_answered for the rest of the question.
                    self.countdown_started = true;
                    if self.countdown_remaining.take().is_some() {
                        commands.push(Command::StopCountdown);
                    }
                    commands.push(Command::CancelRevealFallback);
                }
                Signal::AllReady => {}
                Signal::Completed { .. } => {
                    self.countdown_remaining = None;
                    commands.push(Command::StopCountdown);
                    commands.push(Command::CancelRevealFallback);
                }
            }
        }

        self.settle(state);
        commands
    }

    /// One countdown tick elapsed. Reads `state` as it is now.
    pub fn on_tick(&mut self, state: &LocalState) -> Vec<Command> {
        let Some(remaining) = self.countdown_remaining else {
            return vec![Command::StopCountdown];
        };

        if state.reveal.is_some() || state.complete {
            self.countdown_remaining = None;
            self.settle(state);
            return vec![Command::StopCountdown];
        }
        if remaining == 0 {
            return vec![Command::StopCountdown];
        }

        let remaining = remaining - 1;
        self.countdown_remaining = Some(remaining);
        self.settle(state);
        if remaining > 0 {
            return vec![];
        }

        let mut commands = vec![Command::StopCountdown];
        if state.is_reveal_leader() {
            commands.extend(self.issue_reveal(state));
        } else if let Some(question_id) = state.question_id() {
            commands.push(Command::ScheduleRevealFallback {
                question_id: question_id.clone(),
                after: self.config.reveal_follower_grace,
            });
        }
        commands
    }

    /// A scheduled reveal fallback fired.
    pub fn on_reveal_fallback(
        &mut self,
        state: &LocalState,
        question_id: &QuestionId,
    ) -> Vec<Command> {
        if !state.is_current(question_id) {
            return vec![];
        }
        self.issue_reveal(state).into_iter().collect()
    }

    /// The reveal call failed. Schedules one retry for the question.
    pub fn on_reveal_failed(&mut self, state: &LocalState, question_id: &QuestionId) -> Vec<Command> {
        if !state.is_current(question_id) || state.reveal.is_some() {
            return vec![];
        }
        self.reveal_requested = false;
        if self.reveal_retried {
            return vec![];
        }
        self.reveal_retried = true;
        vec![Command::ScheduleRevealFallback {
            question_id: question_id.clone(),
            after: self.config.reveal_follower_grace,
        }]
    }

    /// The user asked for the next question.
    ///
    /// Returns `Ok(None)` when a ready call is already in flight.
    pub fn request_ready(&mut self, state: &LocalState) -> Result<Option<Command>, MachineError> {
        let question_id = Self::active_question(state)?.id.clone();
        if state.reveal.is_none() {
            return Err(MachineError::NotRevealed);
        }
        if state.is_locally_ready() {
            return Err(MachineError::AlreadyReady);
        }
        if self.ready_in_flight {
            return Ok(None);
        }

        self.ready_in_flight = true;
        Ok(Some(Command::SignalReady { question_id }))
    }

    /// The ready call finished; on success its response was already
    /// reconciled into `state`.
    pub fn on_ready_finished(&mut self, state: &LocalState) {
        self.ready_in_flight = false;
        self.settle(state);
    }

    /// Re-derive the phase from `state` without any new input.
    pub fn settle(&mut self, state: &LocalState) {
        let phase = self.derive_phase(state);
        self.enter(phase);
    }

    fn active_question(state: &LocalState) -> Result<&duel_types::Question, MachineError> {
        if state.complete {
            return Err(MachineError::SessionComplete);
        }
        state.question.as_ref().ok_or(MachineError::NoActiveQuestion)
    }

    fn issue_reveal(&mut self, state: &LocalState) -> Option<Command> {
        if self.reveal_requested || state.reveal.is_some() {
            return None;
        }
        let question_id = state.question_id()?.clone();
        self.reveal_requested = true;
        Some(Command::RequestReveal { question_id })
    }

    fn reset_question_scope(&mut self) {
        self.countdown_started = false;
        self.countdown_remaining = None;
        self.reveal_requested = false;
        self.reveal_retried = false;
        self.ready_in_flight = false;
    }

    fn derive_phase(&self, state: &LocalState) -> DuelPhase {
        if state.complete {
            return DuelPhase::Completed;
        }
        if state.question.is_none() {
            return DuelPhase::Idle;
        }
        if state.reveal.is_some() {
            return if state.ready.all_ready {
                DuelPhase::AllReady
            } else if state.is_locally_ready() {
                DuelPhase::WaitingForOpponentReady
            } else {
                DuelPhase::Revealed
            };
        }
        if let Some(remaining) = self.countdown_remaining {
            return DuelPhase::CountingDown { remaining };
        }
        if state.both_answered {
            return DuelPhase::BothAnswered;
        }
        if state.answer.is_submit_in_flight {
            return DuelPhase::Submitting;
        }
        if state.answer.has_submitted_final {
            return DuelPhase::WaitingForOpponent;
        }
        if state.answer.selected_option_id.is_some() {
            return DuelPhase::Selected;
        }
        DuelPhase::Idle
    }

    fn enter(&mut self, phase: DuelPhase) {
        if self.phase != phase {
            self.phase = phase;
            self.journal.push(phase);
        }
    }
}

impl Default for DuelMachine {
    fn default() -> Self {
        Self::new(MachineConfig::default())
    }
}
