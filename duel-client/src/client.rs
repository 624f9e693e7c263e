//! DuelClient - the main interface for one participant of a duel.
//!
//! # Architecture
//!
//! All state lives on one engine task. The pure pieces from `quizduel-core`
//! (reconciler, duel machine) decide what happens; the engine interprets
//! their output and performs the I/O through the transport selector and the
//! action submitter.
//!
//! ```text
//! Application ──commands──▶ Engine ◀── TransportSelector ◀── channel / poller
//!      ▲                      │  ▲
//!      │                      │  └── ActionSubmitter ◀── answer / reveal / next
//!      └── DuelView / DuelEvent
//! ```
//!
//! # Example
//!
//! ```ignore
//! use quizduel_client::{DuelClient, DuelConfig, DuelEvent};
//!
//! let (mut client, mut events) =
//!     DuelClient::start(session_id, me, DuelConfig::default(), channel, api)?;
//!
//! client.select_option(option_id).await?;
//! client.submit_answer().await?;
//!
//! while let Some(event) = events.recv().await {
//!     if let DuelEvent::Completed { .. } = event {
//!         break;
//!     }
//! }
//! client.stop().await;
//! ```

use std::sync::Arc;
use std::time::Duration;

use duel_core::{
    is_stale, reconcile, Command, DuelMachine, DuelPhase, Incoming, LocalState, Signal,
};
use duel_types::{OptionId, QuestionId, SessionId, SessionStatus, UserId};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep_until, Instant, Interval, MissedTickBehavior};

use crate::config::{ConfigError, DuelConfig};
use crate::error::{ActionKind, DuelError, SubmissionError};
use crate::selector::{ActiveSource, Feed, SelectorSettings, TransportSelector};
use crate::submitter::{ActionSubmitter, Completion};
use crate::transport::{ApiError, DuelApi, PushChannel};

/// How long [`DuelClient::stop`] waits for the engine before aborting it.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// Everything an observer needs to render the duel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuelView {
    /// Session being played
    pub session_id: SessionId,
    /// Current phase of the duel machine
    pub phase: DuelPhase,
    /// Local projection of the session
    pub state: LocalState,
    /// Source currently feeding the engine
    pub active_source: ActiveSource,
    /// Ticks left while counting down
    pub countdown_remaining: Option<u8>,
}

/// Notifications emitted by the engine, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DuelEvent {
    /// The duel machine entered a phase.
    PhaseChanged {
        /// Phase entered
        phase: DuelPhase,
    },
    /// A new question was adopted.
    QuestionStarted {
        /// 1-based position
        ordinal: u32,
        /// Total questions
        total: u32,
    },
    /// The server accepted this client's answer.
    AnswerAccepted {
        /// Question answered
        question_id: QuestionId,
        /// Whether the answer was correct
        is_correct: bool,
    },
    /// Both participants answered.
    BothAnswered,
    /// One countdown tick elapsed.
    CountdownTick {
        /// Ticks left
        remaining: u8,
    },
    /// The question was revealed.
    Revealed {
        /// Question revealed
        question_id: QuestionId,
        /// The correct option
        correct_option_id: OptionId,
    },
    /// Both participants are ready for the next question.
    AllReady,
    /// The transport selector switched source.
    TransportChanged {
        /// New source
        active: ActiveSource,
    },
    /// The push channel lost its connection or failed to connect.
    ChannelError {
        /// Reason given by the channel
        reason: String,
    },
    /// A mutating call failed; local state was rolled back.
    SubmissionFailed {
        /// Which call failed
        action: ActionKind,
        /// Whether repeating the call may succeed
        retryable: bool,
        /// Failure description
        reason: String,
    },
    /// The session is over. Always the last event.
    Completed {
        /// Status that ended the session
        status: SessionStatus,
    },
}

type Reply = oneshot::Sender<Result<(), DuelError>>;

/// Request from the handle to the engine.
enum EngineCommand {
    Select { option_id: OptionId, reply: Reply },
    Submit { reply: Reply },
    Ready { reply: Reply },
    Shutdown,
}

/// Handle to a running duel engine.
///
/// Dropping the handle aborts the engine and every task it owns.
pub struct DuelClient {
    session_id: SessionId,
    commands: mpsc::UnboundedSender<EngineCommand>,
    view: watch::Receiver<DuelView>,
    task: Option<JoinHandle<()>>,
}

impl DuelClient {
    /// Start the engine for `local_user` in `session_id`.
    ///
    /// Must be called from within a Tokio runtime. Returns the handle and the
    /// event receiver; events are dropped (with a warning) while the receiver
    /// is full, except [`DuelEvent::Completed`], which is always delivered.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if `config` does not validate.
    pub fn start<C: PushChannel, A: DuelApi>(
        session_id: SessionId,
        local_user: UserId,
        config: DuelConfig,
        channel: C,
        api: A,
    ) -> Result<(Self, mpsc::Receiver<DuelEvent>), ConfigError> {
        config.validate()?;

        let api = Arc::new(api);
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::channel(config.event_channel_capacity);

        let state = LocalState::new(local_user);
        let (view_tx, view_rx) = watch::channel(DuelView {
            session_id: session_id.clone(),
            phase: DuelPhase::Idle,
            state: state.clone(),
            active_source: ActiveSource::None,
            countdown_remaining: None,
        });

        let engine = Engine {
            session_id: session_id.clone(),
            state,
            machine: DuelMachine::new(config.machine_config()),
            selector: TransportSelector::new(
                Arc::new(channel),
                Arc::clone(&api),
                SelectorSettings::from(&config),
            ),
            submitter: ActionSubmitter::new(api, session_id.clone()),
            countdown: None,
            tick_interval: config.tick_interval(),
            reveal_fallback: None,
            view_tx,
            event_tx,
        };

        tracing::info!(session = %session_id, "duel client starting");
        let task = tokio::spawn(engine.run(command_rx));

        let client = Self {
            session_id,
            commands: command_tx,
            view: view_rx,
            task: Some(task),
        };
        Ok((client, event_rx))
    }

    /// Session this client plays.
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Pick an option for the current question.
    pub async fn select_option(&self, option_id: OptionId) -> Result<(), DuelError> {
        self.request(|reply| EngineCommand::Select { option_id, reply })
            .await
    }

    /// Submit the picked option. A tap while a submission is in flight is
    /// absorbed and returns `Ok`.
    pub async fn submit_answer(&self) -> Result<(), DuelError> {
        self.request(|reply| EngineCommand::Submit { reply }).await
    }

    /// Signal readiness for the next question.
    pub async fn request_ready(&self) -> Result<(), DuelError> {
        self.request(|reply| EngineCommand::Ready { reply }).await
    }

    /// Current view.
    pub fn view(&self) -> DuelView {
        self.view.borrow().clone()
    }

    /// Current phase.
    pub fn phase(&self) -> DuelPhase {
        self.view.borrow().phase
    }

    /// Watch the view for changes.
    pub fn subscribe(&self) -> watch::Receiver<DuelView> {
        self.view.clone()
    }

    /// Whether the engine is still running.
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Stop the engine: tear down the channel, the poller, the countdown
    /// and any outstanding call. Idempotent.
    pub async fn stop(&mut self) {
        let Some(mut task) = self.task.take() else {
            return;
        };
        tracing::debug!(session = %self.session_id, "duel client stop requested");
        let _ = self.commands.send(EngineCommand::Shutdown);

        match tokio::time::timeout(SHUTDOWN_TIMEOUT, &mut task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!("duel engine terminated with join error: {}", e),
            Err(_) => {
                tracing::warn!("duel engine did not exit within timeout; aborting");
                task.abort();
            }
        }
    }

    async fn request(
        &self,
        make: impl FnOnce(Reply) -> EngineCommand,
    ) -> Result<(), DuelError> {
        if self.task.is_none() {
            return Err(DuelError::NotRunning);
        }
        let (reply, response) = oneshot::channel();
        self.commands
            .send(make(reply))
            .map_err(|_| DuelError::NotRunning)?;
        response.await.map_err(|_| DuelError::NotRunning)?
    }
}

impl std::fmt::Debug for DuelClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DuelClient")
            .field("session_id", &self.session_id)
            .field("phase", &self.phase())
            .field("running", &self.is_running())
            .finish()
    }
}

impl Drop for DuelClient {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// ===========================================
// Engine
// ===========================================

struct Engine<C: PushChannel, A: DuelApi> {
    session_id: SessionId,
    state: LocalState,
    machine: DuelMachine,
    selector: TransportSelector<C, A>,
    submitter: ActionSubmitter<A>,
    countdown: Option<Interval>,
    tick_interval: Duration,
    reveal_fallback: Option<(QuestionId, Instant)>,
    view_tx: watch::Sender<DuelView>,
    event_tx: mpsc::Sender<DuelEvent>,
}

impl<C: PushChannel, A: DuelApi> Engine<C, A> {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<EngineCommand>) {
        self.selector.start(self.session_id.clone());
        self.publish();

        loop {
            let fallback_at = self.reveal_fallback.as_ref().map(|(_, at)| *at);
            let feeding = !self.state.complete;
            let submitting = !self.submitter.is_idle();

            tokio::select! {
                command = commands.recv() => match command {
                    Some(EngineCommand::Shutdown) | None => break,
                    Some(command) => self.on_command(command),
                },
                Some(feed) = self.selector.next(), if feeding => self.on_feed(feed).await,
                Some(completion) = self.submitter.next_completion(), if submitting => {
                    self.on_completion(completion).await;
                }
                _ = next_tick(&mut self.countdown) => self.on_tick().await,
                _ = wait_until(fallback_at) => self.on_reveal_fallback().await,
            }
        }

        self.shutdown().await;
    }

    // ----- local actions -----

    fn on_command(&mut self, command: EngineCommand) {
        let (reply, result) = match command {
            EngineCommand::Select { option_id, reply } => (reply, self.select(option_id)),
            EngineCommand::Submit { reply } => (reply, self.submit()),
            EngineCommand::Ready { reply } => (reply, self.ready()),
            EngineCommand::Shutdown => return,
        };
        self.flush();
        // The caller may have given up waiting.
        let _ = reply.send(result);
    }

    fn select(&mut self, option_id: OptionId) -> Result<(), DuelError> {
        self.ensure_live()?;
        self.machine.select_option(&mut self.state, option_id)?;
        Ok(())
    }

    fn submit(&mut self) -> Result<(), DuelError> {
        self.ensure_live()?;
        let Some(command) = self.machine.submit(&mut self.state)? else {
            tracing::debug!("submit absorbed: already in flight");
            return Ok(());
        };
        let Command::SubmitAnswer {
            question_id,
            option_id,
        } = command
        else {
            return Ok(());
        };

        if let Err(rejected) = self
            .submitter
            .submit_answer(question_id.clone(), option_id)
        {
            if rejected == duel_core::SubmitRejected::AlreadyDone {
                self.machine
                    .on_submit_absorbed(&mut self.state, &question_id);
            } else {
                self.machine.on_submit_failed(&mut self.state, &question_id);
            }
            return Err(rejected.into());
        }
        Ok(())
    }

    fn ready(&mut self) -> Result<(), DuelError> {
        self.ensure_live()?;
        let Some(command) = self.machine.request_ready(&self.state)? else {
            tracing::debug!("ready absorbed: already in flight");
            return Ok(());
        };
        let Command::SignalReady { question_id } = command else {
            return Ok(());
        };

        if let Err(rejected) = self.submitter.signal_ready(question_id) {
            self.machine.on_ready_finished(&self.state);
            return Err(rejected.into());
        }
        Ok(())
    }

    fn ensure_live(&self) -> Result<(), DuelError> {
        if self.state.complete {
            return Err(DuelError::Terminal(self.state.status));
        }
        Ok(())
    }

    // ----- transport -----

    async fn on_feed(&mut self, feed: Feed) {
        match feed {
            Feed::Data(incoming) => {
                let signals = self.ingest(incoming);
                let commands = self.machine.on_signals(&self.state, &signals);
                self.react(&signals, commands).await;
            }
            Feed::SourceChanged(active) => {
                self.emit(DuelEvent::TransportChanged { active });
                self.publish();
            }
            Feed::ChannelError { reason } => {
                self.emit(DuelEvent::ChannelError { reason });
            }
        }
    }

    // ----- call outcomes -----

    async fn on_completion(&mut self, completion: Completion) {
        if self.state.complete {
            return;
        }

        match completion {
            Completion::Answer {
                question_id,
                result,
                ..
            } => match result {
                Ok(response) => {
                    let current = self.state.is_current(&question_id);
                    let signals = self.ingest(Incoming::AnswerAccepted {
                        question_id: question_id.clone(),
                        response,
                    });
                    if current {
                        self.emit(DuelEvent::AnswerAccepted {
                            question_id,
                            is_correct: response.is_correct,
                        });
                    }
                    let commands = self.machine.on_answer_accepted(&self.state, &signals);
                    self.react(&signals, commands).await;
                }
                Err(e) => {
                    self.machine.on_submit_failed(&mut self.state, &question_id);
                    self.report_failure(ActionKind::Answer, e);
                    self.flush();
                }
            },
            Completion::Reveal {
                question_id,
                result,
            } => match result {
                Ok(response) => {
                    let signals = self.ingest(Incoming::Revealed(response.into_event(question_id)));
                    let commands = self.machine.on_signals(&self.state, &signals);
                    self.react(&signals, commands).await;
                }
                Err(e) => {
                    let commands = self.machine.on_reveal_failed(&self.state, &question_id);
                    self.report_failure(ActionKind::Reveal, e);
                    self.apply(commands);
                    self.flush();
                }
            },
            Completion::Ready {
                question_id,
                result,
            } => match result {
                Ok(response) => {
                    let signals = self.ingest(Incoming::ReadyAccepted {
                        question_id,
                        response,
                    });
                    self.machine.on_ready_finished(&self.state);
                    let commands = self.machine.on_signals(&self.state, &signals);
                    self.react(&signals, commands).await;
                }
                Err(e) => {
                    self.machine.on_ready_finished(&self.state);
                    self.report_failure(ActionKind::Ready, e);
                    self.flush();
                }
            },
        }
    }

    fn report_failure(&mut self, action: ActionKind, source: ApiError) {
        let error = SubmissionError { action, source };
        tracing::warn!("{}", error);
        self.emit(DuelEvent::SubmissionFailed {
            action,
            retryable: error.is_retryable(),
            reason: error.source.to_string(),
        });
    }

    // ----- timers -----

    async fn on_tick(&mut self) {
        let before = self.machine.countdown_remaining();
        let commands = self.machine.on_tick(&self.state);
        let after = self.machine.countdown_remaining();

        if let Some(remaining) = after {
            if before != after {
                tracing::debug!(remaining, "countdown tick");
                self.emit(DuelEvent::CountdownTick { remaining });
            }
        }
        self.apply(commands);
        self.flush();
    }

    async fn on_reveal_fallback(&mut self) {
        let Some((question_id, _)) = self.reveal_fallback.take() else {
            return;
        };
        tracing::debug!(question = %question_id, "reveal fallback fired");
        let commands = self.machine.on_reveal_fallback(&self.state, &question_id);
        self.apply(commands);
        self.flush();
    }

    // ----- plumbing -----

    /// Merge server input into the projection.
    fn ingest(&mut self, incoming: Incoming) -> Vec<Signal> {
        if is_stale(&self.state, &incoming) {
            tracing::debug!(
                ordinal = ?self.state.ordinal(),
                "dropping input for an earlier question"
            );
            return Vec::new();
        }
        let (next, signals) = reconcile(self.state.clone(), incoming, self.machine.lock());
        self.state = next;
        signals
    }

    /// Announce what the reconciler observed, run the machine's commands,
    /// then publish. Completion ends the session.
    async fn react(&mut self, signals: &[Signal], commands: Vec<Command>) {
        let mut completed = None;

        for signal in signals {
            match signal {
                Signal::QuestionChanged { ordinal, total } => {
                    tracing::info!(ordinal, total, "question started");
                    self.emit(DuelEvent::QuestionStarted {
                        ordinal: *ordinal,
                        total: *total,
                    });
                }
                Signal::BothAnswered => self.emit(DuelEvent::BothAnswered),
                Signal::Revealed => {
                    if let Some(reveal) = self.state.reveal.clone() {
                        self.submitter.mark_revealed(&reveal.question_id);
                        self.emit(DuelEvent::Revealed {
                            question_id: reveal.question_id,
                            correct_option_id: reveal.correct_option_id,
                        });
                    }
                }
                Signal::AllReady => self.emit(DuelEvent::AllReady),
                Signal::Completed { status } => completed = Some(*status),
            }
        }

        self.apply(commands);
        self.flush();

        if let Some(status) = completed {
            self.complete(status).await;
        }
    }

    fn apply(&mut self, commands: Vec<Command>) {
        for command in commands {
            match command {
                Command::SubmitAnswer { question_id, .. } => {
                    // Only issued from a local submit.
                    tracing::debug!(question = %question_id, "ignoring unsolicited submit");
                }
                Command::RequestReveal { question_id } => {
                    if let Err(rejected) = self.submitter.request_reveal(question_id) {
                        tracing::debug!("reveal not issued: {}", rejected);
                    }
                }
                Command::SignalReady { question_id } => {
                    if let Err(rejected) = self.submitter.signal_ready(question_id) {
                        tracing::debug!("ready not issued: {}", rejected);
                    }
                }
                Command::StartCountdown { ticks } => {
                    tracing::debug!(ticks, "countdown started");
                    let mut timer = interval_at(
                        Instant::now() + self.tick_interval,
                        self.tick_interval,
                    );
                    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    self.countdown = Some(timer);
                }
                Command::StopCountdown => self.countdown = None,
                Command::ScheduleRevealFallback { question_id, after } => {
                    self.reveal_fallback = Some((question_id, Instant::now() + after));
                }
                Command::CancelRevealFallback => self.reveal_fallback = None,
            }
        }
    }

    /// Emit the phases entered since the last flush and publish the view.
    fn flush(&mut self) {
        for phase in self.machine.take_transitions() {
            self.emit(DuelEvent::PhaseChanged { phase });
        }
        self.publish();
    }

    fn publish(&self) {
        let next = DuelView {
            session_id: self.session_id.clone(),
            phase: self.machine.phase(),
            state: self.state.clone(),
            active_source: self.selector.active(),
            countdown_remaining: self.machine.countdown_remaining(),
        };
        self.view_tx.send_if_modified(|view| {
            if *view == next {
                return false;
            }
            *view = next;
            true
        });
    }

    fn emit(&self, event: DuelEvent) {
        match self.event_tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(dropped)) => {
                tracing::warn!("event channel full, dropping event: {:?}", dropped);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::trace!("event channel closed, receiver dropped");
            }
        }
    }

    async fn complete(&mut self, status: SessionStatus) {
        tracing::info!(session = %self.session_id, ?status, "session complete");
        self.countdown = None;
        self.reveal_fallback = None;
        self.submitter.shutdown();
        self.selector.stop().await;
        self.publish();

        // Last event; never dropped.
        if self
            .event_tx
            .send(DuelEvent::Completed { status })
            .await
            .is_err()
        {
            tracing::trace!("event channel closed, receiver dropped");
        }
    }

    async fn shutdown(&mut self) {
        self.countdown = None;
        self.reveal_fallback = None;
        self.submitter.shutdown();
        self.selector.stop().await;
        self.publish();
        tracing::info!(session = %self.session_id, "duel client stopped");
    }
}

async fn next_tick(countdown: &mut Option<Interval>) {
    match countdown {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
