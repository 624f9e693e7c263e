//! Simulation harness - an in-memory duel server and the players using it.
//!
//! [`FakeServer`] is the authoritative side of one session. It implements the
//! whole protocol (answers, idempotent reveal with scoring, ready/advance,
//! completion) and pushes frames to every subscribed participant. Each
//! participant talks to it through a [`ServerLink`], which implements both
//! collaborator traits of the client.
//!
//! Faults are injected on the server: dropping every push channel, refusing
//! reconnects, failing a participant's next answer, adding latency, or
//! ending the session mid-question.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use duel_client::{
    ApiError, ConfigError, DuelApi, DuelClient, DuelConfig, DuelError, DuelEvent, DuelView,
    PushChannel, TransportError,
};
use duel_types::{
    AnswerRequest, AnswerResponse, ChannelFrame, NextResponse, NextStatus, OptionId, Participant,
    ParticipantResponse, Question, QuestionId, QuestionOption, ReadyEvent, RevealRequest,
    RevealResponse, SessionId, SessionSnapshot, SessionStatus, UserId,
};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// How often the wait helpers re-check their condition.
const WAIT_STEP: Duration = Duration::from_millis(5);

/// Errors that can occur while driving a simulation.
#[derive(Debug, Error)]
pub enum SimError {
    /// A condition did not hold in time.
    #[error("timed out after {waited:?} waiting for {what}")]
    Timeout {
        /// What was awaited.
        what: String,
        /// How long.
        waited: Duration,
    },

    /// A client refused its configuration.
    #[error("client failed to start: {0}")]
    Start(#[from] ConfigError),
}

/// One question of the quiz together with its answer key.
#[derive(Debug, Clone)]
pub struct QuizQuestion {
    /// The question as delivered to clients.
    pub question: Question,
    /// The correct option.
    pub correct: OptionId,
}

/// Build a quiz of `count` three-option questions (`q1`, `q2`, ...).
///
/// Options are `a`, `b` and `c`; the correct one rotates starting at `b`.
pub fn quiz(count: u32) -> Vec<QuizQuestion> {
    (1..=count)
        .map(|ordinal| {
            let options: Vec<QuestionOption> = ["a", "b", "c"]
                .iter()
                .map(|id| QuestionOption {
                    id: OptionId::new(*id),
                    label: id.to_uppercase(),
                })
                .collect();
            let correct = options[ordinal as usize % options.len()].id.clone();
            QuizQuestion {
                question: Question {
                    id: QuestionId::new(format!("q{}", ordinal)),
                    prompt: format!("Question {}", ordinal),
                    options,
                    ordinal,
                    total: count,
                },
                correct,
            }
        })
        .collect()
}

// ============================================================================
// Server
// ============================================================================

/// In-memory authoritative duel server for one session.
#[derive(Clone)]
pub struct FakeServer {
    inner: Arc<Mutex<ServerInner>>,
}

struct ServerInner {
    session_id: SessionId,
    status: SessionStatus,
    quiz: Vec<QuizQuestion>,
    current: Option<usize>,
    participants: Vec<Participant>,
    answers: HashMap<UserId, OptionId>,
    revealed: bool,
    reveal_calls: HashMap<QuestionId, usize>,
    answer_calls: HashMap<UserId, usize>,
    subscribers: HashMap<UserId, mpsc::UnboundedSender<Vec<u8>>>,
    channels_down: bool,
    failing_answers: HashSet<UserId>,
    latency: Duration,
}

impl FakeServer {
    /// Create a session in the `waiting` state. Roster order is `users`
    /// order, so `users[0]` is the reveal leader.
    pub fn new(session_id: SessionId, users: [UserId; 2], quiz: Vec<QuizQuestion>) -> Self {
        let participants = users
            .into_iter()
            .map(|user_id| Participant {
                display_name: user_id.as_str().to_uppercase(),
                user_id,
                score: 0,
                error_count: 0,
                ready_for_next: false,
                has_answered: false,
                selected_option_id: None,
            })
            .collect();

        Self {
            inner: Arc::new(Mutex::new(ServerInner {
                session_id,
                status: SessionStatus::Waiting,
                quiz,
                current: None,
                participants,
                answers: HashMap::new(),
                revealed: false,
                reveal_calls: HashMap::new(),
                answer_calls: HashMap::new(),
                subscribers: HashMap::new(),
                channels_down: false,
                failing_answers: HashSet::new(),
                latency: Duration::ZERO,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ServerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Session id.
    pub fn session_id(&self) -> SessionId {
        self.lock().session_id.clone()
    }

    /// Start playing the first question.
    pub fn begin(&self) {
        let mut inner = self.lock();
        inner.status = SessionStatus::InProgress;
        inner.current = if inner.quiz.is_empty() { None } else { Some(0) };
        inner.broadcast_snapshots();
    }

    /// A link for `user` to hand to its client.
    pub fn link(&self, user: UserId) -> ServerLink {
        ServerLink {
            server: self.clone(),
            user,
            rx: Arc::new(tokio::sync::Mutex::new(None)),
        }
    }

    // ----- faults -----

    /// Drop every push connection and refuse new ones.
    pub fn drop_channels(&self) {
        let mut inner = self.lock();
        tracing::info!("server: dropping {} push connections", inner.subscribers.len());
        inner.channels_down = true;
        inner.subscribers.clear();
    }

    /// Accept push connections again.
    pub fn restore_channels(&self) {
        tracing::info!("server: accepting push connections");
        self.lock().channels_down = false;
    }

    /// Fail `user`'s next answer call without recording it.
    pub fn fail_next_answer(&self, user: &UserId) {
        self.lock().failing_answers.insert(user.clone());
    }

    /// Delay every request/response call.
    pub fn set_latency(&self, latency: Duration) {
        self.lock().latency = latency;
    }

    /// End the session now, leaving the current question in place.
    pub fn complete_now(&self) {
        let mut inner = self.lock();
        tracing::info!("server: session completed mid-question");
        inner.status = SessionStatus::Completed;
        inner.broadcast_snapshots();
    }

    // ----- inspection -----

    /// The question being played.
    pub fn current_question(&self) -> Option<Question> {
        let inner = self.lock();
        inner.current_quiz().map(|q| q.question.clone())
    }

    /// Correct option of the question being played.
    pub fn correct_option(&self) -> Option<OptionId> {
        let inner = self.lock();
        inner.current_quiz().map(|q| q.correct.clone())
    }

    /// Session status.
    pub fn status(&self) -> SessionStatus {
        self.lock().status
    }

    /// Reveal calls received for `question_id`, from either participant.
    pub fn reveal_calls(&self, question_id: &QuestionId) -> usize {
        self.lock()
            .reveal_calls
            .get(question_id)
            .copied()
            .unwrap_or(0)
    }

    /// Reveal calls per question.
    pub fn reveal_call_counts(&self) -> HashMap<QuestionId, usize> {
        self.lock().reveal_calls.clone()
    }

    /// Answer calls received from `user`, failed ones included.
    pub fn answer_calls(&self, user: &UserId) -> usize {
        self.lock().answer_calls.get(user).copied().unwrap_or(0)
    }

    /// Server-side score of `user`.
    pub fn score(&self, user: &UserId) -> Option<i32> {
        self.lock()
            .participants
            .iter()
            .find(|p| &p.user_id == user)
            .map(|p| p.score)
    }

    /// Snapshot as `user` would receive it.
    pub fn snapshot_for(&self, user: &UserId) -> SessionSnapshot {
        self.lock().snapshot_for(user)
    }

    // ----- protocol -----

    async fn delay(&self) {
        let latency = self.lock().latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }

    async fn answer(
        &self,
        user: &UserId,
        request: AnswerRequest,
    ) -> Result<AnswerResponse, ApiError> {
        self.delay().await;
        let mut inner = self.lock();
        *inner.answer_calls.entry(user.clone()).or_default() += 1;

        if inner.failing_answers.remove(user) {
            return Err(ApiError::Network("injected failure".into()));
        }
        let (question, correct) = inner.playing(&request.question_id)?;
        if !question.has_option(&request.selected_option_id) {
            return Err(ApiError::Status {
                status: 422,
                message: "unknown option".into(),
            });
        }

        // First answer wins; a repeat is acknowledged with the recorded one.
        let chosen = inner
            .answers
            .entry(user.clone())
            .or_insert(request.selected_option_id)
            .clone();
        let has_both_answered = inner.answers.len() == inner.participants.len();
        tracing::debug!(user = %user, option = %chosen, "server: answer recorded");
        inner.broadcast_snapshots();

        Ok(AnswerResponse {
            is_correct: chosen == correct,
            has_both_answered,
        })
    }

    async fn reveal(
        &self,
        user: &UserId,
        request: RevealRequest,
    ) -> Result<RevealResponse, ApiError> {
        self.delay().await;
        let mut inner = self.lock();
        *inner
            .reveal_calls
            .entry(request.question_id.clone())
            .or_default() += 1;

        let (_, correct) = inner.playing(&request.question_id)?;
        if inner.answers.len() < inner.participants.len() {
            return Err(conflict("not everyone has answered"));
        }

        let first = !inner.revealed;
        if first {
            inner.revealed = true;
            inner.score_current(&correct);
        }
        let responses = inner.responses(&correct);
        let response = RevealResponse {
            correct_option_id: correct.clone(),
            responses,
        };

        if first {
            tracing::debug!(user = %user, question = %request.question_id, "server: revealed");
            let event = response.clone().into_event(request.question_id);
            inner.broadcast(&ChannelFrame::QuestionRevealed(event));
        }
        Ok(response)
    }

    async fn next(&self, user: &UserId) -> Result<NextResponse, ApiError> {
        self.delay().await;
        let mut inner = self.lock();

        let Some(index) = inner.current else {
            return if inner.status.is_terminal() {
                Ok(NextResponse {
                    status: NextStatus::Completed,
                    current_question: None,
                })
            } else {
                Err(conflict("no active question"))
            };
        };
        if inner.status.is_terminal() {
            return Ok(NextResponse {
                status: NextStatus::Completed,
                current_question: None,
            });
        }
        if !inner.revealed {
            return Err(conflict("question not revealed"));
        }

        if let Some(p) = inner.participants.iter_mut().find(|p| &p.user_id == user) {
            p.ready_for_next = true;
        }
        let question_id = inner.quiz[index].question.id.clone();

        if !inner.participants.iter().all(|p| p.ready_for_next) {
            inner.broadcast(&ChannelFrame::ParticipantReady(ReadyEvent {
                user_id: user.clone(),
                question_id: Some(question_id),
                all_ready: false,
            }));
            inner.broadcast_snapshots();
            return Ok(NextResponse {
                status: NextStatus::WaitingForBoth,
                current_question: None,
            });
        }

        inner.answers.clear();
        inner.revealed = false;
        for p in &mut inner.participants {
            p.ready_for_next = false;
        }

        let response = if index + 1 >= inner.quiz.len() {
            tracing::debug!("server: last question played");
            inner.status = SessionStatus::Completed;
            inner.current = None;
            NextResponse {
                status: NextStatus::Completed,
                current_question: None,
            }
        } else {
            inner.current = Some(index + 1);
            tracing::debug!(ordinal = index + 2, "server: next question");
            NextResponse {
                status: NextStatus::Moved,
                current_question: Some(inner.quiz[index + 1].question.clone()),
            }
        };
        inner.broadcast_snapshots();
        Ok(response)
    }
}

impl ServerInner {
    fn current_quiz(&self) -> Option<&QuizQuestion> {
        self.current.and_then(|index| self.quiz.get(index))
    }

    /// The current question and its key, if `question_id` is still being played.
    fn playing(&self, question_id: &QuestionId) -> Result<(Question, OptionId), ApiError> {
        if self.status.is_terminal() {
            return Err(ApiError::Status {
                status: 410,
                message: "session is over".into(),
            });
        }
        match self.current_quiz() {
            Some(q) if &q.question.id == question_id => Ok((q.question.clone(), q.correct.clone())),
            Some(_) => Err(conflict("stale question")),
            None => Err(conflict("no active question")),
        }
    }

    fn score_current(&mut self, correct: &OptionId) {
        for p in &mut self.participants {
            match self.answers.get(&p.user_id) {
                Some(chosen) if chosen == correct => p.score += 1,
                _ => p.error_count += 1,
            }
        }
    }

    fn responses(&self, correct: &OptionId) -> Vec<ParticipantResponse> {
        self.participants
            .iter()
            .map(|p| {
                let chosen = self.answers.get(&p.user_id).cloned();
                ParticipantResponse {
                    user_id: p.user_id.clone(),
                    is_correct: chosen.as_ref() == Some(correct),
                    selected_option_id: chosen,
                    score: Some(p.score),
                }
            })
            .collect()
    }

    fn snapshot_for(&self, user: &UserId) -> SessionSnapshot {
        let participants = self
            .participants
            .iter()
            .map(|p| {
                let chosen = self.answers.get(&p.user_id);
                Participant {
                    has_answered: chosen.is_some(),
                    // A participant's choice is only ever sent to that participant.
                    selected_option_id: chosen.filter(|_| &p.user_id == user).cloned(),
                    ..p.clone()
                }
            })
            .collect();

        SessionSnapshot {
            status: self.status,
            current_question: self.current_quiz().map(|q| q.question.clone()),
            has_both_answered: self.answers.len() == self.participants.len(),
            participants,
            all_ready_for_next: self.participants.iter().all(|p| p.ready_for_next),
        }
    }

    fn broadcast_snapshots(&mut self) {
        let frames: Vec<(UserId, ChannelFrame)> = self
            .subscribers
            .keys()
            .map(|user| (user.clone(), ChannelFrame::SessionUpdated(self.snapshot_for(user))))
            .collect();
        for (user, frame) in frames {
            self.send_to(&user, &frame);
        }
    }

    fn broadcast(&mut self, frame: &ChannelFrame) {
        let users: Vec<UserId> = self.subscribers.keys().cloned().collect();
        for user in users {
            self.send_to(&user, frame);
        }
    }

    fn send_to(&mut self, user: &UserId, frame: &ChannelFrame) {
        let bytes = match frame.to_bytes() {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!("server: failed to encode frame: {}", e);
                return;
            }
        };
        let delivered = self
            .subscribers
            .get(user)
            .is_some_and(|tx| tx.send(bytes).is_ok());
        if !delivered {
            self.subscribers.remove(user);
        }
    }
}

fn conflict(message: &str) -> ApiError {
    ApiError::Status {
        status: 409,
        message: message.into(),
    }
}

// ============================================================================
// Link
// ============================================================================

/// One participant's connection to the [`FakeServer`].
#[derive(Clone)]
pub struct ServerLink {
    server: FakeServer,
    user: UserId,
    rx: Arc<tokio::sync::Mutex<Option<mpsc::UnboundedReceiver<Vec<u8>>>>>,
}

#[async_trait]
impl PushChannel for ServerLink {
    async fn connect(&self, session_id: &SessionId) -> Result<(), TransportError> {
        let rx = {
            let mut inner = self.server.lock();
            if &inner.session_id != session_id {
                return Err(TransportError::AuthRejected("unknown session".into()));
            }
            if inner.channels_down {
                return Err(TransportError::ConnectionFailed("server unreachable".into()));
            }
            let (tx, rx) = mpsc::unbounded_channel();
            inner.subscribers.insert(self.user.clone(), tx);
            rx
        };
        *self.rx.lock().await = Some(rx);
        Ok(())
    }

    async fn recv(&self) -> Result<Vec<u8>, TransportError> {
        let mut guard = self.rx.lock().await;
        let Some(rx) = guard.as_mut() else {
            return Err(TransportError::NotConnected);
        };
        match rx.recv().await {
            Some(bytes) => Ok(bytes),
            None => {
                *guard = None;
                Err(TransportError::ConnectionClosed(
                    "server closed the connection".into(),
                ))
            }
        }
    }

    async fn ping(&self) -> Result<(), TransportError> {
        let mut inner = self.server.lock();
        if !inner.subscribers.contains_key(&self.user) {
            return Err(TransportError::NotConnected);
        }
        inner.send_to(&self.user, &ChannelFrame::Pong);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.server.lock().subscribers.contains_key(&self.user)
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.server.lock().subscribers.remove(&self.user);
        *self.rx.lock().await = None;
        Ok(())
    }
}

#[async_trait]
impl DuelApi for ServerLink {
    async fn status(&self, session_id: &SessionId) -> Result<SessionSnapshot, ApiError> {
        self.server.delay().await;
        let inner = self.server.lock();
        if &inner.session_id != session_id {
            return Err(ApiError::Status {
                status: 404,
                message: "unknown session".into(),
            });
        }
        Ok(inner.snapshot_for(&self.user))
    }

    async fn answer(
        &self,
        _session_id: &SessionId,
        request: AnswerRequest,
    ) -> Result<AnswerResponse, ApiError> {
        self.server.answer(&self.user, request).await
    }

    async fn reveal(
        &self,
        _session_id: &SessionId,
        request: RevealRequest,
    ) -> Result<RevealResponse, ApiError> {
        self.server.reveal(&self.user, request).await
    }

    async fn next(&self, _session_id: &SessionId) -> Result<NextResponse, ApiError> {
        self.server.next(&self.user).await
    }
}

// ============================================================================
// Players
// ============================================================================

/// A [`DuelClient`] plus a record of everything it emitted.
pub struct Player {
    /// The participant this player acts for.
    pub user: UserId,
    /// The client under test.
    pub client: DuelClient,
    events: Arc<Mutex<Vec<DuelEvent>>>,
    views: Arc<Mutex<Vec<DuelView>>>,
    recorders: Vec<JoinHandle<()>>,
}

impl Player {
    /// Start a client for `user` against `server`.
    pub fn start(server: &FakeServer, user: UserId, config: DuelConfig) -> Result<Self, SimError> {
        let link = server.link(user.clone());
        let (client, mut event_rx) = DuelClient::start(
            server.session_id(),
            user.clone(),
            config,
            link.clone(),
            link,
        )?;

        let events = Arc::new(Mutex::new(Vec::new()));
        let event_log = Arc::clone(&events);
        let event_recorder = tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                lock(&event_log).push(event);
            }
        });

        let views = Arc::new(Mutex::new(Vec::new()));
        let view_log = Arc::clone(&views);
        let mut view_rx = client.subscribe();
        let view_recorder = tokio::spawn(async move {
            lock(&view_log).push(view_rx.borrow_and_update().clone());
            while view_rx.changed().await.is_ok() {
                let view = view_rx.borrow_and_update().clone();
                lock(&view_log).push(view);
            }
        });

        Ok(Self {
            user,
            client,
            events,
            views,
            recorders: vec![event_recorder, view_recorder],
        })
    }

    /// Every event emitted so far.
    pub fn events(&self) -> Vec<DuelEvent> {
        lock(&self.events).clone()
    }

    /// Every distinct view published so far.
    pub fn views(&self) -> Vec<DuelView> {
        lock(&self.views).clone()
    }

    /// The current view.
    pub fn view(&self) -> DuelView {
        self.client.view()
    }

    /// Whether an event matching `pred` was emitted.
    pub fn saw(&self, pred: impl Fn(&DuelEvent) -> bool) -> bool {
        lock(&self.events).iter().any(pred)
    }

    /// Wait until an event matching `pred` has been emitted.
    pub async fn wait_for_event(
        &self,
        what: &str,
        within: Duration,
        pred: impl Fn(&DuelEvent) -> bool,
    ) -> Result<DuelEvent, SimError> {
        let found = eventually(within, || lock(&self.events).iter().find(|e| pred(e)).cloned()).await;
        found.ok_or_else(|| SimError::Timeout {
            what: format!("{} ({})", what, self.user),
            waited: within,
        })
    }

    /// Wait until the view satisfies `pred`.
    pub async fn wait_until(
        &self,
        what: &str,
        within: Duration,
        pred: impl Fn(&DuelView) -> bool,
    ) -> Result<DuelView, SimError> {
        let found = eventually(within, || Some(self.client.view()).filter(|v| pred(v))).await;
        found.ok_or_else(|| SimError::Timeout {
            what: format!("{} ({})", what, self.user),
            waited: within,
        })
    }

    /// Select `option` and submit it.
    pub async fn answer(&self, option: &OptionId) -> Result<(), DuelError> {
        self.client.select_option(option.clone()).await?;
        self.client.submit_answer().await
    }

    /// Stop the client.
    pub async fn stop(&mut self) {
        self.client.stop().await;
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        for task in self.recorders.drain(..) {
            task.abort();
        }
    }
}

/// Two players in one session on one server.
pub struct Duel {
    /// The server.
    pub server: FakeServer,
    /// First in roster order: the reveal leader.
    pub alice: Player,
    /// Second in roster order: the reveal follower.
    pub bob: Player,
}

impl Duel {
    /// Start a session of `questions` questions and wait until both players
    /// show the first one.
    pub async fn start(questions: u32, config: DuelConfig) -> Result<Self, SimError> {
        let alice = UserId::new("alice");
        let bob = UserId::new("bob");
        let server = FakeServer::new(
            SessionId::new("duel-1"),
            [alice.clone(), bob.clone()],
            quiz(questions),
        );
        server.begin();

        let alice = Player::start(&server, alice, config.clone())?;
        let bob = Player::start(&server, bob, config)?;
        for player in [&alice, &bob] {
            player
                .wait_for_event("first question", Duration::from_secs(5), |e| {
                    matches!(e, DuelEvent::QuestionStarted { ordinal: 1, .. })
                })
                .await?;
        }

        Ok(Self { server, alice, bob })
    }

    /// Both players.
    pub fn players(&self) -> [&Player; 2] {
        [&self.alice, &self.bob]
    }

    /// Stop both clients.
    pub async fn stop(&mut self) {
        self.alice.stop().await;
        self.bob.stop().await;
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Poll `check` until it yields a value or `within` elapses.
async fn eventually<T>(within: Duration, mut check: impl FnMut() -> Option<T>) -> Option<T> {
    let deadline = tokio::time::Instant::now() + within;
    loop {
        if let Some(value) = check() {
            return Some(value);
        }
        if tokio::time::Instant::now() >= deadline {
            return None;
        }
        tokio::time::sleep(WAIT_STEP).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server() -> FakeServer {
        let server = FakeServer::new(
            SessionId::new("s1"),
            [UserId::new("alice"), UserId::new("bob")],
            quiz(2),
        );
        server.begin();
        server
    }

    fn answer_request(option: &OptionId) -> AnswerRequest {
        AnswerRequest {
            question_id: QuestionId::new("q1"),
            selected_option_id: option.clone(),
        }
    }

    #[test]
    fn quiz_rotates_correct_option() {
        let quiz = quiz(3);
        assert_eq!(quiz[0].correct, OptionId::new("b"));
        assert_eq!(quiz[1].correct, OptionId::new("c"));
        assert_eq!(quiz[2].correct, OptionId::new("a"));
        assert!(quiz[2].question.is_last());
    }

    #[test]
    fn snapshot_hides_opponent_choice() {
        let server = server();
        {
            let mut inner = server.lock();
            inner
                .answers
                .insert(UserId::new("bob"), OptionId::new("a"));
        }

        let snapshot = server.snapshot_for(&UserId::new("alice"));
        let bob = snapshot.participant(&UserId::new("bob")).unwrap();
        assert!(bob.has_answered);
        assert_eq!(bob.selected_option_id, None);

        let snapshot = server.snapshot_for(&UserId::new("bob"));
        let bob = snapshot.participant(&UserId::new("bob")).unwrap();
        assert_eq!(bob.selected_option_id, Some(OptionId::new("a")));
    }

    #[tokio::test]
    async fn reveal_is_idempotent_and_scores_once() {
        let server = server();
        let alice = server.link(UserId::new("alice"));
        let bob = server.link(UserId::new("bob"));
        let session = server.session_id();

        alice
            .answer(&session, answer_request(&OptionId::new("b")))
            .await
            .unwrap();
        let response = bob
            .answer(&session, answer_request(&OptionId::new("a")))
            .await
            .unwrap();
        assert!(response.has_both_answered);
        assert!(!response.is_correct);

        let request = RevealRequest {
            question_id: QuestionId::new("q1"),
        };
        let first = alice.reveal(&session, request.clone()).await.unwrap();
        let second = bob.reveal(&session, request).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(server.reveal_calls(&QuestionId::new("q1")), 2);
        assert_eq!(server.score(&UserId::new("alice")), Some(1));
        assert_eq!(server.score(&UserId::new("bob")), Some(0));
    }

    #[tokio::test]
    async fn reveal_before_both_answered_is_conflict() {
        let server = server();
        let alice = server.link(UserId::new("alice"));
        let session = server.session_id();

        let result = alice
            .reveal(
                &session,
                RevealRequest {
                    question_id: QuestionId::new("q1"),
                },
            )
            .await;
        assert!(matches!(result, Err(ApiError::Status { status: 409, .. })));
    }

    #[tokio::test]
    async fn subscribers_receive_updates_until_dropped() {
        let server = server();
        let alice = server.link(UserId::new("alice"));
        let session = server.session_id();
        alice.connect(&session).await.unwrap();
        assert!(alice.is_connected());

        server.complete_now();
        let bytes = alice.recv().await.unwrap();
        match ChannelFrame::from_bytes(&bytes).unwrap() {
            ChannelFrame::SessionUpdated(snapshot) => {
                assert_eq!(snapshot.status, SessionStatus::Completed);
                assert!(snapshot.current_question.is_some());
            }
            other => panic!("Expected SessionUpdated, got {:?}", other),
        }

        server.drop_channels();
        assert!(alice.recv().await.is_err());
        assert!(!alice.is_connected());
        assert!(matches!(
            alice.connect(&session).await,
            Err(TransportError::ConnectionFailed(_))
        ));

        server.restore_channels();
        assert!(alice.connect(&session).await.is_ok());
    }

    #[tokio::test]
    async fn last_ready_completes_session() {
        let server = FakeServer::new(
            SessionId::new("s1"),
            [UserId::new("alice"), UserId::new("bob")],
            quiz(1),
        );
        server.begin();
        let session = server.session_id();
        let alice = server.link(UserId::new("alice"));
        let bob = server.link(UserId::new("bob"));

        for link in [&alice, &bob] {
            link.answer(&session, answer_request(&OptionId::new("b")))
                .await
                .unwrap();
        }
        alice
            .reveal(
                &session,
                RevealRequest {
                    question_id: QuestionId::new("q1"),
                },
            )
            .await
            .unwrap();

        let first = alice.next(&session).await.unwrap();
        assert_eq!(first.status, NextStatus::WaitingForBoth);
        let second = bob.next(&session).await.unwrap();
        assert_eq!(second.status, NextStatus::Completed);
        assert_eq!(server.status(), SessionStatus::Completed);
        assert!(server.current_question().is_none());
    }
}
