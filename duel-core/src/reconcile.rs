//! Session reconciler.
//!
//! Merges server input (pushed or polled snapshots, events, and responses to
//! this client's own calls) into the [`LocalState`] projection. This is a pure
//! function: it takes the current state and an input, and returns the next
//! state plus the [`Signal`]s describing the edges it observed. The caller
//! (the duel machine and the client event loop) reacts to the signals.
//!
//! Rules, in priority order:
//!
//! 1. Only a question with a later ordinal than the current one is a
//!    question transition: the question-scoped state is reset, the new
//!    question is adopted, and nothing else is merged this cycle. Input
//!    carrying an earlier question is stale and dropped whole.
//! 2. A non-null selection is never cleared or changed, and
//!    `has_submitted_final` is never unset. Server confirmation that this
//!    client answered may only set it.
//! 3. `both_answered` may rise at any time. It may fall only while no
//!    countdown has started and no reveal happened; afterwards it is pinned.
//! 4. Readiness comes from the server. The only local write is the
//!    optimistic flag after a successful ready call, which the next snapshot
//!    overwrites.
//! 5. A terminal status, or a null question while the status still says
//!    `in_progress`, completes the session.

use duel_types::{
    AnswerResponse, NextResponse, NextStatus, Question, QuestionId, ReadyEvent, RevealedEvent,
    SessionSnapshot, SessionStatus,
};

use crate::projection::{LocalState, RevealState};

/// Input to the reconciler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    /// Full snapshot, from the push channel or from the poller.
    Snapshot(SessionSnapshot),
    /// Reveal, from the push channel or from this client's reveal call.
    Revealed(RevealedEvent),
    /// A participant became ready (push channel).
    ParticipantReady(ReadyEvent),
    /// This client's answer call succeeded.
    AnswerAccepted {
        /// Question that was answered
        question_id: QuestionId,
        /// Server response
        response: AnswerResponse,
    },
    /// This client's ready call succeeded.
    ReadyAccepted {
        /// Question the client was ready after
        question_id: QuestionId,
        /// Server response
        response: NextResponse,
    },
}

/// Edges observed while reconciling, in the order they happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    /// A new question was adopted; all question-scoped state was reset.
    QuestionChanged {
        /// Ordinal of the new question
        ordinal: u32,
        /// Total questions in the session
        total: u32,
    },
    /// Both participants answered the current question.
    BothAnswered,
    /// The current question was revealed.
    Revealed,
    /// Both participants are ready for the next question.
    AllReady,
    /// The session is over.
    Completed {
        /// Status that ended it
        status: SessionStatus,
    },
}

/// State owned by the duel machine that the reconciler must respect.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileLock {
    /// The countdown for the current question has started.
    pub countdown_started: bool,
}

/// Merge `incoming` into `current`.
///
/// This is a pure function - no side effects.
pub fn reconcile(
    current: LocalState,
    incoming: Incoming,
    lock: ReconcileLock,
) -> (LocalState, Vec<Signal>) {
    if current.complete {
        return (current, vec![]);
    }

    if is_stale(&current, &incoming) {
        return (current, vec![]);
    }

    match incoming {
        Incoming::Snapshot(snapshot) => merge_snapshot(current, snapshot, lock),
        Incoming::Revealed(event) => merge_reveal(current, event),
        Incoming::ParticipantReady(event) => merge_ready(current, event),
        Incoming::AnswerAccepted {
            question_id,
            response,
        } => merge_answer_ack(current, &question_id, response, lock),
        Incoming::ReadyAccepted {
            question_id,
            response,
        } => merge_ready_ack(current, &question_id, response),
    }
}

/// Whether `incoming` describes a question older than the one `current` is
/// on.
///
/// Snapshots and ready responses can arrive out of order: a poll or
/// catch-up fetch issued on question N may land after a push for N+1. A
/// terminal snapshot is never stale.
pub fn is_stale(current: &LocalState, incoming: &Incoming) -> bool {
    let question = match incoming {
        Incoming::Snapshot(snapshot) if !snapshot.status.is_terminal() => {
            snapshot.current_question.as_ref()
        }
        Incoming::ReadyAccepted { response, .. } if response.status == NextStatus::Moved => {
            response.current_question.as_ref()
        }
        _ => None,
    };
    match (current.question.as_ref(), question) {
        (Some(ours), Some(theirs)) => {
            theirs.ordinal < ours.ordinal
                || (theirs.ordinal == ours.ordinal && theirs.id != ours.id)
        }
        _ => false,
    }
}

fn is_newer(state: &LocalState, question: &Question) -> bool {
    state.ordinal().map_or(true, |ordinal| question.ordinal > ordinal)
}

fn merge_snapshot(
    mut state: LocalState,
    snapshot: SessionSnapshot,
    lock: ReconcileLock,
) -> (LocalState, Vec<Signal>) {
    let SessionSnapshot {
        status,
        current_question,
        has_both_answered,
        participants,
        all_ready_for_next,
    } = snapshot;

    if !participants.is_empty() {
        state.participants = participants;
    }

    // The server clearing the question is the stronger signal, even while
    // its status field still says in_progress.
    if status.is_terminal() || (status == SessionStatus::InProgress && current_question.is_none())
    {
        let final_status = if status.is_terminal() {
            status
        } else {
            SessionStatus::Completed
        };
        return complete(state, final_status);
    }

    state.status = status;

    if let Some(question) = current_question {
        if is_newer(&state, &question) {
            return transition(state, question);
        }
    }

    if state.question.is_none() {
        return (state, vec![]);
    }

    let mut signals = Vec::new();

    let server_view = state
        .participants
        .iter()
        .find(|p| p.user_id == state.local_user)
        .map(|me| (me.has_answered, me.selected_option_id.clone()));
    if let Some((true, server_choice)) = server_view {
        state.answer.has_submitted_final = true;
        if state.answer.selected_option_id.is_none() {
            state.answer.selected_option_id = server_choice;
        }
    }

    merge_both_answered(&mut state, has_both_answered, lock, &mut signals);

    let flags: Vec<_> = state
        .participants
        .iter()
        .map(|p| (p.user_id.clone(), p.ready_for_next))
        .collect();
    for (user, ready) in flags {
        state.ready.set(&user, ready);
    }
    let was_all_ready = state.ready.all_ready;
    state.ready.all_ready = all_ready_for_next;
    if all_ready_for_next && !was_all_ready {
        signals.push(Signal::AllReady);
    }

    (state, signals)
}

fn merge_reveal(mut state: LocalState, event: RevealedEvent) -> (LocalState, Vec<Signal>) {
    if !state.is_current(&event.question_id) || state.reveal.is_some() {
        return (state, vec![]);
    }

    for response in &event.responses {
        if let Some(score) = response.score {
            if let Some(p) = state
                .participants
                .iter_mut()
                .find(|p| p.user_id == response.user_id)
            {
                p.score = score;
            }
        }
    }

    // A reveal implies both answered; no BothAnswered edge is reported
    // because there is nothing left to count down to.
    state.both_answered = true;
    state.reveal = Some(RevealState {
        question_id: event.question_id,
        correct_option_id: event.correct_option_id,
        responses: event.responses,
    });

    (state, vec![Signal::Revealed])
}

fn merge_ready(mut state: LocalState, event: ReadyEvent) -> (LocalState, Vec<Signal>) {
    if state.question.is_none() {
        return (state, vec![]);
    }
    if let Some(question_id) = &event.question_id {
        if !state.is_current(question_id) {
            return (state, vec![]);
        }
    }

    state.ready.set(&event.user_id, true);

    let mut signals = Vec::new();
    if event.all_ready && !state.ready.all_ready {
        state.ready.all_ready = true;
        signals.push(Signal::AllReady);
    }
    (state, signals)
}

fn merge_answer_ack(
    mut state: LocalState,
    question_id: &QuestionId,
    response: AnswerResponse,
    lock: ReconcileLock,
) -> (LocalState, Vec<Signal>) {
    if !state.is_current(question_id) {
        return (state, vec![]);
    }

    state.answer.is_submit_in_flight = false;
    state.answer.has_submitted_final = true;

    let mut signals = Vec::new();
    merge_both_answered(&mut state, response.has_both_answered, lock, &mut signals);
    (state, signals)
}

fn merge_ready_ack(
    mut state: LocalState,
    question_id: &QuestionId,
    response: NextResponse,
) -> (LocalState, Vec<Signal>) {
    match response.status {
        NextStatus::Completed => complete(state, SessionStatus::Completed),
        NextStatus::Moved => match response.current_question {
            Some(question) if is_newer(&state, &question) => transition(state, question),
            _ => {
                if state.is_current(question_id) {
                    let me = state.local_user.clone();
                    state.ready.set(&me, true);
                }
                (state, vec![])
            }
        },
        NextStatus::WaitingForBoth => {
            if state.is_current(question_id) {
                let me = state.local_user.clone();
                state.ready.set(&me, true);
            }
            (state, vec![])
        }
    }
}

fn merge_both_answered(
    state: &mut LocalState,
    incoming: bool,
    lock: ReconcileLock,
    signals: &mut Vec<Signal>,
) {
    match (state.both_answered, incoming) {
        (false, true) => {
            state.both_answered = true;
            signals.push(Signal::BothAnswered);
        }
        (true, false) if !lock.countdown_started && state.reveal.is_none() => {
            state.both_answered = false;
        }
        _ => {}
    }
}

fn transition(mut state: LocalState, question: Question) -> (LocalState, Vec<Signal>) {
    let signal = Signal::QuestionChanged {
        ordinal: question.ordinal,
        total: question.total,
    };
    state.begin_question(question);
    (state, vec![signal])
}

fn complete(mut state: LocalState, status: SessionStatus) -> (LocalState, Vec<Signal>) {
    state.status = status;
    state.complete = true;
    (state, vec![Signal::Completed { status }])
}
