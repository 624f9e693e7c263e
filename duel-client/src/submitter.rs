//! Action submitter.
//!
//! Issues the three mutating calls (submit-answer, request-reveal,
//! signal-ready) as spawned tasks and hands their outcomes back to the engine
//! as [`Completion`]s. Each call claims its single-flight guard before the
//! task is spawned, and the guard is released only when the completion is
//! taken from [`ActionSubmitter::next_completion`]. A task that dies without
//! a response still yields a failed completion, so its guard is released.

use std::collections::HashMap;
use std::sync::Arc;

use duel_core::{ActionGuards, SingleFlight, SubmitRejected};
use duel_types::{
    AnswerRequest, AnswerResponse, NextResponse, OptionId, QuestionId, RevealRequest,
    RevealResponse, SessionId,
};
use tokio::task::{self, JoinSet};

use crate::error::ActionKind;
use crate::transport::{ApiError, DuelApi};

/// Outcome of one mutating call.
#[derive(Debug)]
pub enum Completion {
    /// Submit-answer finished.
    Answer {
        /// Question that was answered
        question_id: QuestionId,
        /// Option that was submitted
        option_id: OptionId,
        /// Server response or failure
        result: Result<AnswerResponse, ApiError>,
    },
    /// Request-reveal finished.
    Reveal {
        /// Question to reveal
        question_id: QuestionId,
        /// Server response or failure
        result: Result<RevealResponse, ApiError>,
    },
    /// Signal-ready finished.
    Ready {
        /// Question the client was ready after
        question_id: QuestionId,
        /// Server response or failure
        result: Result<NextResponse, ApiError>,
    },
}

impl Completion {
    /// Which call this is.
    pub fn action(&self) -> ActionKind {
        match self {
            Self::Answer { .. } => ActionKind::Answer,
            Self::Reveal { .. } => ActionKind::Reveal,
            Self::Ready { .. } => ActionKind::Ready,
        }
    }

    /// Question the call was made for.
    pub fn question_id(&self) -> &QuestionId {
        match self {
            Self::Answer { question_id, .. }
            | Self::Reveal { question_id, .. }
            | Self::Ready { question_id, .. } => question_id,
        }
    }

    fn succeeded(&self) -> bool {
        match self {
            Self::Answer { result, .. } => result.is_ok(),
            Self::Reveal { result, .. } => result.is_ok(),
            Self::Ready { result, .. } => result.is_ok(),
        }
    }
}

/// What a spawned call was for, kept until the task is joined.
#[derive(Debug)]
enum Pending {
    Answer {
        question_id: QuestionId,
        option_id: OptionId,
    },
    Reveal {
        question_id: QuestionId,
    },
    Ready {
        question_id: QuestionId,
    },
}

impl Pending {
    fn failed(self, error: ApiError) -> Completion {
        match self {
            Self::Answer {
                question_id,
                option_id,
            } => Completion::Answer {
                question_id,
                option_id,
                result: Err(error),
            },
            Self::Reveal { question_id } => Completion::Reveal {
                question_id,
                result: Err(error),
            },
            Self::Ready { question_id } => Completion::Ready {
                question_id,
                result: Err(error),
            },
        }
    }
}

/// Wraps the mutating calls with single-flight guards.
pub struct ActionSubmitter<A: DuelApi> {
    api: Arc<A>,
    session_id: SessionId,
    guards: ActionGuards,
    tasks: JoinSet<Completion>,
    pending: HashMap<task::Id, Pending>,
}

impl<A: DuelApi> ActionSubmitter<A> {
    /// Create a submitter for one session.
    pub fn new(api: Arc<A>, session_id: SessionId) -> Self {
        Self {
            api,
            session_id,
            guards: ActionGuards::default(),
            tasks: JoinSet::new(),
            pending: HashMap::new(),
        }
    }

    /// Submit the chosen option for `question_id`.
    pub fn submit_answer(
        &mut self,
        question_id: QuestionId,
        option_id: OptionId,
    ) -> Result<(), SubmitRejected> {
        self.guards.answer.try_begin(&question_id)?;
        tracing::debug!(question = %question_id, option = %option_id, "submitting answer");

        let api = Arc::clone(&self.api);
        let session_id = self.session_id.clone();
        let pending = Pending::Answer {
            question_id: question_id.clone(),
            option_id: option_id.clone(),
        };
        let handle = self.tasks.spawn(async move {
            let request = AnswerRequest {
                question_id: question_id.clone(),
                selected_option_id: option_id.clone(),
            };
            let result = api.answer(&session_id, request).await;
            Completion::Answer {
                question_id,
                option_id,
                result,
            }
        });
        self.pending.insert(handle.id(), pending);
        Ok(())
    }

    /// Ask the server to reveal `question_id`.
    pub fn request_reveal(&mut self, question_id: QuestionId) -> Result<(), SubmitRejected> {
        self.guards.reveal.try_begin(&question_id)?;
        tracing::debug!(question = %question_id, "requesting reveal");

        let api = Arc::clone(&self.api);
        let session_id = self.session_id.clone();
        let pending = Pending::Reveal {
            question_id: question_id.clone(),
        };
        let handle = self.tasks.spawn(async move {
            let request = RevealRequest {
                question_id: question_id.clone(),
            };
            let result = api.reveal(&session_id, request).await;
            Completion::Reveal {
                question_id,
                result,
            }
        });
        self.pending.insert(handle.id(), pending);
        Ok(())
    }

    /// Tell the server this client is ready after `question_id`.
    pub fn signal_ready(&mut self, question_id: QuestionId) -> Result<(), SubmitRejected> {
        self.guards.ready.try_begin(&question_id)?;
        tracing::debug!(question = %question_id, "signalling ready");

        let api = Arc::clone(&self.api);
        let session_id = self.session_id.clone();
        let pending = Pending::Ready {
            question_id: question_id.clone(),
        };
        let handle = self.tasks.spawn(async move {
            let result = api.next(&session_id).await;
            Completion::Ready {
                question_id,
                result,
            }
        });
        self.pending.insert(handle.id(), pending);
        Ok(())
    }

    /// The reveal for `question_id` arrived through the transport; no reveal
    /// call is needed any more.
    pub fn mark_revealed(&mut self, question_id: &QuestionId) {
        self.guards.reveal.mark_done(question_id);
    }

    /// Whether no call is outstanding.
    pub fn is_idle(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Wait for the next call to finish and release its guard.
    ///
    /// Returns `None` when nothing is outstanding. Cancel-safe.
    pub async fn next_completion(&mut self) -> Option<Completion> {
        while let Some(joined) = self.tasks.join_next_with_id().await {
            let completion = match joined {
                Ok((id, completion)) => {
                    self.pending.remove(&id);
                    completion
                }
                Err(e) => {
                    let pending = self.pending.remove(&e.id());
                    if e.is_cancelled() {
                        tracing::debug!("submission task aborted");
                        continue;
                    }
                    tracing::warn!("submission task ended abnormally: {}", e);
                    let error = ApiError::Network(format!("request task failed: {}", e));
                    match pending {
                        Some(pending) => pending.failed(error),
                        None => continue,
                    }
                }
            };

            let succeeded = completion.succeeded();
            let question_id = completion.question_id().clone();
            self.guard_mut(completion.action())
                .finish(&question_id, succeeded);
            return Some(completion);
        }
        None
    }

    /// Abort every outstanding call.
    pub fn shutdown(&mut self) {
        if !self.tasks.is_empty() {
            tracing::debug!("aborting {} outstanding calls", self.tasks.len());
        }
        self.tasks.abort_all();
    }

    fn guard_mut(&mut self, action: ActionKind) -> &mut SingleFlight {
        match action {
            ActionKind::Answer => &mut self.guards.answer,
            ActionKind::Reveal => &mut self.guards.reveal,
            ActionKind::Ready => &mut self.guards.ready,
        }
    }
}
