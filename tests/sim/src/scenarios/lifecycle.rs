//! Session lifecycle scenarios.
//!
//! Whole duels from first question to completion, the ready handshake
//! between questions, and the server ending a session early.

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use duel_client::{DuelError, DuelEvent, DuelPhase, MachineError};
    use duel_types::{OptionId, QuestionId, SessionStatus};

    use crate::assertions::{
        assert_completed_last, assert_converged, assert_single_reveal, assert_terminal,
    };
    use crate::harness::{Duel, Player};
    use crate::init_test_logging;
    use crate::scenarios::sim_config;

    const STEP: Duration = Duration::from_secs(10);

    fn wrong_option(correct: &OptionId) -> OptionId {
        if correct.as_str() == "a" {
            OptionId::new("c")
        } else {
            OptionId::new("a")
        }
    }

    async fn revealed(player: &Player, question_id: &QuestionId) {
        player
            .wait_for_event("reveal", STEP, |e| {
                matches!(e, DuelEvent::Revealed { question_id: q, .. } if q == question_id)
            })
            .await
            .unwrap();
    }

    // ========================================================================
    // Full sessions
    // ========================================================================

    /// Three questions played to the end: every question revealed once,
    /// scores agree, and `Completed` is the last thing either client says.
    #[tokio::test(start_paused = true)]
    async fn full_duel_runs_to_completion() {
        init_test_logging();
        let mut duel = Duel::start(3, sim_config()).await.unwrap();
        let mut played = Vec::new();

        for ordinal in 1..=3u32 {
            let question = duel.server.current_question().unwrap();
            assert_eq!(question.ordinal, ordinal);
            let correct = duel.server.correct_option().unwrap();

            duel.alice.answer(&correct).await.unwrap();
            duel.bob.answer(&wrong_option(&correct)).await.unwrap();
            for player in duel.players() {
                revealed(player, &question.id).await;
            }
            let result = assert_converged(&duel.alice.view(), &duel.bob.view());
            assert!(result.passed, "{:?}", result.failure_details);

            duel.alice.client.request_ready().await.unwrap();
            duel.alice
                .wait_until("alice ready", STEP, |v| {
                    v.phase == DuelPhase::WaitingForOpponentReady
                })
                .await
                .unwrap();
            duel.bob.client.request_ready().await.unwrap();

            if ordinal < 3 {
                for player in duel.players() {
                    player
                        .wait_for_event("next question", STEP, |e| {
                            *e == DuelEvent::QuestionStarted {
                                ordinal: ordinal + 1,
                                total: 3,
                            }
                        })
                        .await
                        .unwrap();
                }
            }
            played.push(question.id);
        }

        for player in duel.players() {
            player
                .wait_for_event("completion", STEP, |e| {
                    matches!(e, DuelEvent::Completed { .. })
                })
                .await
                .unwrap();
        }
        // Nothing else may arrive after completion.
        tokio::time::sleep(Duration::from_secs(30)).await;

        assert_eq!(duel.server.status(), SessionStatus::Completed);
        let result = assert_single_reveal(&played, &duel.server.reveal_call_counts());
        assert!(result.passed, "{:?}", result.failure_details);

        for player in duel.players() {
            let events = player.events();
            let result = assert_completed_last(&events);
            assert!(result.passed, "{:?}", result.failure_details);
            let result = assert_terminal(&events);
            assert!(result.passed, "{:?}", result.failure_details);
            assert!(player.view().state.complete);
        }

        let scores: Vec<i32> = duel
            .bob
            .view()
            .state
            .participants
            .iter()
            .map(|p| p.score)
            .collect();
        assert_eq!(scores, vec![3, 0]);
        assert_eq!(duel.server.score(&duel.alice.user), Some(3));

        duel.stop().await;
    }

    // ========================================================================
    // Ready handshake
    // ========================================================================

    /// Readiness is only accepted after the reveal, and one ready alone does
    /// not advance the session.
    #[tokio::test(start_paused = true)]
    async fn ready_waits_for_reveal_and_opponent() {
        init_test_logging();
        let mut duel = Duel::start(2, sim_config()).await.unwrap();

        assert!(matches!(
            duel.alice.client.request_ready().await,
            Err(DuelError::Machine(MachineError::NotRevealed))
        ));

        let question = duel.server.current_question().unwrap();
        duel.alice.answer(&OptionId::new("a")).await.unwrap();
        duel.bob.answer(&OptionId::new("a")).await.unwrap();
        for player in duel.players() {
            revealed(player, &question.id).await;
        }

        duel.bob.client.request_ready().await.unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;

        assert_eq!(duel.bob.view().phase, DuelPhase::WaitingForOpponentReady);
        assert_eq!(duel.alice.view().state.question_id(), Some(&question.id));
        assert!(duel
            .alice
            .view()
            .state
            .ready
            .is_ready(&duel.bob.user));
        assert!(!duel.alice.saw(|e| matches!(e, DuelEvent::QuestionStarted { ordinal: 2, .. })));

        duel.alice.client.request_ready().await.unwrap();
        for player in duel.players() {
            player
                .wait_for_event("next question", STEP, |e| {
                    matches!(e, DuelEvent::QuestionStarted { ordinal: 2, .. })
                })
                .await
                .unwrap();
        }

        // The new question starts clean on both sides.
        for player in duel.players() {
            let view = player.view();
            assert_eq!(view.phase, DuelPhase::Idle);
            assert_eq!(view.state.answer.selected_option_id, None);
            assert!(view.state.reveal.is_none());
            assert!(!view.state.both_answered);
        }

        duel.stop().await;
    }

    // ========================================================================
    // Early completion
    // ========================================================================

    /// The server ends the session while a question is still showing: both
    /// clients complete and refuse further actions.
    #[tokio::test(start_paused = true)]
    async fn completion_mid_question_is_terminal() {
        init_test_logging();
        let mut duel = Duel::start(3, sim_config()).await.unwrap();

        duel.alice.answer(&OptionId::new("b")).await.unwrap();
        duel.bob.client.select_option(OptionId::new("c")).await.unwrap();
        duel.alice
            .wait_until("alice waiting", STEP, |v| {
                v.phase == DuelPhase::WaitingForOpponent
            })
            .await
            .unwrap();

        duel.server.complete_now();
        assert!(duel.server.current_question().is_some());

        for player in duel.players() {
            let event = player
                .wait_for_event("completion", STEP, |e| {
                    matches!(e, DuelEvent::Completed { .. })
                })
                .await
                .unwrap();
            assert_eq!(
                event,
                DuelEvent::Completed {
                    status: SessionStatus::Completed
                }
            );
        }

        assert!(matches!(
            duel.bob.client.submit_answer().await,
            Err(DuelError::Terminal(SessionStatus::Completed))
        ));
        tokio::time::sleep(Duration::from_secs(30)).await;

        for player in duel.players() {
            assert_eq!(player.view().phase, DuelPhase::Completed);
            let events = player.events();
            let result = assert_completed_last(&events);
            assert!(result.passed, "{:?}", result.failure_details);
            let result = assert_terminal(&events);
            assert!(result.passed, "{:?}", result.failure_details);
        }
        assert_eq!(duel.server.reveal_call_counts().len(), 0);

        duel.stop().await;
    }
}
