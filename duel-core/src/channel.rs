//! Push-channel connection state machine.
//!
//! This module provides a pure, side-effect-free state machine for the
//! lifecycle of the session's push channel. It takes events as input and
//! produces a new state plus a list of actions to execute.
//!
//! The actual I/O (connecting, receiving frames, pinging) is performed by the
//! channel task in `quizduel-client`, not by this module.

use std::time::Duration;

/// Base delay for the first reconnect attempt.
const BACKOFF_BASE_MS: u64 = 500;

/// Upper bound on the exponential part of the backoff.
const BACKOFF_CAP_MS: u64 = 8_000;

/// Upper bound on the random jitter added to every backoff.
const MAX_JITTER_MS: u64 = 250;

/// Connection state machine - NO I/O, just state transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Not connected and not trying to.
    Disconnected,
    /// Connection (subscribe + auth) in progress.
    Connecting {
        /// Failed attempts before this one.
        attempt: u32,
    },
    /// Subscribed to the session topic.
    Connected,
    /// Waiting for the reconnect timer.
    Reconnecting {
        /// Failed attempts so far.
        attempt: u32,
    },
    /// Reconnect attempts exhausted. Terminal until disconnect is requested.
    GaveUp {
        /// Failed attempts in total.
        attempts: u32,
    },
}

impl ChannelState {
    /// Create a new state machine in the Disconnected state.
    pub fn new() -> Self {
        Self::Disconnected
    }

    /// Process an event and return the new state plus actions to execute.
    ///
    /// This is a pure function - no side effects. `max_attempts` bounds the
    /// number of reconnects after the initial connect.
    pub fn on_event(self, event: ChannelEvent, max_attempts: u32) -> (Self, Vec<ChannelAction>) {
        match (self, event) {
            // From Disconnected
            (Self::Disconnected, ChannelEvent::ConnectRequested) => {
                (Self::Connecting { attempt: 0 }, vec![ChannelAction::Connect])
            }

            // From Connecting
            (Self::Connecting { .. }, ChannelEvent::ConnectSucceeded) => (
                Self::Connected,
                vec![ChannelAction::Emit(ChannelSignal::Connected)],
            ),
            (Self::Connecting { attempt }, ChannelEvent::ConnectFailed { error }) => {
                let next = attempt.saturating_add(1);
                let failed = ChannelAction::Emit(ChannelSignal::ConnectFailed {
                    error,
                    attempt: next,
                });
                if next > max_attempts {
                    (
                        Self::GaveUp { attempts: next },
                        vec![
                            failed,
                            ChannelAction::Emit(ChannelSignal::GaveUp { attempts: next }),
                        ],
                    )
                } else {
                    (
                        Self::Reconnecting { attempt: next },
                        vec![
                            failed,
                            ChannelAction::StartReconnectTimer {
                                delay: calculate_backoff(next),
                            },
                        ],
                    )
                }
            }

            // From Connected
            (Self::Connected, ChannelEvent::Disconnected { reason }) => {
                if max_attempts == 0 {
                    return (
                        Self::GaveUp { attempts: 0 },
                        vec![
                            ChannelAction::Emit(ChannelSignal::Disconnected { reason }),
                            ChannelAction::Emit(ChannelSignal::GaveUp { attempts: 0 }),
                        ],
                    );
                }
                (
                    Self::Reconnecting { attempt: 1 },
                    vec![
                        ChannelAction::Emit(ChannelSignal::Disconnected { reason }),
                        ChannelAction::StartReconnectTimer {
                            delay: calculate_backoff(1),
                        },
                    ],
                )
            }

            // From Reconnecting
            (Self::Reconnecting { attempt }, ChannelEvent::ReconnectTimer) => {
                (Self::Connecting { attempt }, vec![ChannelAction::Connect])
            }

            // Teardown
            (Self::Connected, ChannelEvent::DisconnectRequested) => {
                (Self::Disconnected, vec![ChannelAction::Disconnect])
            }
            (Self::Connecting { .. }, ChannelEvent::DisconnectRequested)
            | (Self::Reconnecting { .. }, ChannelEvent::DisconnectRequested) => (
                Self::Disconnected,
                vec![ChannelAction::CancelReconnect, ChannelAction::Disconnect],
            ),
            (Self::GaveUp { .. }, ChannelEvent::DisconnectRequested) => {
                (Self::Disconnected, vec![])
            }

            // Invalid transitions - stay in current state
            (state, _) => (state, vec![]),
        }
    }

    /// Check if currently connected.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl Default for ChannelState {
    fn default() -> Self {
        Self::new()
    }
}

/// Events that can occur in the channel lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// Owner asked for a connection.
    ConnectRequested,
    /// Subscribe + auth succeeded.
    ConnectSucceeded,
    /// Subscribe or auth failed.
    ConnectFailed {
        /// Error message describing the failure.
        error: String,
    },
    /// Established connection was lost (closed, errored, or pong timeout).
    Disconnected {
        /// Reason for disconnection.
        reason: String,
    },
    /// Owner asked for teardown.
    DisconnectRequested,
    /// Reconnect timer fired.
    ReconnectTimer,
}

/// Actions to be executed by the channel task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelAction {
    /// Connect and subscribe to the session topic.
    Connect,
    /// Close the connection.
    Disconnect,
    /// Start a timer for reconnection.
    StartReconnectTimer {
        /// Delay before attempting reconnection.
        delay: Duration,
    },
    /// Cancel any pending reconnect timer.
    CancelReconnect,
    /// Report to the channel's owner.
    Emit(ChannelSignal),
}

/// Connectivity reports delivered to the transport selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelSignal {
    /// Subscribed; frames will follow.
    Connected,
    /// Established connection was lost.
    Disconnected {
        /// Reason for disconnection.
        reason: String,
    },
    /// A connect attempt failed (auth failures included).
    ConnectFailed {
        /// Error message describing the failure.
        error: String,
        /// Failed attempts so far.
        attempt: u32,
    },
    /// Reconnect attempts exhausted; no further connects will be made.
    GaveUp {
        /// Failed attempts in total.
        attempts: u32,
    },
}

/// Calculate reconnection backoff with jitter.
///
/// Formula: min(8s, 500ms * 2^(attempt - 1)) + random(0..250ms)
pub fn calculate_backoff(attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    let base_ms = BACKOFF_BASE_MS
        .saturating_mul(1u64 << exponent)
        .min(BACKOFF_CAP_MS);

    Duration::from_millis(base_ms + random_jitter_ms())
}

/// Generate random jitter between 0 and 250 milliseconds.
///
/// Falls back to no jitter if the OS source is unavailable.
fn random_jitter_ms() -> u64 {
    let mut bytes = [0u8; 8];
    if getrandom::getrandom(&mut bytes).is_err() {
        return 0;
    }
    u64::from_le_bytes(bytes) % (MAX_JITTER_MS + 1)
}
