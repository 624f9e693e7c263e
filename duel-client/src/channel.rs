//! Transport channel task.
//!
//! Drives one [`PushChannel`] through the pure [`ChannelState`] machine from
//! `quizduel-core`: it interprets the machine's actions (connect, reconnect
//! timers, teardown), pumps frames while connected, and keeps the
//! connection alive with ping/pong. Everything it learns is reported to the
//! transport selector as a [`SourceMsg`] tagged with the task's generation.
//!
//! Shutdown is an event like any other: [`ChannelTask::shutdown`] feeds
//! `DisconnectRequested` to the machine, which cancels a pending reconnect
//! and closes the connection.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use duel_core::{ChannelAction, ChannelEvent, ChannelSignal, ChannelState};
use duel_types::{ChannelFrame, SessionId};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, sleep_until, Instant, MissedTickBehavior};

use crate::selector::SourceMsg;
use crate::transport::PushChannel;

/// Channel task tunables.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ChannelSettings {
    pub max_attempts: u32,
    pub ping_interval: Duration,
    pub pong_timeout: Duration,
}

/// Handle to a running channel task.
#[derive(Debug)]
pub(crate) struct ChannelTask {
    handle: JoinHandle<()>,
    shutdown: oneshot::Sender<()>,
}

impl ChannelTask {
    /// Ask the task to tear its connection down and wait up to `grace` for
    /// it to finish. Returns false if it had to be aborted instead.
    pub async fn shutdown(self, grace: Duration) -> bool {
        let Self {
            mut handle,
            shutdown,
        } = self;
        // Err means the task already ended on its own.
        let _ = shutdown.send(());
        match tokio::time::timeout(grace, &mut handle).await {
            Ok(_) => true,
            Err(_) => {
                handle.abort();
                false
            }
        }
    }

    /// Abort without tearing the connection down.
    pub fn abort(&self) {
        self.handle.abort();
    }
}

/// Spawn the channel task.
///
/// `open` mirrors whether the channel is connected; it is set before the
/// `Connected` report is sent and cleared before any loss is reported.
pub(crate) fn spawn_channel_task<C: PushChannel>(
    channel: Arc<C>,
    session_id: SessionId,
    settings: ChannelSettings,
    generation: u64,
    open: Arc<AtomicBool>,
    tx: mpsc::UnboundedSender<SourceMsg>,
) -> ChannelTask {
    let (shutdown, mut shutdown_rx) = oneshot::channel();
    let handle = tokio::spawn(async move {
        tracing::debug!(generation, "channel task started");
        run(
            &*channel,
            &session_id,
            settings,
            generation,
            &open,
            &tx,
            &mut shutdown_rx,
        )
        .await;
        open.store(false, Ordering::Release);
        tracing::debug!(generation, "channel task exited");
    });
    ChannelTask { handle, shutdown }
}

/// Why [`pump`] stopped.
enum PumpExit {
    Lost(String),
    Shutdown,
    OwnerGone,
}

async fn run<C: PushChannel>(
    channel: &C,
    session_id: &SessionId,
    settings: ChannelSettings,
    generation: u64,
    open: &AtomicBool,
    tx: &mpsc::UnboundedSender<SourceMsg>,
    shutdown: &mut oneshot::Receiver<()>,
) {
    let mut state = ChannelState::new();
    let mut pending = VecDeque::from([ChannelEvent::ConnectRequested]);

    while let Some(event) = pending.pop_front() {
        let (next, actions) = state.on_event(event, settings.max_attempts);
        state = next;

        for action in actions {
            match action {
                ChannelAction::Connect => {
                    let next = match until_shutdown(channel.connect(session_id), shutdown).await {
                        Some(Ok(())) => ChannelEvent::ConnectSucceeded,
                        Some(Err(e)) => ChannelEvent::ConnectFailed {
                            error: e.to_string(),
                        },
                        None => ChannelEvent::DisconnectRequested,
                    };
                    pending.push_back(next);
                }
                ChannelAction::Disconnect => {
                    open.store(false, Ordering::Release);
                    if let Err(e) = channel.close().await {
                        tracing::debug!("channel close failed: {}", e);
                    }
                }
                ChannelAction::StartReconnectTimer { delay } => {
                    tracing::debug!("reconnecting in {:?}", delay);
                    let next = match until_shutdown(sleep(delay), shutdown).await {
                        Some(()) => ChannelEvent::ReconnectTimer,
                        None => ChannelEvent::DisconnectRequested,
                    };
                    pending.push_back(next);
                }
                ChannelAction::CancelReconnect => tracing::debug!("reconnect cancelled"),
                ChannelAction::Emit(signal) => {
                    open.store(
                        matches!(signal, ChannelSignal::Connected),
                        Ordering::Release,
                    );
                    if tx.send(SourceMsg::Signal { generation, signal }).is_err() {
                        return;
                    }
                }
            }
        }

        if state.is_connected() && pending.is_empty() {
            match pump(channel, settings, generation, tx, shutdown).await {
                PumpExit::Lost(reason) => {
                    open.store(false, Ordering::Release);
                    let _ = channel.close().await;
                    pending.push_back(ChannelEvent::Disconnected { reason });
                }
                PumpExit::Shutdown => pending.push_back(ChannelEvent::DisconnectRequested),
                PumpExit::OwnerGone => return,
            }
        }
    }
}

/// Run `fut` unless shutdown is requested first.
///
/// Resolves the shutdown receiver at most once per task: the machine leaves
/// no awaiting action after `DisconnectRequested`.
async fn until_shutdown<F: Future>(
    fut: F,
    shutdown: &mut oneshot::Receiver<()>,
) -> Option<F::Output> {
    tokio::select! {
        output = fut => Some(output),
        _ = shutdown => None,
    }
}

/// Receive frames until the connection is lost or shutdown is requested.
async fn pump<C: PushChannel>(
    channel: &C,
    settings: ChannelSettings,
    generation: u64,
    tx: &mpsc::UnboundedSender<SourceMsg>,
    shutdown: &mut oneshot::Receiver<()>,
) -> PumpExit {
    let mut ping = interval_at(
        Instant::now() + settings.ping_interval,
        settings.ping_interval,
    );
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut pong_deadline: Option<Instant> = None;

    loop {
        tokio::select! {
            received = channel.recv() => match received {
                Ok(bytes) => {
                    // Any frame proves the connection is alive.
                    pong_deadline = None;
                    match ChannelFrame::from_bytes(&bytes) {
                        Ok(ChannelFrame::Pong) => tracing::trace!("pong"),
                        Ok(frame) => {
                            if tx.send(SourceMsg::Frame { generation, frame }).is_err() {
                                return PumpExit::OwnerGone;
                            }
                        }
                        Err(e) => tracing::warn!("dropping undecodable frame: {}", e),
                    }
                }
                Err(e) => return PumpExit::Lost(e.to_string()),
            },
            _ = ping.tick() => {
                if let Err(e) = channel.ping().await {
                    return PumpExit::Lost(format!("ping failed: {}", e));
                }
                if pong_deadline.is_none() {
                    pong_deadline = Some(Instant::now() + settings.pong_timeout);
                }
            }
            _ = wait_until(pong_deadline) => return PumpExit::Lost("pong timeout".into()),
            _ = &mut *shutdown => return PumpExit::Shutdown,
            _ = tx.closed() => return PumpExit::OwnerGone,
        }
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
