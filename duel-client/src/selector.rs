//! Transport selector.
//!
//! Owns exactly one active source at a time: the push channel, or the
//! status poller while the channel is down. Handoffs:
//!
//! - On start the channel connects; it owns the slot while it does.
//! - When the channel reports a loss (or a failed connect, auth included),
//!   a grace timer starts. If the channel is still down when it fires, the
//!   poller starts.
//! - When the channel connects, the poller is stopped before any further
//!   message is processed, and one catch-up snapshot is fetched on the
//!   channel's behalf.
//! - When the channel gives up, the poller stays for the rest of the session.
//!
//! Every message a source task sends carries that task's generation number.
//! Stopping a source retires its generation, so anything it queued before
//! being stopped is discarded instead of delivered.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use duel_core::{ChannelSignal, Incoming};
use duel_types::{ChannelFrame, SessionId, SessionSnapshot};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};

use crate::channel::{spawn_channel_task, ChannelSettings, ChannelTask};
use crate::config::DuelConfig;
use crate::poller::spawn_poller;
use crate::transport::{DuelApi, PushChannel};

/// How long the channel task gets to close its connection on stop.
const CHANNEL_SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

/// Which source currently feeds the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActiveSource {
    /// Not started, or stopped
    None,
    /// Push channel (connected or connecting)
    Channel,
    /// Status poller
    Poller,
}

/// Message from a source task to the selector.
#[derive(Debug)]
pub(crate) enum SourceMsg {
    /// Channel connectivity report
    Signal {
        generation: u64,
        signal: ChannelSignal,
    },
    /// Decoded channel frame
    Frame {
        generation: u64,
        frame: ChannelFrame,
    },
    /// Snapshot from the poller
    Poll {
        generation: u64,
        snapshot: SessionSnapshot,
    },
    /// Catch-up snapshot fetched when the channel connected
    Resync {
        generation: u64,
        snapshot: SessionSnapshot,
    },
}

/// What the selector hands to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Feed {
    /// Server data for the reconciler.
    Data(Incoming),
    /// The active source changed.
    SourceChanged(ActiveSource),
    /// The channel lost its connection or failed to connect.
    ChannelError {
        /// Reason reported by the channel
        reason: String,
    },
}

/// Selector tunables.
#[derive(Debug, Clone, Copy)]
pub struct SelectorSettings {
    /// Status poller period
    pub poll_interval: Duration,
    /// Channel-down grace before polling
    pub fallback_grace: Duration,
    /// Reconnect cap
    pub max_reconnect_attempts: u32,
    /// Keepalive ping period
    pub ping_interval: Duration,
    /// Pong timeout
    pub pong_timeout: Duration,
}

impl From<&DuelConfig> for SelectorSettings {
    fn from(config: &DuelConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            fallback_grace: config.fallback_grace(),
            max_reconnect_attempts: config.max_reconnect_attempts,
            ping_interval: config.ping_interval(),
            pong_timeout: config.pong_timeout(),
        }
    }
}

/// Arbitrates between the push channel and the status poller.
pub struct TransportSelector<C: PushChannel, A: DuelApi> {
    channel: Arc<C>,
    api: Arc<A>,
    settings: SelectorSettings,
    session_id: Option<SessionId>,
    active: ActiveSource,
    channel_open: Arc<AtomicBool>,
    channel_task: Option<ChannelTask>,
    poller_task: Option<JoinHandle<()>>,
    resync_task: Option<JoinHandle<()>>,
    next_generation: u64,
    channel_generation: u64,
    poller_generation: u64,
    fallback_at: Option<Instant>,
    gave_up: bool,
    stopped: bool,
    tx: mpsc::UnboundedSender<SourceMsg>,
    rx: mpsc::UnboundedReceiver<SourceMsg>,
}

impl<C: PushChannel, A: DuelApi> TransportSelector<C, A> {
    /// Create an idle selector.
    pub fn new(channel: Arc<C>, api: Arc<A>, settings: SelectorSettings) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            channel,
            api,
            settings,
            session_id: None,
            active: ActiveSource::None,
            channel_open: Arc::new(AtomicBool::new(false)),
            channel_task: None,
            poller_task: None,
            resync_task: None,
            next_generation: 0,
            channel_generation: 0,
            poller_generation: 0,
            fallback_at: None,
            gave_up: false,
            stopped: false,
            tx,
            rx,
        }
    }

    /// The source currently feeding the engine.
    pub fn active(&self) -> ActiveSource {
        self.active
    }

    /// Whether the push channel is connected right now.
    pub fn is_channel_open(&self) -> bool {
        self.channel_open.load(Ordering::Acquire)
    }

    /// Whether the channel exhausted its reconnect attempts.
    pub fn has_given_up(&self) -> bool {
        self.gave_up
    }

    /// Start feeding `session_id`, channel first.
    ///
    /// Starting twice, or after [`TransportSelector::stop`], does nothing.
    pub fn start(&mut self, session_id: SessionId) {
        if self.stopped || self.session_id.is_some() {
            tracing::debug!("selector already started");
            return;
        }

        tracing::info!(session = %session_id, "transport selector starting");
        self.channel_generation = self.bump();
        self.channel_task = Some(spawn_channel_task(
            Arc::clone(&self.channel),
            session_id.clone(),
            ChannelSettings {
                max_attempts: self.settings.max_reconnect_attempts,
                ping_interval: self.settings.ping_interval,
                pong_timeout: self.settings.pong_timeout,
            },
            self.channel_generation,
            Arc::clone(&self.channel_open),
            self.tx.clone(),
        ));
        self.session_id = Some(session_id);
        self.active = ActiveSource::Channel;
    }

    /// Wait for the next thing worth telling the engine.
    ///
    /// Returns `None` once stopped. Cancel-safe.
    pub async fn next(&mut self) -> Option<Feed> {
        loop {
            if self.stopped {
                return None;
            }

            let deadline = self.fallback_at;
            tokio::select! {
                msg = self.rx.recv() => {
                    let msg = msg?;
                    if let Some(feed) = self.handle(msg) {
                        return Some(feed);
                    }
                }
                _ = wait_until(deadline) => {
                    self.fallback_at = None;
                    if let Some(feed) = self.on_grace_elapsed() {
                        return Some(feed);
                    }
                }
            }
        }
    }

    /// Tear down every source. Idempotent, and safe before `start`.
    pub async fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;

        self.stop_poller();
        if let Some(task) = self.resync_task.take() {
            task.abort();
        }
        if let Some(task) = self.channel_task.take() {
            // Retire the generation so nothing it queued is delivered.
            self.channel_generation = self.bump();
            if !task.shutdown(CHANNEL_SHUTDOWN_GRACE).await {
                tracing::debug!("channel task did not stop in time, closing directly");
                if let Err(e) = self.channel.close().await {
                    tracing::debug!("channel close failed: {}", e);
                }
            }
        }
        self.channel_open.store(false, Ordering::Release);
        self.fallback_at = None;
        self.active = ActiveSource::None;
        tracing::info!("transport selector stopped");
    }

    fn handle(&mut self, msg: SourceMsg) -> Option<Feed> {
        match msg {
            SourceMsg::Signal { generation, signal } if generation == self.channel_generation => {
                self.on_channel_signal(signal)
            }
            SourceMsg::Frame { generation, frame }
                if generation == self.channel_generation
                    && self.active == ActiveSource::Channel =>
            {
                frame_to_incoming(frame).map(Feed::Data)
            }
            SourceMsg::Resync {
                generation,
                snapshot,
            } if generation == self.channel_generation
                && self.active == ActiveSource::Channel =>
            {
                Some(Feed::Data(Incoming::Snapshot(snapshot)))
            }
            SourceMsg::Poll {
                generation,
                snapshot,
            } if generation == self.poller_generation
                && self.active == ActiveSource::Poller
                && !self.is_channel_open() =>
            {
                Some(Feed::Data(Incoming::Snapshot(snapshot)))
            }
            other => {
                tracing::debug!("dropping message from inactive source: {:?}", other);
                None
            }
        }
    }

    fn on_channel_signal(&mut self, signal: ChannelSignal) -> Option<Feed> {
        match signal {
            ChannelSignal::Connected => {
                // Poller first: nothing it queued may land after this point.
                self.stop_poller();
                self.fallback_at = None;
                self.spawn_resync();
                if self.active != ActiveSource::Channel {
                    tracing::info!("push channel connected, polling stopped");
                    self.active = ActiveSource::Channel;
                    return Some(Feed::SourceChanged(ActiveSource::Channel));
                }
                tracing::info!("push channel connected");
                None
            }
            ChannelSignal::Disconnected { reason } => {
                tracing::warn!("push channel lost: {}", reason);
                self.arm_fallback();
                Some(Feed::ChannelError { reason })
            }
            ChannelSignal::ConnectFailed { error, attempt } => {
                tracing::warn!("push channel connect failed (attempt {}): {}", attempt, error);
                self.arm_fallback();
                Some(Feed::ChannelError { reason: error })
            }
            ChannelSignal::GaveUp { attempts } => {
                tracing::warn!(
                    "push channel gave up after {} attempts, polling for the rest of the session",
                    attempts
                );
                self.gave_up = true;
                self.channel_task = None;
                self.fallback_at = None;
                self.start_poller()
            }
        }
    }

    fn arm_fallback(&mut self) {
        if self.poller_task.is_none() && self.fallback_at.is_none() {
            self.fallback_at = Some(Instant::now() + self.settings.fallback_grace);
        }
    }

    fn on_grace_elapsed(&mut self) -> Option<Feed> {
        if self.is_channel_open() {
            tracing::debug!("channel back within grace, not polling");
            return None;
        }
        self.start_poller()
    }

    fn start_poller(&mut self) -> Option<Feed> {
        if self.stopped || self.poller_task.is_some() {
            return None;
        }
        let session_id = self.session_id.clone()?;

        self.poller_generation = self.bump();
        self.poller_task = Some(spawn_poller(
            Arc::clone(&self.api),
            session_id,
            self.settings.poll_interval,
            self.poller_generation,
            Arc::clone(&self.channel_open),
            self.tx.clone(),
        ));
        tracing::info!("falling back to status polling");
        self.active = ActiveSource::Poller;
        Some(Feed::SourceChanged(ActiveSource::Poller))
    }

    fn stop_poller(&mut self) {
        if let Some(task) = self.poller_task.take() {
            task.abort();
            self.poller_generation = self.bump();
        }
    }

    fn spawn_resync(&mut self) {
        let Some(session_id) = self.session_id.clone() else {
            return;
        };
        if let Some(task) = self.resync_task.take() {
            task.abort();
        }

        let api = Arc::clone(&self.api);
        let tx = self.tx.clone();
        let generation = self.channel_generation;
        self.resync_task = Some(tokio::spawn(async move {
            match api.status(&session_id).await {
                Ok(snapshot) => {
                    let _ = tx.send(SourceMsg::Resync {
                        generation,
                        snapshot,
                    });
                }
                Err(e) => tracing::warn!("catch-up snapshot failed: {}", e),
            }
        }));
    }

    fn bump(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }
}

impl<C: PushChannel, A: DuelApi> Drop for TransportSelector<C, A> {
    fn drop(&mut self) {
        if let Some(task) = self.channel_task.take() {
            task.abort();
        }
        for task in [self.poller_task.take(), self.resync_task.take()]
            .into_iter()
            .flatten()
        {
            task.abort();
        }
    }
}

fn frame_to_incoming(frame: ChannelFrame) -> Option<Incoming> {
    match frame {
        ChannelFrame::SessionUpdated(snapshot) => Some(Incoming::Snapshot(snapshot)),
        ChannelFrame::QuestionRevealed(event) => Some(Incoming::Revealed(event)),
        ChannelFrame::ParticipantReady(event) => Some(Incoming::ParticipantReady(event)),
        ChannelFrame::Pong => None,
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
