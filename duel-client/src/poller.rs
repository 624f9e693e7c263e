//! Status poller task.
//!
//! Runs periodically to fetch a full session snapshot while the push channel
//! is down. Every tick re-checks the channel: if it is open again the tick
//! is skipped, so the poller never delivers data concurrently with the
//! channel even before the selector gets to stop it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use duel_types::SessionId;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use crate::selector::SourceMsg;
use crate::transport::DuelApi;

/// Spawn a status poller task.
///
/// The first poll happens immediately. Returns a handle that can be used to
/// abort the task.
pub(crate) fn spawn_poller<A: DuelApi>(
    api: Arc<A>,
    session_id: SessionId,
    period: Duration,
    generation: u64,
    channel_open: Arc<AtomicBool>,
    tx: mpsc::UnboundedSender<SourceMsg>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!("Status poller started (interval: {:?})", period);

        let mut timer = interval(period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            timer.tick().await;

            if channel_open.load(Ordering::Acquire) {
                tracing::debug!("Poll skipped: channel is open");
                continue;
            }

            match api.status(&session_id).await {
                Ok(snapshot) => {
                    if tx.send(SourceMsg::Poll { generation, snapshot }).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!("Poll failed: {}", e);
                }
            }
        }

        tracing::debug!("Status poller exited");
    })
}
