//! Mock collaborators for testing.
//!
//! [`MockChannel`] delivers frames pushed by the test and can drop the
//! connection or refuse to connect on demand. [`MockApi`] serves a settable
//! snapshot, returns queued responses and records every call.

use super::{ApiError, DuelApi, PushChannel, TransportError};
use async_trait::async_trait;
use duel_types::{
    AnswerRequest, AnswerResponse, ChannelFrame, NextResponse, RevealRequest, RevealResponse,
    SessionId, SessionSnapshot,
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Debug)]
enum Delivery {
    Frame(Vec<u8>),
    Drop(String),
}

/// Mock push channel for testing.
///
/// Deliveries are stamped with the connection they were pushed on, so a
/// frame or drop queued before a reconnect is never seen by the new
/// connection.
#[derive(Debug, Clone)]
pub struct MockChannel {
    inner: Arc<Mutex<MockChannelInner>>,
    tx: mpsc::UnboundedSender<(u64, Delivery)>,
    rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<(u64, Delivery)>>>,
}

#[derive(Debug, Default)]
struct MockChannelInner {
    connected: bool,
    epoch: u64,
    session_id: Option<SessionId>,
    connect_count: u32,
    close_count: u32,
    ping_count: u32,
    mute_pongs: bool,
    fail_next_connect: VecDeque<TransportError>,
    refuse_connections: Option<String>,
}

impl MockChannel {
    /// Create a new mock channel.
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Mutex::new(MockChannelInner::default())),
            tx,
            rx: Arc::new(tokio::sync::Mutex::new(rx)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockChannelInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Deliver a frame on the current connection.
    ///
    /// Returns false (and discards the frame) when not connected.
    pub fn push_frame(&self, frame: &ChannelFrame) -> bool {
        match frame.to_bytes() {
            Ok(bytes) => self.push_raw(bytes),
            Err(_) => false,
        }
    }

    /// Deliver raw bytes on the current connection.
    pub fn push_raw(&self, bytes: Vec<u8>) -> bool {
        let inner = self.lock();
        if !inner.connected {
            return false;
        }
        self.tx.send((inner.epoch, Delivery::Frame(bytes))).is_ok()
    }

    /// Drop the current connection as if the network failed.
    pub fn drop_connection(&self, reason: &str) {
        let mut inner = self.lock();
        if inner.connected {
            let _ = self.tx.send((inner.epoch, Delivery::Drop(reason.to_string())));
            inner.connected = false;
        }
    }

    /// Cause the next connect() to fail with the given error.
    pub fn fail_next_connect(&self, error: TransportError) {
        self.lock().fail_next_connect.push_back(error);
    }

    /// Refuse every connect() until [`MockChannel::accept_connections`].
    pub fn refuse_connections(&self, reason: &str) {
        self.lock().refuse_connections = Some(reason.to_string());
    }

    /// Stop refusing connections.
    pub fn accept_connections(&self) {
        self.lock().refuse_connections = None;
    }

    /// Stop answering pings with pongs.
    pub fn mute_pongs(&self, mute: bool) {
        self.lock().mute_pongs = mute;
    }

    /// Number of connect() calls so far, failed ones included.
    pub fn connect_count(&self) -> u32 {
        self.lock().connect_count
    }

    /// Number of close() calls so far.
    pub fn close_count(&self) -> u32 {
        self.lock().close_count
    }

    /// Number of ping() calls so far.
    pub fn ping_count(&self) -> u32 {
        self.lock().ping_count
    }

    /// Session of the last successful connect().
    pub fn subscribed_session(&self) -> Option<SessionId> {
        self.lock().session_id.clone()
    }
}

impl Default for MockChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PushChannel for MockChannel {
    async fn connect(&self, session_id: &SessionId) -> Result<(), TransportError> {
        let mut inner = self.lock();
        inner.connect_count += 1;

        // Check for forced failure
        if let Some(error) = inner.fail_next_connect.pop_front() {
            return Err(error);
        }
        if let Some(reason) = &inner.refuse_connections {
            return Err(TransportError::ConnectionFailed(reason.clone()));
        }

        inner.connected = true;
        inner.epoch += 1;
        inner.session_id = Some(session_id.clone());
        Ok(())
    }

    async fn recv(&self) -> Result<Vec<u8>, TransportError> {
        let mut rx = self.rx.lock().await;
        loop {
            let epoch = {
                let inner = self.lock();
                if !inner.connected {
                    return Err(TransportError::NotConnected);
                }
                inner.epoch
            };

            match rx.recv().await {
                Some((stamp, _)) if stamp != epoch => continue,
                Some((_, Delivery::Frame(bytes))) => return Ok(bytes),
                Some((_, Delivery::Drop(reason))) => {
                    return Err(TransportError::ConnectionClosed(reason))
                }
                None => return Err(TransportError::ConnectionClosed("mock closed".into())),
            }
        }
    }

    async fn ping(&self) -> Result<(), TransportError> {
        let mut inner = self.lock();
        if !inner.connected {
            return Err(TransportError::NotConnected);
        }
        inner.ping_count += 1;
        if !inner.mute_pongs {
            if let Ok(pong) = ChannelFrame::Pong.to_bytes() {
                let _ = self.tx.send((inner.epoch, Delivery::Frame(pong)));
            }
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.lock().connected
    }

    async fn close(&self) -> Result<(), TransportError> {
        let mut inner = self.lock();
        inner.connected = false;
        inner.close_count += 1;
        inner.epoch += 1;
        Ok(())
    }
}

/// A call recorded by [`MockApi`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiCall {
    /// `GET status`
    Status,
    /// `POST answer`
    Answer(AnswerRequest),
    /// `POST reveal`
    Reveal(RevealRequest),
    /// `POST next`
    Next,
}

/// Mock request/response API for testing.
#[derive(Debug, Clone, Default)]
pub struct MockApi {
    inner: Arc<Mutex<MockApiInner>>,
}

#[derive(Debug, Default)]
struct MockApiInner {
    snapshot: Option<SessionSnapshot>,
    fail_next_status: Option<ApiError>,
    answers: VecDeque<Result<AnswerResponse, ApiError>>,
    reveals: VecDeque<Result<RevealResponse, ApiError>>,
    nexts: VecDeque<Result<NextResponse, ApiError>>,
    calls: Vec<ApiCall>,
    latency: Duration,
}

impl MockApi {
    /// Create a new mock API with no snapshot and no queued responses.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockApiInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Set the snapshot returned by every `status` call.
    pub fn set_snapshot(&self, snapshot: SessionSnapshot) {
        self.lock().snapshot = Some(snapshot);
    }

    /// Cause the next `status` call to fail.
    pub fn fail_next_status(&self, error: ApiError) {
        self.lock().fail_next_status = Some(error);
    }

    /// Queue the result of the next `answer` call.
    pub fn queue_answer(&self, result: Result<AnswerResponse, ApiError>) {
        self.lock().answers.push_back(result);
    }

    /// Queue the result of the next `reveal` call.
    pub fn queue_reveal(&self, result: Result<RevealResponse, ApiError>) {
        self.lock().reveals.push_back(result);
    }

    /// Queue the result of the next `next` call.
    pub fn queue_next(&self, result: Result<NextResponse, ApiError>) {
        self.lock().nexts.push_back(result);
    }

    /// Delay every response by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.lock().latency = latency;
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<ApiCall> {
        self.lock().calls.clone()
    }

    /// Number of `status` calls.
    pub fn status_calls(&self) -> usize {
        self.count(|c| matches!(c, ApiCall::Status))
    }

    /// Number of `answer` calls.
    pub fn answer_calls(&self) -> usize {
        self.count(|c| matches!(c, ApiCall::Answer(_)))
    }

    /// Number of `reveal` calls.
    pub fn reveal_calls(&self) -> usize {
        self.count(|c| matches!(c, ApiCall::Reveal(_)))
    }

    /// Number of `next` calls.
    pub fn next_calls(&self) -> usize {
        self.count(|c| matches!(c, ApiCall::Next))
    }

    fn count(&self, pred: impl Fn(&ApiCall) -> bool) -> usize {
        self.lock().calls.iter().filter(|c| pred(c)).count()
    }

    /// Record `call` and return the configured latency.
    fn record(&self, call: ApiCall) -> Duration {
        let mut inner = self.lock();
        inner.calls.push(call);
        inner.latency
    }
}

fn unqueued() -> ApiError {
    ApiError::Network("no response queued".into())
}

#[async_trait]
impl DuelApi for MockApi {
    async fn status(&self, _session_id: &SessionId) -> Result<SessionSnapshot, ApiError> {
        let latency = self.record(ApiCall::Status);
        tokio::time::sleep(latency).await;

        let mut inner = self.lock();
        if let Some(error) = inner.fail_next_status.take() {
            return Err(error);
        }
        inner
            .snapshot
            .clone()
            .ok_or_else(|| ApiError::Network("no snapshot set".into()))
    }

    async fn answer(
        &self,
        _session_id: &SessionId,
        request: AnswerRequest,
    ) -> Result<AnswerResponse, ApiError> {
        let latency = self.record(ApiCall::Answer(request));
        tokio::time::sleep(latency).await;
        self.lock().answers.pop_front().unwrap_or_else(|| Err(unqueued()))
    }

    async fn reveal(
        &self,
        _session_id: &SessionId,
        request: RevealRequest,
    ) -> Result<RevealResponse, ApiError> {
        let latency = self.record(ApiCall::Reveal(request));
        tokio::time::sleep(latency).await;
        self.lock().reveals.pop_front().unwrap_or_else(|| Err(unqueued()))
    }

    async fn next(&self, _session_id: &SessionId) -> Result<NextResponse, ApiError> {
        let latency = self.record(ApiCall::Next);
        tokio::time::sleep(latency).await;
        self.lock().nexts.pop_front().unwrap_or_else(|| Err(unqueued()))
    }
}
