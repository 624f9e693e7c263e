//! Collaborator seams of the duel engine.
//!
//! The engine consumes two external collaborators:
//!
//! - [`PushChannel`]: one push connection subscribed to the session topic.
//!   `connect()` covers subscribe and auth; `recv()` yields raw frames.
//! - [`DuelApi`]: the request/response endpoints (status, answer, reveal,
//!   next).
//!
//! Both are async traits so real implementations (WebSocket, HTTP) and the
//! in-memory mocks in this module plug in the same way.
//!
//! # Example
//!
//! ```ignore
//! let channel = MockChannel::new();
//! channel.connect(&SessionId::new("s1")).await?;
//! channel.push_frame(&ChannelFrame::Pong);
//! let bytes = channel.recv().await?;
//! ```

mod mock;

pub use mock::{ApiCall, MockApi, MockChannel};

use async_trait::async_trait;
use duel_types::{
    AnswerRequest, AnswerResponse, NextResponse, ProtocolError, RevealRequest, RevealResponse,
    SessionId, SessionSnapshot,
};
use thiserror::Error;

/// Push-channel errors.
///
/// None of these are fatal: the channel task turns them into a disconnect
/// and the selector falls back to polling.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Connection failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// The subscription was not authorized.
    #[error("subscription not authorized: {0}")]
    AuthRejected(String),

    /// Not connected.
    #[error("not connected")]
    NotConnected,

    /// Connection closed by the peer.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// Send failed.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Receive failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(String),

    /// Connection timeout.
    #[error("connection timeout")]
    Timeout,
}

/// Push channel subscribed to one session topic.
///
/// `recv()` must be cancel-safe: the channel task races it against the ping
/// timer.
#[async_trait]
pub trait PushChannel: Send + Sync + 'static {
    /// Connect, authorize and subscribe to the session topic.
    async fn connect(&self, session_id: &SessionId) -> Result<(), TransportError>;

    /// Receive the next frame.
    ///
    /// Blocks until a frame is available or the connection closes.
    async fn recv(&self) -> Result<Vec<u8>, TransportError>;

    /// Send a keepalive ping. The reply arrives as a `pong` frame.
    async fn ping(&self) -> Result<(), TransportError>;

    /// Check if currently connected.
    fn is_connected(&self) -> bool;

    /// Close the connection gracefully.
    async fn close(&self) -> Result<(), TransportError>;
}

/// Request/response errors.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The request did not reach the server or the response was lost.
    #[error("network error: {0}")]
    Network(String),

    /// The request timed out.
    #[error("request timed out")]
    Timeout,

    /// The server answered with an error status.
    #[error("server returned {status}: {message}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Server-provided message
        message: String,
    },

    /// The response body could not be understood.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl ApiError {
    /// Whether repeating the same request may succeed.
    ///
    /// Client errors other than 408 and 429 are not retryable; everything
    /// else is.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) | Self::Timeout => true,
            Self::Status { status, .. } => !(400..500).contains(status) || matches!(status, 408 | 429),
            Self::Protocol(_) => false,
        }
    }
}

/// The session's request/response endpoints.
#[async_trait]
pub trait DuelApi: Send + Sync + 'static {
    /// `GET status`: full session snapshot.
    async fn status(&self, session_id: &SessionId) -> Result<SessionSnapshot, ApiError>;

    /// `POST answer`: submit the final answer for a question.
    async fn answer(
        &self,
        session_id: &SessionId,
        request: AnswerRequest,
    ) -> Result<AnswerResponse, ApiError>;

    /// `POST reveal`: reveal a question. Idempotent server-side.
    async fn reveal(
        &self,
        session_id: &SessionId,
        request: RevealRequest,
    ) -> Result<RevealResponse, ApiError>;

    /// `POST next`: signal ready for the next question.
    async fn next(&self, session_id: &SessionId) -> Result<NextResponse, ApiError>;
}
