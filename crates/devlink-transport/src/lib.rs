//! Transport abstraction layer for devlink.
//!
//! The protocol above this crate only needs an ordered, reliable channel of
//! text frames. [`FrameSink`] is the sending half of one session and
//! [`FrameSource`] the receiving half; a source reports the end of the
//! session by returning `Ok(None)`.
//!
//! # Feature Flags
//!
//! - `websocket` (default): WebSocket listener and client via `tokio-tungstenite`

mod error;
#[cfg(feature = "websocket")]
mod websocket;

pub use error::TransportError;
#[cfg(feature = "websocket")]
pub use websocket::{WebSocketListener, WebSocketSink, WebSocketSource, connect};

use std::fmt;
use std::future::Future;

/// Opaque identifier for one transport session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

impl SessionId {
    /// Creates a new `SessionId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// One frame received from the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A text frame. The only kind that carries envelopes.
    Text(String),
    /// A binary frame. Reported to the caller so it can be rejected.
    Binary(Vec<u8>),
}

/// The sending half of a session.
///
/// Implementations must be cheap to share (`Arc` or an internal handle)
/// because fire-and-forget sends move a clone into a spawned task.
pub trait FrameSink: Send + Sync + 'static {
    /// Transmits one text frame and waits until the transport accepted it.
    fn send_text(
        &self,
        text: String,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Closes the session from this side.
    fn close(&self) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Returns the identifier of the session this sink belongs to.
    fn id(&self) -> SessionId;
}

/// The receiving half of a session.
pub trait FrameSource: Send + 'static {
    /// Waits for the next data frame.
    ///
    /// Returns `Ok(None)` when the session is cleanly closed. Control
    /// frames (ping/pong) are handled internally and never surfaced.
    fn next_frame(
        &mut self,
    ) -> impl Future<Output = Result<Option<Frame>, TransportError>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_new_and_into_inner() {
        let id = SessionId::new(42);
        assert_eq!(id.into_inner(), 42);
    }

    #[test]
    fn test_session_id_display() {
        assert_eq!(SessionId::new(7).to_string(), "session-7");
    }

    #[test]
    fn test_frames_compare_by_kind_and_content() {
        assert_eq!(Frame::Text("a".into()), Frame::Text("a".into()));
        assert_ne!(Frame::Text("a".into()), Frame::Binary(b"a".to_vec()));
    }
}
