//! WebSocket transport implementation using `tokio-tungstenite`.
//!
//! The application side listens with [`WebSocketListener`]; the controller
//! side dials with [`connect`]. Both produce the same split pair: a
//! shareable [`WebSocketSink`] and an exclusively owned [`WebSocketSource`].

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::error::{Error as WsError, ProtocolError};
use tokio_tungstenite::tungstenite::handshake::server::{
    ErrorResponse, Request, Response,
};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::{Frame, FrameSink, FrameSource, SessionId, TransportError};

/// Counter for generating unique session IDs.
static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

fn next_session_id() -> SessionId {
    SessionId::new(NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed))
}

fn split(ws: WsStream) -> (WebSocketSink, WebSocketSource) {
    let id = next_session_id();
    let (sink, stream) = ws.split();
    (
        WebSocketSink {
            id,
            sink: Arc::new(Mutex::new(sink)),
        },
        WebSocketSource { id, stream },
    )
}

fn io_error(
    kind: std::io::ErrorKind,
    e: WsError,
) -> std::io::Error {
    std::io::Error::new(kind, e)
}

/// Sends on a session that is already closing or closed report
/// [`TransportError::ConnectionClosed`]; anything else is a send failure.
fn send_error(e: WsError) -> TransportError {
    match e {
        WsError::ConnectionClosed
        | WsError::AlreadyClosed
        | WsError::Protocol(ProtocolError::SendAfterClosing) => {
            TransportError::ConnectionClosed(e.to_string())
        }
        e => TransportError::SendFailed(io_error(std::io::ErrorKind::BrokenPipe, e)),
    }
}

/// Listens for controller sessions on one request path.
pub struct WebSocketListener {
    listener: TcpListener,
    path: String,
}

impl WebSocketListener {
    /// Binds a listener to `addr`. Handshakes for any other request path
    /// than `path` are refused with HTTP 404.
    pub async fn bind(addr: &str, path: &str) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(TransportError::AcceptFailed)?;
        tracing::info!(addr, path, "WebSocket listener bound");
        Ok(Self {
            listener,
            path: path.to_string(),
        })
    }

    /// Returns the local address the listener is bound to.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// The request path sessions must use.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Waits for the next session and completes its handshake.
    pub async fn accept(
        &self,
    ) -> Result<(WebSocketSink, WebSocketSource), TransportError> {
        let (stream, addr) = self
            .listener
            .accept()
            .await
            .map_err(TransportError::AcceptFailed)?;

        let expected = self.path.clone();
        let check_path = move |req: &Request, resp: Response| {
            if req.uri().path() == expected {
                Ok(resp)
            } else {
                let mut refused =
                    ErrorResponse::new(Some(format!("unknown path {}", req.uri().path())));
                *refused.status_mut() = StatusCode::NOT_FOUND;
                Err(refused)
            }
        };

        let ws = tokio_tungstenite::accept_hdr_async(
            MaybeTlsStream::Plain(stream),
            check_path,
        )
        .await
        .map_err(|e| {
            TransportError::AcceptFailed(io_error(
                std::io::ErrorKind::ConnectionRefused,
                e,
            ))
        })?;

        let (sink, source) = split(ws);
        tracing::debug!(id = %sink.id, %addr, "accepted WebSocket session");
        Ok((sink, source))
    }
}

/// Dials `url` (e.g. `ws://127.0.0.1:5637/devlink`) and returns the session.
pub async fn connect(
    url: &str,
) -> Result<(WebSocketSink, WebSocketSource), TransportError> {
    let (ws, _) = tokio_tungstenite::connect_async(url).await.map_err(|e| {
        TransportError::ConnectFailed(io_error(
            std::io::ErrorKind::ConnectionRefused,
            e,
        ))
    })?;
    let (sink, source) = split(ws);
    tracing::debug!(id = %sink.id, url, "opened WebSocket session");
    Ok((sink, source))
}

/// Sending half of a WebSocket session. Clones share the same socket.
#[derive(Clone)]
pub struct WebSocketSink {
    id: SessionId,
    sink: Arc<Mutex<SplitSink<WsStream, Message>>>,
}

impl FrameSink for WebSocketSink {
    async fn send_text(&self, text: String) -> Result<(), TransportError> {
        self.sink
            .lock()
            .await
            .send(Message::text(text))
            .await
            .map_err(send_error)
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.sink.lock().await.close().await.map_err(send_error)
    }

    fn id(&self) -> SessionId {
        self.id
    }
}

/// Receiving half of a WebSocket session.
pub struct WebSocketSource {
    id: SessionId,
    stream: SplitStream<WsStream>,
}

impl WebSocketSource {
    /// Returns the identifier shared with the matching sink.
    pub fn id(&self) -> SessionId {
        self.id
    }
}

impl FrameSource for WebSocketSource {
    async fn next_frame(&mut self) -> Result<Option<Frame>, TransportError> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    return Ok(Some(Frame::Text(text.as_str().to_owned())));
                }
                Some(Ok(Message::Binary(data))) => {
                    return Ok(Some(Frame::Binary(data.to_vec())));
                }
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                Some(Ok(_)) => continue, // ping/pong/raw frame
                Some(Err(e)) => {
                    return Err(TransportError::ReceiveFailed(io_error(
                        std::io::ErrorKind::ConnectionReset,
                        e,
                    )));
                }
            }
        }
    }
}
