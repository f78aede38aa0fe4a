//! Binds the envelope codec to one transport session at a time.
//!
//! A [`Connection`] is shared (`Arc`) between the receive task, which feeds
//! it frames and open/close notifications, and the processing loop, whose
//! handlers send replies through it. It owns the state machine
//! `Disconnected → Connecting → Open → Disconnected`.
//!
//! # Observing state
//!
//! State is published two ways:
//!
//! - [`Connection::transitions`] hands out an unbounded channel that
//!   receives every real transition exactly once, in order. This is what a
//!   [`Dispatcher`](devlink_dispatch::Dispatcher) follows, so a close and
//!   reopen between two ticks still runs the `Disconnected` hooks.
//! - [`Connection::subscribe`] hands out a `watch` receiver holding only
//!   the latest state. It suits tasks that wait for "no longer open" and
//!   must not queue up history.
//!
//! Replacing the current session with a newer one goes through
//! `Disconnected` before `Connecting`, so both kinds of observer see the
//! old session end.
//!
//! Outbound messages are dropped, not buffered, while the session is not
//! open. Inbound frames that fail to decode are logged and dropped; they
//! never close the session.

use std::sync::{Arc, Mutex, PoisonError, RwLock};

use devlink_dispatch::{ConnectionState, InboundQueue};
use devlink_protocol::{EnvelopeCodec, Goodbye, Message, RegistryError};
use devlink_transport::{Frame, FrameSink, FrameSource, SessionId};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, trace, warn};

/// How [`Connection::send`] hands a frame to the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SendMode {
    /// Wait until the transport accepted the frame.
    #[default]
    Sync,
    /// Spawn the transmission and return immediately. There is no delivery
    /// signal and no cancellation.
    Async,
}

/// Observes every decoded inbound message.
///
/// Returns `true` to claim the message. Every accepter sees every message
/// regardless of what earlier accepters returned.
pub trait Accepter: Send + Sync + 'static {
    fn accept(&self, message: &Message) -> bool;
}

impl<F> Accepter for F
where
    F: Fn(&Message) -> bool + Send + Sync + 'static,
{
    fn accept(&self, message: &Message) -> bool {
        self(message)
    }
}

/// One logical link to the peer, reused across transport sessions.
pub struct Connection<S: FrameSink> {
    codec: EnvelopeCodec,
    inbound: InboundQueue,
    sink: RwLock<Option<Arc<S>>>,
    state: watch::Sender<ConnectionState>,
    /// Transition listeners; the lock also serializes transitions so every
    /// listener sees them in the same order.
    listeners: Mutex<Vec<mpsc::UnboundedSender<ConnectionState>>>,
    accepters: RwLock<Vec<Arc<dyn Accepter>>>,
}

impl<S: FrameSink> Connection<S> {
    pub fn new(codec: EnvelopeCodec, inbound: InboundQueue) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            codec,
            inbound,
            sink: RwLock::new(None),
            state,
            listeners: Mutex::new(Vec::new()),
            accepters: RwLock::new(Vec::new()),
        }
    }

    /// A connection over the built-in variant registry.
    pub fn builtin(inbound: InboundQueue) -> Result<Self, RegistryError> {
        Ok(Self::new(EnvelopeCodec::builtin()?, inbound))
    }

    pub fn codec(&self) -> EnvelopeCodec {
        self.codec
    }

    /// The queue decoded messages are pushed into.
    pub fn inbound(&self) -> &InboundQueue {
        &self.inbound
    }

    // -- state ------------------------------------------------------------

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_open(&self) -> bool {
        self.state().is_open()
    }

    /// A receiver of the latest state. Intermediate states may be skipped
    /// when several transitions happen before it is read; use
    /// [`transitions`](Self::transitions) when every one matters.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// A channel that receives every state transition from now on, each
    /// exactly once and in order.
    pub fn transitions(&self) -> mpsc::UnboundedReceiver<ConnectionState> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    /// Id of the attached session, if any.
    pub fn session(&self) -> Option<SessionId> {
        self.current_sink().map(|sink| sink.id())
    }

    fn transition(&self, to: ConnectionState) -> bool {
        let mut listeners = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let mut from = to;
        let changed = self.state.send_if_modified(|current| {
            if *current == to {
                false
            } else {
                from = *current;
                *current = to;
                true
            }
        });
        if changed {
            info!(%from, %to, "connection state changed");
            listeners.retain(|tx| tx.send(to).is_ok());
        }
        changed
    }

    /// Makes `sink` the current session. Returns the session it replaced,
    /// which the caller should close.
    ///
    /// Replacing a session reports it `Disconnected` before the new one
    /// moves to `Connecting`.
    pub fn attach(&self, sink: S) -> Option<Arc<S>> {
        let id = sink.id();
        let previous = self
            .sink
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(Arc::new(sink));
        if let Some(old) = &previous {
            info!(old = %old.id(), new = %id, "newer session replaces the current one");
            self.transition(ConnectionState::Disconnected);
        } else {
            debug!(%id, "session attached");
        }
        self.transition(ConnectionState::Connecting);
        previous
    }

    /// The transport reports the attached session open.
    ///
    /// Returns whether the state changed. Without an attached session this
    /// is a no-op.
    pub fn on_open(&self) -> bool {
        if self.current_sink().is_none() {
            warn!("open reported without an attached session, ignoring");
            return false;
        }
        self.transition(ConnectionState::Open)
    }

    /// The current session ended. Drops the sink; returns whether the state
    /// changed.
    pub fn on_close(&self) -> bool {
        let dropped = self
            .sink
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(sink) = dropped {
            debug!(id = %sink.id(), "session detached");
        }
        self.transition(ConnectionState::Disconnected)
    }

    /// Like [`on_close`](Self::on_close), but only if `id` is still the
    /// current session. A session that was already replaced closes quietly.
    pub fn on_session_closed(&self, id: SessionId) -> bool {
        match self.current_sink() {
            Some(sink) if sink.id() == id => self.on_close(),
            _ => {
                debug!(%id, "replaced session closed");
                false
            }
        }
    }

    fn current_sink(&self) -> Option<Arc<S>> {
        self.sink
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn open_sink(&self) -> Option<Arc<S>> {
        if self.is_open() {
            self.current_sink()
        } else {
            None
        }
    }

    // -- outbound ---------------------------------------------------------

    /// Encodes and transmits `message`.
    ///
    /// Returns `false` if the session is not open, the message cannot be
    /// encoded, or (in [`SendMode::Sync`]) the transport rejects the frame.
    pub async fn send(&self, message: &Message, mode: SendMode) -> bool {
        let Some((sink, frame)) = self.prepare(message) else {
            return false;
        };
        match mode {
            SendMode::Sync => match sink.send_text(frame).await {
                Ok(()) => true,
                Err(e) => {
                    warn!(tag = message.type_tag(), error = %e, "send failed");
                    false
                }
            },
            SendMode::Async => {
                spawn_send(sink, frame, message.type_tag());
                true
            }
        }
    }

    /// Fire-and-forget send usable from synchronous code such as handlers.
    ///
    /// Must be called from within a Tokio runtime; outside one the message
    /// is dropped and `false` is returned.
    pub fn post(&self, message: &Message) -> bool {
        if tokio::runtime::Handle::try_current().is_err() {
            error!(tag = message.type_tag(), "post called outside a runtime, dropping");
            return false;
        }
        let Some((sink, frame)) = self.prepare(message) else {
            return false;
        };
        spawn_send(sink, frame, message.type_tag());
        true
    }

    fn prepare(&self, message: &Message) -> Option<(Arc<S>, String)> {
        let tag = message.type_tag();
        let Some(sink) = self.open_sink() else {
            debug!(tag, state = %self.state(), "not open, dropping outbound message");
            return None;
        };
        match self.codec.encode(message) {
            Ok(frame) => {
                trace!(tag, id = %sink.id(), len = frame.len(), "sending");
                Some((sink, frame))
            }
            Err(e) => {
                error!(tag, error = %e, "failed to encode outbound message");
                None
            }
        }
    }

    /// Sends [`Goodbye`], closes the current session, and moves to
    /// `Disconnected`.
    pub async fn close(&self) {
        self.send(&Goodbye.into(), SendMode::Sync).await;
        if let Some(sink) = self.current_sink() {
            if let Err(e) = sink.close().await {
                debug!(id = %sink.id(), error = %e, "close handshake failed");
            }
        }
        self.on_close();
    }

    // -- inbound ----------------------------------------------------------

    /// Decodes one text frame, offers it to the accepters, and queues it
    /// for the processing loop. Returns whether it decoded.
    pub fn on_receive(&self, frame: &str) -> bool {
        match self.codec.decode(frame) {
            Ok(message) => {
                let tag = message.type_tag();
                let claimed = self.accept(&message);
                trace!(tag, claimed, "received message");
                self.inbound.enqueue(message);
                true
            }
            Err(e) => {
                warn!(error = %e, len = frame.len(), "dropping undecodable frame");
                false
            }
        }
    }

    /// Binary frames carry no envelope; they are reported and dropped.
    pub fn on_binary(&self, data: &[u8]) {
        error!(len = data.len(), "binary frames are not supported, dropping");
    }

    /// Feeds every frame from `source` into this connection until the
    /// session ends, then reports it closed.
    pub async fn receive_from<R: FrameSource>(&self, id: SessionId, mut source: R) {
        loop {
            match source.next_frame().await {
                Ok(Some(Frame::Text(text))) => {
                    self.on_receive(&text);
                }
                Ok(Some(Frame::Binary(data))) => self.on_binary(&data),
                Ok(None) => {
                    debug!(%id, "session ended by peer");
                    break;
                }
                Err(e) => {
                    warn!(%id, error = %e, "receive failed, ending session");
                    break;
                }
            }
        }
        self.on_session_closed(id);
    }

    // -- accepters --------------------------------------------------------

    /// Registers an accepter. Adding the same one twice has no effect.
    pub fn add_accepter(&self, accepter: Arc<dyn Accepter>) {
        let mut accepters = self
            .accepters
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if !accepters.iter().any(|a| same_accepter(a, &accepter)) {
            accepters.push(accepter);
        }
    }

    /// Returns whether `accepter` was registered.
    pub fn remove_accepter(&self, accepter: &Arc<dyn Accepter>) -> bool {
        let mut accepters = self
            .accepters
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = accepters.len();
        accepters.retain(|a| !same_accepter(a, accepter));
        accepters.len() != before
    }

    /// Offers `message` to every accepter; `true` if any claimed it.
    pub fn accept(&self, message: &Message) -> bool {
        let accepters = self
            .accepters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        accepters
            .iter()
            .fold(false, |claimed, a| a.accept(message) | claimed)
    }
}

fn same_accepter(a: &Arc<dyn Accepter>, b: &Arc<dyn Accepter>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

fn spawn_send<S: FrameSink>(sink: Arc<S>, frame: String, tag: &'static str) {
    tokio::spawn(async move {
        if let Err(e) = sink.send_text(frame).await {
            warn!(tag, id = %sink.id(), error = %e, "background send failed");
        }
    });
}

impl<S: FrameSink> std::fmt::Debug for Connection<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.state())
            .field("session", &self.current_sink().map(|s| s.id()))
            .field("queued", &self.inbound.len())
            .finish()
    }
}
