//! Routes drained messages to the handler registered for their kind.
//!
//! The handler table is keyed by [`MessageKind`], so routing is a single
//! map lookup and the set of handled kinds can be checked at startup with
//! [`Dispatcher::missing_handlers`].
//!
//! # One tick
//!
//! 1. Every connection-state transition reported since the previous tick is
//!    handed to the state hooks, oldest first. Transitions arrive over an
//!    unbounded channel, so a close followed by a reopen within one tick
//!    runs the hooks for both.
//! 2. The queue is drained once, and each message goes through its handler
//!    in arrival order.
//!
//! A failing handler is logged and counted; it never stops the rest of the
//! batch. A message with no handler is counted as ignored.
//!
//! ```rust,ignore
//! let mut dispatcher = Dispatcher::new(queue);
//! dispatcher.on(|note: TextNote| {
//!     println!("{}", note.text);
//!     Ok(())
//! });
//! let report = dispatcher.tick();
//! ```

use std::collections::HashMap;
use std::future::Future;

use devlink_protocol::{Message, MessageKind, Variant};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::{ConnectionState, HandlerError, InboundQueue, TickScheduler};

type BoxedHandler = Box<dyn FnMut(Message) -> Result<(), HandlerError> + Send>;
type StateHook = Box<dyn FnMut(ConnectionState) + Send>;

/// Outcome counts for one [`Dispatcher::tick`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Messages whose handler returned `Ok`.
    pub dispatched: usize,
    /// Messages with no registered handler.
    pub ignored: usize,
    /// Messages whose handler returned `Err`.
    pub failed: usize,
}

impl TickReport {
    /// Messages handled in any way during the tick.
    pub fn total(&self) -> usize {
        self.dispatched + self.ignored + self.failed
    }
}

/// Single-consumer processing loop over an [`InboundQueue`].
pub struct Dispatcher {
    queue: InboundQueue,
    handlers: HashMap<MessageKind, BoxedHandler>,
    state_rx: Option<mpsc::UnboundedReceiver<ConnectionState>>,
    state_hooks: Vec<StateHook>,
}

impl Dispatcher {
    /// A dispatcher with no handlers that drains `queue`.
    pub fn new(queue: InboundQueue) -> Self {
        Self {
            queue,
            handlers: HashMap::new(),
            state_rx: None,
            state_hooks: Vec::new(),
        }
    }

    /// The queue this dispatcher drains.
    pub fn queue(&self) -> &InboundQueue {
        &self.queue
    }

    /// Registers `handler` for messages of variant `V`, replacing any
    /// handler previously registered for that kind.
    pub fn on<V, F>(&mut self, mut handler: F) -> &mut Self
    where
        V: Variant,
        F: FnMut(V) -> Result<(), HandlerError> + Send + 'static,
    {
        let boxed: BoxedHandler = Box::new(move |message| match V::from_message(message) {
            Some(inner) => handler(inner),
            None => Err(HandlerError::failed(format!(
                "message routed to the {} handler is not a {}",
                V::KIND,
                V::KIND
            ))),
        });
        if self.handlers.insert(V::KIND, boxed).is_some() {
            debug!(kind = %V::KIND, "replaced handler");
        }
        self
    }

    /// Whether a handler is registered for `kind`.
    pub fn handles(&self, kind: MessageKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    /// Kinds that would be ignored because nothing handles them.
    pub fn missing_handlers(&self) -> Vec<MessageKind> {
        MessageKind::ALL
            .into_iter()
            .filter(|kind| !self.handlers.contains_key(kind))
            .collect()
    }

    /// Follows a connection's state transitions; those received since the
    /// previous tick are applied, in order, at the start of the next one.
    pub fn watch_connection(
        &mut self,
        state_rx: mpsc::UnboundedReceiver<ConnectionState>,
    ) -> &mut Self {
        self.state_rx = Some(state_rx);
        self
    }

    /// Adds a hook run once per state transition.
    pub fn on_state_change<F>(&mut self, hook: F) -> &mut Self
    where
        F: FnMut(ConnectionState) + Send + 'static,
    {
        self.state_hooks.push(Box::new(hook));
        self
    }

    /// Applies pending state transitions, then dispatches everything
    /// queued.
    pub fn tick(&mut self) -> TickReport {
        self.apply_state_changes();

        let mut report = TickReport::default();
        for message in self.queue.drain_all() {
            let kind = message.kind();
            let Some(handler) = self.handlers.get_mut(&kind) else {
                trace!(%kind, "no handler registered, ignoring message");
                report.ignored += 1;
                continue;
            };
            match handler(message) {
                Ok(()) => report.dispatched += 1,
                Err(e) => {
                    warn!(%kind, error = %e, "handler failed");
                    report.failed += 1;
                }
            }
        }

        if report.total() > 0 {
            trace!(
                dispatched = report.dispatched,
                ignored = report.ignored,
                failed = report.failed,
                "tick dispatched"
            );
        }
        report
    }

    fn apply_state_changes(&mut self) {
        let Some(rx) = self.state_rx.as_mut() else {
            return;
        };
        loop {
            match rx.try_recv() {
                Ok(state) => {
                    info!(%state, "applying connection state");
                    for hook in &mut self.state_hooks {
                        hook(state);
                    }
                }
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    debug!("connection state sender dropped, no longer watching");
                    self.state_rx = None;
                    break;
                }
            }
        }
    }

    /// Drives [`tick`](Self::tick) from `scheduler` until `shutdown`
    /// resolves.
    pub async fn run(&mut self, scheduler: &mut TickScheduler, shutdown: impl Future<Output = ()>) {
        tokio::pin!(shutdown);
        info!(rate_hz = scheduler.tick_rate_hz(), "processing loop started");
        loop {
            tokio::select! {
                () = &mut shutdown => break,
                _ = scheduler.wait_for_tick() => {
                    self.tick();
                    scheduler.record_tick_end();
                }
            }
        }
        info!(ticks = scheduler.tick_count(), "processing loop stopped");
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<_> = self.handlers.keys().copied().collect();
        kinds.sort_unstable();
        f.debug_struct("Dispatcher")
            .field("queued", &self.queue.len())
            .field("handlers", &kinds)
            .field("watching", &self.state_rx.is_some())
            .finish()
    }
}
