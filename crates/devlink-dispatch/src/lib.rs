//! Inbound pipeline for devlink.
//!
//! Decoded messages cross from the network task to the processing loop
//! through an [`InboundQueue`]. The processing loop owns a [`Dispatcher`]
//! which, on every tick paced by a [`TickScheduler`], drains the queue and
//! hands each message to the handler registered for its kind.
//!
//! ```text
//! receive task ──enqueue──▶ InboundQueue ──drain_all──▶ Dispatcher ──▶ handler
//! ```
//!
//! Handlers run only on the processing loop and never touch the queue or
//! the codec.
//!
//! Connection state changes reach the dispatcher over an unbounded channel
//! of [`ConnectionState`] values. Every transition sent before a tick is
//! applied at the start of that tick, in order, so a close followed by a
//! reopen between two ticks still runs the disconnect hooks.

mod dispatcher;
mod error;
mod queue;
mod state;
mod tick;

pub use dispatcher::{Dispatcher, TickReport};
pub use error::HandlerError;
pub use queue::InboundQueue;
pub use state::ConnectionState;
pub use tick::{TickConfig, TickInfo, TickMetrics, TickScheduler};
