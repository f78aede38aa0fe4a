use std::sync::Arc;

use devlink_dispatch::{Dispatcher, InboundQueue};
use devlink_protocol::EnvelopeCodec;
use devlink_transport::{FrameSink, WebSocketSink};
use tokio::task::JoinHandle;
use tracing::info;

use crate::connection::Connection;
use crate::DevlinkError;

/// The controller side of devlink: one dialed session.
///
/// Uses the same [`Connection`] plumbing as the application side. Dropping
/// the client stops its receive task; call [`close`](Self::close) first to
/// end the session politely.
pub struct ControllerClient {
    connection: Arc<Connection<WebSocketSink>>,
    receiver: JoinHandle<()>,
}

impl ControllerClient {
    /// Dials `url`, e.g. `ws://127.0.0.1:5637/devlink`.
    pub async fn connect(url: &str) -> Result<Self, DevlinkError> {
        let codec = EnvelopeCodec::builtin()?;
        let (sink, source) = devlink_transport::connect(url).await?;
        let id = sink.id();

        let connection = Arc::new(Connection::new(codec, InboundQueue::new()));
        connection.attach(sink);
        connection.on_open();
        info!(url, %id, "connected to application");

        let receiver = {
            let connection = Arc::clone(&connection);
            tokio::spawn(async move { connection.receive_from(id, source).await })
        };
        Ok(Self {
            connection,
            receiver,
        })
    }

    pub fn connection(&self) -> &Arc<Connection<WebSocketSink>> {
        &self.connection
    }

    pub fn inbound(&self) -> &InboundQueue {
        self.connection.inbound()
    }

    /// A dispatcher draining this client's inbound queue.
    pub fn dispatcher(&self) -> Dispatcher {
        Dispatcher::new(self.inbound().clone())
    }

    /// Sends a goodbye and closes the session.
    pub async fn close(&self) {
        self.connection.close().await;
    }
}

impl Drop for ControllerClient {
    fn drop(&mut self) {
        self.receiver.abort();
    }
}

impl std::fmt::Debug for ControllerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControllerClient")
            .field("connection", &self.connection)
            .finish()
    }
}
