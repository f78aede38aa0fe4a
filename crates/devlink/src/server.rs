//! `AppServer` builder and accept loop.
//!
//! The application side listens for controllers. Only one session is
//! active at a time: a newly accepted session replaces the current one,
//! which is closed. Each session gets a receive task feeding its frames
//! into the shared [`Connection`].

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use devlink_dispatch::{Dispatcher, InboundQueue, TickScheduler};
use devlink_protocol::EnvelopeCodec;
use devlink_transport::{FrameSink, TransportError, WebSocketListener, WebSocketSink};
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::connection::Connection;
use crate::DevlinkError;

/// Builder for an [`AppServer`].
///
/// # Example
///
/// ```rust,ignore
/// use devlink::prelude::*;
///
/// let server = AppServer::builder()
///     .bind("0.0.0.0:5637")
///     .path("/devlink")
///     .build()
///     .await?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct AppServerBuilder {
    config: AppConfig,
}

impl AppServerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from an existing configuration.
    pub fn from_config(config: AppConfig) -> Self {
        Self { config }
    }

    pub fn bind(mut self, addr: &str) -> Self {
        self.config.bind_addr = addr.to_string();
        self
    }

    pub fn path(mut self, path: &str) -> Self {
        self.config.path = path.to_string();
        self
    }

    pub fn tick_rate_hz(mut self, hz: u32) -> Self {
        self.config.tick_rate_hz = hz;
        self
    }

    /// Checks the variant registry and binds the listener.
    pub async fn build(self) -> Result<AppServer, DevlinkError> {
        let codec = EnvelopeCodec::builtin()?;
        let listener = WebSocketListener::bind(&self.config.bind_addr, &self.config.path).await?;
        let connection = Arc::new(Connection::new(codec, InboundQueue::new()));
        Ok(AppServer {
            listener,
            connection,
            config: self.config,
        })
    }
}

/// The application side of devlink: a listener plus the single shared
/// [`Connection`].
pub struct AppServer {
    listener: WebSocketListener,
    connection: Arc<Connection<WebSocketSink>>,
    config: AppConfig,
}

impl AppServer {
    pub fn builder() -> AppServerBuilder {
        AppServerBuilder::new()
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn connection(&self) -> &Arc<Connection<WebSocketSink>> {
        &self.connection
    }

    pub fn inbound(&self) -> &InboundQueue {
        self.connection.inbound()
    }

    /// A dispatcher draining this server's inbound queue.
    pub fn dispatcher(&self) -> Dispatcher {
        Dispatcher::new(self.inbound().clone())
    }

    /// A scheduler at the configured processing-loop rate.
    pub fn scheduler(&self) -> TickScheduler {
        TickScheduler::new(self.config.tick_config())
    }

    /// Runs the accept loop. Failed handshakes are logged and skipped.
    pub async fn run(&self) -> Result<(), DevlinkError> {
        info!(
            addr = ?self.local_addr().ok(),
            path = self.listener.path(),
            "devlink application server running"
        );
        loop {
            if let Err(e) = self.accept_one().await {
                warn!(error = %e, "rejected incoming session");
            }
        }
    }

    async fn accept_one(&self) -> Result<(), TransportError> {
        let (sink, source) = self.listener.accept().await?;
        let id = sink.id();

        if let Some(previous) = self.connection.attach(sink) {
            tokio::spawn(async move {
                if let Err(e) = previous.close().await {
                    debug!(id = %previous.id(), error = %e, "closing replaced session failed");
                }
            });
        }
        self.connection.on_open();

        let connection = Arc::clone(&self.connection);
        tokio::spawn(async move { connection.receive_from(id, source).await });
        Ok(())
    }

    /// Runs the accept loop in the background and `dispatcher` on the
    /// current task until `shutdown` resolves, then says goodbye to the
    /// controller.
    pub async fn serve(
        self,
        mut dispatcher: Dispatcher,
        shutdown: impl Future<Output = ()>,
    ) -> Result<(), DevlinkError> {
        let mut scheduler = self.scheduler();
        let server = Arc::new(self);
        let accept = {
            let server = Arc::clone(&server);
            tokio::spawn(async move { server.run().await })
        };

        dispatcher.run(&mut scheduler, shutdown).await;

        accept.abort();
        server.connection.close().await;
        info!("devlink application server stopped");
        Ok(())
    }
}

impl std::fmt::Debug for AppServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppServer")
            .field("addr", &self.local_addr().ok())
            .field("path", &self.listener.path())
            .field("connection", &self.connection)
            .finish()
    }
}
