//! # Devlink
//!
//! Remote debug and control channel between a running application and a
//! controller.
//!
//! The application runs an [`AppServer`]; a controller dials it with a
//! [`ControllerClient`]. Both ends exchange typed messages framed as
//! `tag,flag,payload` text envelopes. Received messages are queued and
//! handled on the host's processing loop by a [`Dispatcher`], never on the
//! network task.
//!
//! A [`Connection`] holds at most one session. Handlers learn about its
//! lifecycle through the dispatcher's state hooks, which see every
//! [`ConnectionState`] transition in order.
//!
//! ## Crates
//!
//! - `devlink-transport`: text frame sinks and sources over WebSocket
//! - `devlink-protocol`: message types, tag registry and envelope codec
//! - `devlink-dispatch`: inbound queue, handler table and tick pacing
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use devlink::prelude::*;
//!
//! // let server = AppServer::builder()
//! //     .bind("0.0.0.0:5637")
//! //     .build()
//! //     .await?;
//! // let mut dispatcher = server.dispatcher();
//! // RemoteApp::new(server.connection().clone(), services).install(&mut dispatcher);
//! // server.serve(dispatcher, shutdown).await
//! ```

mod app;
mod client;
mod config;
mod connection;
mod controller;
mod error;
mod host;
mod log_forward;
mod server;

pub use app::{AppServices, RemoteApp};
pub use client::ControllerClient;
pub use config::AppConfig;
pub use connection::{Accepter, Connection, SendMode};
pub use controller::{Controller, ControllerServices};
pub use error::DevlinkError;
pub use host::{
    ControllerView, DirectoryDownloads, DirectoryListing, DirectoryResolver, DownloadSink,
    FileStore, FsFileStore, HostInfo, Presenter, RootedDirectories, SceneObjects, ScreenCapture,
    StaticHostInfo,
};
pub use log_forward::{DEFAULT_MAX_LOG_LENGTH, LogForwarder};
pub use server::{AppServer, AppServerBuilder};

pub use devlink_dispatch::{
    ConnectionState, Dispatcher, HandlerError, InboundQueue, TickConfig, TickReport,
    TickScheduler,
};
pub use devlink_protocol::{
    DecodeError, DirectoryKind, EncodeError, EnvelopeCodec, LogLevel, MAX_INFLATED_LEN, Message,
    MessageKind, RegistryError, Variant,
};
pub use devlink_transport::{SessionId, TransportError, WebSocketSink};

/// Re-exports for the common case.
pub mod prelude {
    pub use crate::{
        AppConfig, AppServer, AppServices, Connection, ConnectionState, Controller,
        ControllerClient, ControllerServices, ControllerView, DevlinkError, DirectoryKind,
        Dispatcher, DownloadSink, FileStore, HandlerError, HostInfo, LogForwarder, Message,
        Presenter, RemoteApp, SceneObjects, ScreenCapture, SendMode, StaticHostInfo,
    };
    pub use devlink_protocol::{
        ConnectObjectRequest, ConnectionInfo, FileList, FileListRequest, FilePayload,
        FileUploadRequest, Goodbye, ImageData, LogRecord, MoveObject, Request, Screenshot,
        ScreenshotRequest, TextNote,
    };
}
