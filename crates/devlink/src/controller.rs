//! Controller-side requests and reply handlers.

use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use devlink_dispatch::{ConnectionState, Dispatcher, HandlerError};
use devlink_protocol::{
    ConnectObjectRequest, ConnectionInfo, DirectoryKind, FileList, FileListRequest, FilePayload,
    FileUploadRequest, Goodbye, LogRecord, Message, MoveObject, Request, RequestIds, Screenshot,
    ScreenshotRequest, TextNote,
};
use devlink_transport::FrameSink;
use tracing::{debug, info, warn};

use crate::connection::{Connection, SendMode};
use crate::host::{ControllerView, DownloadSink, HostInfo};

/// Correlation ids are unique across every controller in the process.
static REQUEST_IDS: RequestIds = RequestIds::new();

/// The collaborators a [`Controller`] delegates to.
#[derive(Clone)]
pub struct ControllerServices {
    pub view: Arc<dyn ControllerView>,
    pub downloads: Arc<dyn DownloadSink>,
    pub host: Arc<dyn HostInfo>,
}

/// Drives a connected application: builds requests and routes replies to
/// a [`ControllerView`].
pub struct Controller<S: FrameSink> {
    connection: Arc<Connection<S>>,
    services: ControllerServices,
    /// Outstanding downloads, by request id.
    pending: Arc<Mutex<HashMap<i32, String>>>,
    /// Request id of the last object connect; move requests address it.
    target: Arc<AtomicI32>,
}

impl<S: FrameSink> Clone for Controller<S> {
    fn clone(&self) -> Self {
        Self {
            connection: Arc::clone(&self.connection),
            services: self.services.clone(),
            pending: Arc::clone(&self.pending),
            target: Arc::clone(&self.target),
        }
    }
}

impl<S: FrameSink> Controller<S> {
    pub fn new(connection: Arc<Connection<S>>, services: ControllerServices) -> Self {
        Self {
            connection,
            services,
            pending: Arc::default(),
            target: Arc::new(AtomicI32::new(0)),
        }
    }

    pub fn connection(&self) -> &Arc<Connection<S>> {
        &self.connection
    }

    /// Registers the reply handlers and greets the application whenever
    /// the connection opens, including right away if it already is open.
    pub fn install(&self, dispatcher: &mut Dispatcher) {
        let ctl = self.clone();
        dispatcher.on(move |m: LogRecord| {
            ctl.services
                .view
                .log(m.level, &format!("[{}] {}", m.timestamp, m.text));
            Ok(())
        });

        let ctl = self.clone();
        dispatcher.on(move |m: ConnectionInfo| {
            info!(
                application = %m.application_name,
                device = %m.device_name,
                "connected application identified itself"
            );
            ctl.services.view.title(&m);
            Ok(())
        });

        let ctl = self.clone();
        dispatcher.on(move |m: FileList| {
            ctl.services.view.file_list(&m);
            Ok(())
        });

        let ctl = self.clone();
        dispatcher.on(move |m: FilePayload| ctl.on_file(m));

        let ctl = self.clone();
        dispatcher.on(move |m: Screenshot| {
            ctl.services.view.screenshot(&m.timestamp, &m.image);
            Ok(())
        });

        dispatcher.on(|_: Goodbye| {
            info!("application is closing the session");
            Ok(())
        });

        let ctl = self.clone();
        dispatcher
            .watch_connection(self.connection.transitions())
            .on_state_change(move |state| {
                if state == ConnectionState::Open {
                    ctl.greet();
                }
            });
        if self.connection.is_open() {
            self.greet();
        }

        for kind in dispatcher.missing_handlers() {
            debug!(%kind, "controller does not handle this message kind");
        }
    }

    /// Asks for the application's identity and introduces ourselves.
    fn greet(&self) {
        let request = Request::new(Request::CONNECTION_INFO, REQUEST_IDS.next_id());
        let own = self.services.host.connection_info(REQUEST_IDS.next_id());
        if !(self.connection.post(&Message::from(request))
            && self.connection.post(&Message::from(own)))
        {
            debug!("greeting dropped, connection not open");
        }
    }

    fn on_file(&self, file: FilePayload) -> Result<(), HandlerError> {
        let requested = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&file.request_id)
            .ok_or_else(|| HandlerError::not_found(format!("download request {}", file.request_id)))?;

        let name = file_name_of(&requested);
        if name.is_empty() {
            return Err(HandlerError::failed(format!("no file name in {requested:?}")));
        }
        let saved = self.services.downloads.save(name, &file.data)?;
        info!(remote = %requested, local = %saved.display(), size = file.data.len(), "download complete");
        Ok(())
    }

    pub async fn request_connection_info(&self) -> bool {
        let id = REQUEST_IDS.next_id();
        self.send(Request::new(Request::CONNECTION_INFO, id).into()).await
    }

    /// Starts a screenshot stream; a non-positive `interval` asks for a
    /// single shot.
    pub async fn request_screenshot(&self, interval: f32) -> bool {
        let id = REQUEST_IDS.next_id();
        self.send(ScreenshotRequest::start(id, interval).into()).await
    }

    pub async fn stop_screenshot(&self) -> bool {
        let id = REQUEST_IDS.next_id();
        self.send(ScreenshotRequest::stop(id).into()).await
    }

    pub async fn list_files(&self, directory: DirectoryKind, path: &str) -> bool {
        let request = FileListRequest {
            request_id: REQUEST_IDS.next_id(),
            directory,
            path: path.to_string(),
        };
        self.send(request.into()).await
    }

    /// Requests a remote file. Backslashes in `path` are treated as
    /// separators.
    pub async fn download(&self, directory: DirectoryKind, path: &str) -> bool {
        let path = path.replace('\\', "/");
        let request_id = REQUEST_IDS.next_id();
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(request_id, path.clone());

        let sent = self
            .send(
                FileUploadRequest {
                    request_id,
                    directory,
                    path,
                }
                .into(),
            )
            .await;
        if !sent {
            self.pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&request_id);
        }
        sent
    }

    /// Number of downloads still waiting for their file.
    pub fn pending_downloads(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Sends the local file at `local` to `remote` inside `directory`.
    pub async fn upload(
        &self,
        local: impl AsRef<Path>,
        directory: DirectoryKind,
        remote: &str,
    ) -> io::Result<bool> {
        let data = tokio::fs::read(local.as_ref()).await?;
        info!(local = %local.as_ref().display(), remote, size = data.len(), "uploading file");
        let payload = FilePayload {
            request_id: REQUEST_IDS.next_id(),
            directory,
            path: remote.replace('\\', "/"),
            data,
        };
        Ok(self.send(payload.into()).await)
    }

    pub async fn send_text(&self, text: &str) -> bool {
        self.send(TextNote { text: text.to_string() }.into()).await
    }

    /// Attaches to a scene object; later [`move_object`](Self::move_object)
    /// calls address it.
    pub async fn connect_object(&self, object_name: &str) -> bool {
        let request_id = REQUEST_IDS.next_id();
        self.target.store(request_id, Ordering::Relaxed);
        let request = ConnectObjectRequest {
            request_id,
            object_name: object_name.to_string(),
        };
        self.send(request.into()).await
    }

    pub async fn move_object(&self, x: f32, y: f32, z: f32) -> bool {
        let target = self.target.load(Ordering::Relaxed);
        if target == 0 {
            warn!("moving without a connected object");
        }
        self.send(MoveObject { target, x, y, z }.into()).await
    }

    async fn send(&self, message: Message) -> bool {
        self.connection.send(&message, SendMode::Sync).await
    }
}

/// Last `/`-separated segment of a remote path.
fn file_name_of(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

impl<S: FrameSink> std::fmt::Debug for Controller<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("connection", &self.connection)
            .field("pending_downloads", &self.pending_downloads())
            .field("target", &self.target.load(Ordering::Relaxed))
            .finish()
    }
}
