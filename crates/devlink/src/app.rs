//! Application-side handlers: what a running app does with each request
//! from the controller.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use devlink_dispatch::{ConnectionState, Dispatcher, HandlerError};
use devlink_protocol::{
    ConnectObjectRequest, ConnectionInfo, FileList, FileListRequest, FilePayload,
    FileUploadRequest, Goodbye, ImageData, LogRecord, Message, MoveObject, Request, Screenshot,
    ScreenshotRequest, TextNote,
};
use devlink_transport::FrameSink;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::connection::{Connection, SendMode};
use crate::host::{FileStore, HostInfo, Presenter, SceneObjects, ScreenCapture};

/// The collaborators a [`RemoteApp`] delegates to.
#[derive(Clone)]
pub struct AppServices {
    pub presenter: Arc<dyn Presenter>,
    pub files: Arc<dyn FileStore>,
    pub capture: Arc<dyn ScreenCapture>,
    pub scene: Arc<dyn SceneObjects>,
    pub host: Arc<dyn HostInfo>,
}

/// Handler set of the application side.
pub struct RemoteApp<S: FrameSink> {
    connection: Arc<Connection<S>>,
    services: AppServices,
    screenshots: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl<S: FrameSink> Clone for RemoteApp<S> {
    fn clone(&self) -> Self {
        Self {
            connection: Arc::clone(&self.connection),
            services: self.services.clone(),
            screenshots: Arc::clone(&self.screenshots),
        }
    }
}

impl<S: FrameSink> RemoteApp<S> {
    pub fn new(connection: Arc<Connection<S>>, services: AppServices) -> Self {
        Self {
            connection,
            services,
            screenshots: Arc::new(Mutex::new(None)),
        }
    }

    pub fn connection(&self) -> &Arc<Connection<S>> {
        &self.connection
    }

    /// Registers every application handler and follows the connection's
    /// state on `dispatcher`.
    pub fn install(&self, dispatcher: &mut Dispatcher) {
        let app = self.clone();
        dispatcher.on(move |m: TextNote| {
            app.services.presenter.show_text(&m.text);
            Ok(())
        });

        let app = self.clone();
        dispatcher.on(move |m: Request| app.on_request(m));

        let app = self.clone();
        dispatcher.on(move |m: ConnectionInfo| {
            app.services.presenter.show_connection_info(&m);
            Ok(())
        });

        let app = self.clone();
        dispatcher.on(move |m: ScreenshotRequest| app.on_screenshot_request(m));

        let app = self.clone();
        dispatcher.on(move |m: FileListRequest| app.on_file_list_request(m));

        let app = self.clone();
        dispatcher.on(move |m: FileUploadRequest| app.on_file_upload_request(m));

        let app = self.clone();
        dispatcher.on(move |m: ConnectObjectRequest| {
            if app.services.scene.connect(&m.object_name) {
                info!(object = %m.object_name, "connected to scene object");
                Ok(())
            } else {
                Err(HandlerError::not_found(format!("scene object {}", m.object_name)))
            }
        });

        let app = self.clone();
        dispatcher.on(move |m: FilePayload| app.on_file(m));

        let app = self.clone();
        dispatcher.on(move |m: ImageData| {
            app.services.presenter.show_image(&m.image);
            Ok(())
        });

        let app = self.clone();
        dispatcher.on(move |m: MoveObject| {
            app.services.scene.translate(m.x, m.y, m.z);
            Ok(())
        });

        dispatcher.on(|_: Goodbye| {
            info!("controller is closing the session");
            Ok(())
        });

        let app = self.clone();
        dispatcher
            .watch_connection(self.connection.transitions())
            .on_state_change(move |state| app.on_state_change(state));

        for kind in dispatcher.missing_handlers() {
            debug!(%kind, "application does not handle this message kind");
        }
    }

    fn on_state_change(&self, state: ConnectionState) {
        if state != ConnectionState::Open {
            self.stop_screenshots();
        }
        if state != ConnectionState::Connecting {
            self.services.presenter.show_connection_state(state);
        }
    }

    fn on_request(&self, request: Request) -> Result<(), HandlerError> {
        if request.request != Request::CONNECTION_INFO {
            debug!(request = %request.request, "ignoring unsupported request");
            return Ok(());
        }
        let info = self.services.host.connection_info(request.request_id);
        self.reply(info.into());
        Ok(())
    }

    fn on_file_list_request(&self, request: FileListRequest) -> Result<(), HandlerError> {
        let listing = match self.services.files.list(request.directory, &request.path) {
            Ok(listing) => listing,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(directory = %request.directory, path = %request.path, "listing a missing directory");
                Default::default()
            }
            Err(e) => return Err(e.into()),
        };
        self.reply(
            FileList {
                request_id: request.request_id,
                directory: request.directory,
                path: request.path,
                files: listing.files,
                directories: listing.directories,
            }
            .into(),
        );
        Ok(())
    }

    fn on_file_upload_request(&self, request: FileUploadRequest) -> Result<(), HandlerError> {
        let data = self.services.files.read(request.directory, &request.path)?;
        info!(
            directory = %request.directory,
            path = %request.path,
            size = data.len(),
            "sending file"
        );
        self.reply(
            FilePayload {
                request_id: request.request_id,
                directory: request.directory,
                path: request.path,
                data,
            }
            .into(),
        );
        Ok(())
    }

    fn on_file(&self, file: FilePayload) -> Result<(), HandlerError> {
        let name = file.file_name();
        if name.is_empty() {
            return Err(HandlerError::failed(format!("no file name in {:?}", file.path)));
        }
        let size = self.services.files.write(file.directory, name, &file.data)?;
        info!(name, directory = %file.directory, size, "wrote received file");

        let presenter = &self.services.presenter;
        presenter.show_received_file(name, size);
        if name.to_ascii_lowercase().ends_with(".png") {
            presenter.show_image(&file.data);
        }
        Ok(())
    }

    fn on_screenshot_request(&self, request: ScreenshotRequest) -> Result<(), HandlerError> {
        self.stop_screenshots();
        if request.stop {
            return Ok(());
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| HandlerError::failed(format!("cannot start screenshots: {e}")))?;
        let task = runtime.spawn(screenshot_stream(
            Arc::clone(&self.connection),
            Arc::clone(&self.services.capture),
            request.request_id,
            request.interval,
        ));
        *self.screenshots.lock().unwrap_or_else(PoisonError::into_inner) = Some(task);
        Ok(())
    }

    /// Aborts a running screenshot stream, if any.
    pub fn stop_screenshots(&self) {
        let running = self
            .screenshots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = running {
            if !task.is_finished() {
                debug!("stopping screenshot stream");
            }
            task.abort();
        }
    }

    /// Whether a screenshot stream is running.
    pub fn is_streaming_screenshots(&self) -> bool {
        self.screenshots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Forwards records produced by a [`LogForwarder`](crate::LogForwarder)
    /// to the controller while the connection is open. Records produced
    /// while it is not open are dropped.
    pub fn forward_logs(&self, mut records: mpsc::UnboundedReceiver<LogRecord>) -> JoinHandle<()> {
        let connection = Arc::clone(&self.connection);
        tokio::spawn(async move {
            while let Some(record) = records.recv().await {
                if connection.is_open() {
                    connection.send(&record.into(), SendMode::Async).await;
                }
            }
        })
    }

    fn reply(&self, message: Message) {
        if !self.connection.post(&message) {
            debug!(tag = message.type_tag(), "reply dropped, connection not open");
        }
    }
}

/// Captures and sends screenshots while the session that asked for them is
/// open. With a non-positive interval it sends exactly one.
///
/// The stream is bound to the session current when it starts: once that
/// session closes or is replaced, it ends even if a newer session is open.
async fn screenshot_stream<S: FrameSink>(
    connection: Arc<Connection<S>>,
    capture: Arc<dyn ScreenCapture>,
    request_id: i32,
    interval: f32,
) {
    let mut state = connection.subscribe();
    let Some(session) = connection.session() else {
        return;
    };
    // Non-positive (or unrepresentable) intervals mean a single shot.
    let period = if interval > 0.0 {
        Duration::try_from_secs_f32(interval).ok()
    } else {
        None
    };
    let requester_open = || connection.is_open() && connection.session() == Some(session);

    while requester_open() {
        match capture.capture_png() {
            Ok(image) => {
                let timestamp = chrono::Local::now().format("%Y/%m/%d %H:%M:%S").to_string();
                debug!(request_id, %timestamp, size = image.len(), "sending screenshot");
                let shot = Screenshot {
                    request_id,
                    timestamp,
                    image,
                };
                connection.send(&shot.into(), SendMode::Async).await;
            }
            Err(e) => error!(request_id, error = %e, "screen capture failed"),
        }

        let Some(period) = period else {
            break;
        };
        let sleep = tokio::time::sleep(period);
        tokio::pin!(sleep);
        // Wake on every state change so a replaced session is noticed even
        // when the latest state reads `Open` again.
        loop {
            tokio::select! {
                () = &mut sleep => break,
                changed = state.changed() => {
                    if changed.is_err() || !requester_open() {
                        debug!(request_id, %session, "screenshot stream ended");
                        return;
                    }
                }
            }
        }
    }
    debug!(request_id, %session, "screenshot stream ended");
}

impl<S: FrameSink> std::fmt::Debug for RemoteApp<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteApp")
            .field("connection", &self.connection)
            .field("streaming_screenshots", &self.is_streaming_screenshots())
            .finish()
    }
}
