//! Integration tests for the application server, the controller client, and
//! the full request/reply flow over a real socket.

use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use devlink::prelude::*;
use devlink::{
    DirectoryDownloads, DirectoryResolver, EnvelopeCodec, FsFileStore, LogLevel, RootedDirectories,
    WebSocketSink,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::Message as WsMessage;

// =========================================================================
// Fake collaborators
// =========================================================================

#[derive(Default)]
struct RecordingPresenter {
    events: Mutex<Vec<String>>,
}

impl RecordingPresenter {
    fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl Presenter for RecordingPresenter {
    fn show_text(&self, text: &str) {
        self.events.lock().unwrap().push(format!("text:{text}"));
    }
    fn show_connection_info(&self, info: &ConnectionInfo) {
        self.events
            .lock()
            .unwrap()
            .push(format!("info:{}", info.application_name));
    }
    fn show_received_file(&self, name: &str, size: u64) {
        self.events.lock().unwrap().push(format!("file:{name}:{size}"));
    }
    fn show_image(&self, _image: &[u8]) {}
    fn show_connection_state(&self, state: ConnectionState) {
        self.events.lock().unwrap().push(format!("state:{state}"));
    }
}

struct FixedCapture;

impl ScreenCapture for FixedCapture {
    fn capture_png(&self) -> io::Result<Vec<u8>> {
        Ok(vec![0x89, b'P', b'N', b'G'])
    }
}

struct NoScene;

impl SceneObjects for NoScene {
    fn connect(&self, _name: &str) -> bool {
        false
    }
    fn translate(&self, _x: f32, _y: f32, _z: f32) {}
}

#[derive(Default)]
struct RecordingView {
    titles: Mutex<Vec<String>>,
    shots: Mutex<Vec<usize>>,
}

impl ControllerView for RecordingView {
    fn log(&self, _level: LogLevel, _line: &str) {}
    fn title(&self, info: &ConnectionInfo) {
        self.titles
            .lock()
            .unwrap()
            .push(info.application_name.clone());
    }
    fn file_list(&self, _list: &FileList) {}
    fn screenshot(&self, _timestamp: &str, image: &[u8]) {
        self.shots.lock().unwrap().push(image.len());
    }
}

// =========================================================================
// Helpers
// =========================================================================

type ClientWs = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

struct RunningApp {
    addr: String,
    connection: Arc<Connection<WebSocketSink>>,
    presenter: Arc<RecordingPresenter>,
    shutdown: Option<oneshot::Sender<()>>,
    served: tokio::task::JoinHandle<Result<(), DevlinkError>>,
}

impl RunningApp {
    async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        self.served.await.unwrap().unwrap();
    }
}

/// Starts an application with the full handler set on a random port.
async fn start_app(root: &Path) -> RunningApp {
    let server = AppServer::builder()
        .bind("127.0.0.1:0")
        .tick_rate_hz(120)
        .build()
        .await
        .expect("server should build");
    let addr = server.local_addr().expect("local addr").to_string();
    let connection = Arc::clone(server.connection());

    let presenter = Arc::new(RecordingPresenter::default());
    let services = AppServices {
        presenter: presenter.clone(),
        files: Arc::new(FsFileStore::new(RootedDirectories::new(root))),
        capture: Arc::new(FixedCapture),
        scene: Arc::new(NoScene),
        host: Arc::new(StaticHostInfo::new("IntegrationApp")),
    };
    let mut dispatcher = server.dispatcher();
    RemoteApp::new(Arc::clone(&connection), services).install(&mut dispatcher);

    let (tx, rx) = oneshot::channel();
    let served = tokio::spawn(server.serve(dispatcher, async move {
        let _ = rx.await;
    }));

    RunningApp {
        addr,
        connection,
        presenter,
        shutdown: Some(tx),
        served,
    }
}

async fn connect(addr: &str) -> ClientWs {
    let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/devlink"))
        .await
        .expect("should connect");
    ws
}

async fn send(ws: &mut ClientWs, message: Message) {
    let frame = EnvelopeCodec::builtin().unwrap().encode(&message).unwrap();
    ws.send(WsMessage::text(frame)).await.expect("send");
}

/// Next decoded devlink message, skipping control frames.
async fn recv(ws: &mut ClientWs) -> Option<Message> {
    let codec = EnvelopeCodec::builtin().unwrap();
    loop {
        let next = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for a frame");
        match next {
            Some(Ok(WsMessage::Text(text))) => return Some(codec.decode(text.as_str()).unwrap()),
            Some(Ok(WsMessage::Close(_))) | None | Some(Err(_)) => return None,
            Some(Ok(_)) => continue,
        }
    }
}

async fn request_info(ws: &mut ClientWs, request_id: i32) -> ConnectionInfo {
    send(ws, Request::new(Request::CONNECTION_INFO, request_id).into()).await;
    match recv(ws).await {
        Some(Message::ConnectionInfo(info)) => info,
        other => panic!("expected ConnectionInfo, got {other:?}"),
    }
}

async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

// =========================================================================
// Tests
// =========================================================================

#[tokio::test]
async fn test_connection_info_round_trip() {
    let root = tempfile::tempdir().unwrap();
    let app = start_app(root.path()).await;
    let mut ws = connect(&app.addr).await;

    let info = request_info(&mut ws, 41).await;
    assert_eq!(info.request_id, 41);
    assert_eq!(info.application_name, "IntegrationApp");
    assert!(app.connection.is_open());

    app.stop().await;
}

#[tokio::test]
async fn test_send_without_session_is_dropped() {
    let server = AppServer::builder()
        .bind("127.0.0.1:0")
        .build()
        .await
        .unwrap();
    let connection = server.connection();
    assert_eq!(connection.state(), ConnectionState::Disconnected);

    let sent = connection
        .send(&TextNote { text: "hi".into() }.into(), SendMode::Sync)
        .await;
    assert!(!sent);
    assert!(!connection.post(&TextNote { text: "hi".into() }.into()));
}

#[tokio::test]
async fn test_binary_and_malformed_frames_keep_session_open() {
    let root = tempfile::tempdir().unwrap();
    let app = start_app(root.path()).await;
    let mut ws = connect(&app.addr).await;

    ws.send(WsMessage::binary(vec![1u8, 2, 3])).await.unwrap();
    ws.send(WsMessage::text("garbage")).await.unwrap();
    ws.send(WsMessage::text("NoSuchTag,-,e30=")).await.unwrap();
    ws.send(WsMessage::text("Text,-,!!!")).await.unwrap();

    let info = request_info(&mut ws, 7).await;
    assert_eq!(info.request_id, 7);
    assert!(app.connection.is_open());

    app.stop().await;
}

#[tokio::test]
async fn test_text_reaches_presenter() {
    let root = tempfile::tempdir().unwrap();
    let app = start_app(root.path()).await;
    let mut ws = connect(&app.addr).await;

    send(&mut ws, TextNote { text: "over the wire".into() }.into()).await;
    let presenter = Arc::clone(&app.presenter);
    eventually("text on presenter", || {
        presenter.events().contains(&"text:over the wire".to_string())
    })
    .await;

    app.stop().await;
}

#[tokio::test]
async fn test_newest_session_replaces_current() {
    let root = tempfile::tempdir().unwrap();
    let app = start_app(root.path()).await;

    let mut first = connect(&app.addr).await;
    request_info(&mut first, 1).await;

    let mut second = connect(&app.addr).await;
    assert!(recv(&mut first).await.is_none(), "first session must be closed");

    let info = request_info(&mut second, 2).await;
    assert_eq!(info.request_id, 2);
    assert!(app.connection.is_open());

    app.stop().await;
}

#[tokio::test]
async fn test_peer_close_disconnects_and_presents_state() {
    let root = tempfile::tempdir().unwrap();
    let app = start_app(root.path()).await;
    let mut ws = connect(&app.addr).await;
    request_info(&mut ws, 1).await;

    ws.close(None).await.unwrap();
    let connection = Arc::clone(&app.connection);
    eventually("disconnect", || !connection.is_open()).await;
    let presenter = Arc::clone(&app.presenter);
    eventually("state on presenter", || {
        presenter.events().contains(&"state:disconnected".to_string())
    })
    .await;

    app.stop().await;
}

#[tokio::test]
async fn test_shutdown_says_goodbye() {
    let root = tempfile::tempdir().unwrap();
    let app = start_app(root.path()).await;
    let mut ws = connect(&app.addr).await;
    request_info(&mut ws, 1).await;

    app.stop().await;
    assert!(matches!(recv(&mut ws).await, Some(Message::Goodbye(_))));
}

#[tokio::test]
async fn test_controller_end_to_end() {
    let root = tempfile::tempdir().unwrap();
    let app = start_app(root.path()).await;

    let data_dir = RootedDirectories::new(root.path()).resolve(DirectoryKind::Data);
    std::fs::create_dir_all(data_dir.join("logs")).unwrap();
    std::fs::write(data_dir.join("logs").join("run.txt"), b"line one").unwrap();

    let client = ControllerClient::connect(&format!("ws://{}/devlink", app.addr))
        .await
        .expect("controller should connect");
    let view = Arc::new(RecordingView::default());
    let downloads_dir = tempfile::tempdir().unwrap();
    let controller = Controller::new(
        Arc::clone(client.connection()),
        ControllerServices {
            view: view.clone(),
            downloads: Arc::new(DirectoryDownloads::new(downloads_dir.path())),
            host: Arc::new(StaticHostInfo::new("Controller")),
        },
    );
    let mut dispatcher = client.dispatcher();
    controller.install(&mut dispatcher);

    // Greeting: the application answers with its identity and shows ours.
    for _ in 0..200 {
        dispatcher.tick();
        if !view.titles.lock().unwrap().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(*view.titles.lock().unwrap(), vec!["IntegrationApp"]);
    let presenter = Arc::clone(&app.presenter);
    eventually("controller identity", || {
        presenter.events().contains(&"info:Controller".to_string())
    })
    .await;

    // Download.
    assert!(controller.download(DirectoryKind::Data, "logs\\run.txt").await);
    let saved = downloads_dir.path().join("run.txt");
    for _ in 0..200 {
        dispatcher.tick();
        if saved.exists() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(std::fs::read(&saved).unwrap(), b"line one");
    assert_eq!(controller.pending_downloads(), 0);

    // Single screenshot.
    assert!(controller.request_screenshot(0.0).await);
    for _ in 0..200 {
        dispatcher.tick();
        if !view.shots.lock().unwrap().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(*view.shots.lock().unwrap(), vec![4]);

    client.close().await;
    assert!(!client.connection().is_open());
    app.stop().await;
}
