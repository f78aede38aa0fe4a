use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use devlink::prelude::*;
use devlink::{FsFileStore, RootedDirectories};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

// ---------------------------------------------------------------------------
// Collaborators
// ---------------------------------------------------------------------------

/// Writes everything the controller shows us to the log.
struct LogPresenter;

impl Presenter for LogPresenter {
    fn show_text(&self, text: &str) {
        info!(target: "remote_app", text, "controller says");
    }

    fn show_connection_info(&self, info: &ConnectionInfo) {
        info!(
            target: "remote_app",
            controller = %info.application_name,
            device = %info.device_name,
            model = %info.device_model,
            "controller identified"
        );
    }

    fn show_received_file(&self, name: &str, size: u64) {
        info!(target: "remote_app", name, size, "file received");
    }

    fn show_image(&self, image: &[u8]) {
        info!(target: "remote_app", size = image.len(), "image received");
    }

    fn show_connection_state(&self, state: ConnectionState) {
        info!(target: "remote_app", %state, "controller link");
    }
}

/// A 1x1 transparent PNG stands in for a real frame grab.
struct BlankCapture;

const BLANK_PNG: [u8; 67] = [
    0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44,
    0x52, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1F,
    0x15, 0xC4, 0x89, 0x00, 0x00, 0x00, 0x0A, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9C, 0x63, 0x00,
    0x01, 0x00, 0x00, 0x05, 0x00, 0x01, 0x0D, 0x0A, 0x2D, 0xB4, 0x00, 0x00, 0x00, 0x00, 0x49,
    0x45, 0x4E, 0x44, 0xAE, 0x42, 0x60, 0x82,
];

impl ScreenCapture for BlankCapture {
    fn capture_png(&self) -> io::Result<Vec<u8>> {
        Ok(BLANK_PNG.to_vec())
    }
}

/// A handful of named objects with positions.
#[derive(Default)]
struct DemoScene {
    inner: Mutex<SceneState>,
}

#[derive(Default)]
struct SceneState {
    objects: HashMap<String, [f32; 3]>,
    attached: Option<String>,
}

impl DemoScene {
    fn with_objects(names: &[&str]) -> Self {
        let objects = names
            .iter()
            .map(|name| (name.to_string(), [0.0; 3]))
            .collect();
        Self {
            inner: Mutex::new(SceneState {
                objects,
                attached: None,
            }),
        }
    }

    #[cfg(test)]
    fn position(&self, name: &str) -> Option<[f32; 3]> {
        self.lock().objects.get(name).copied()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SceneState> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl SceneObjects for DemoScene {
    fn connect(&self, name: &str) -> bool {
        let mut scene = self.lock();
        if !scene.objects.contains_key(name) {
            return false;
        }
        scene.attached = Some(name.to_string());
        true
    }

    fn translate(&self, x: f32, y: f32, z: f32) {
        let mut scene = self.lock();
        let SceneState { objects, attached } = &mut *scene;
        let Some(position) = attached.as_deref().and_then(|name| objects.get_mut(name)) else {
            warn!(target: "remote_app", "move requested with no attached object");
            return;
        };
        position[0] += x;
        position[1] += y;
        position[2] += z;
        info!(target: "remote_app", ?position, "object moved");
    }
}

// ---------------------------------------------------------------------------
// Bootstrap
// ---------------------------------------------------------------------------

/// Reads an optional JSON config file given as the first argument.
fn load_config() -> Result<AppConfig, Box<dyn std::error::Error>> {
    match std::env::args().nth(1) {
        Some(path) => Ok(serde_json::from_slice(&std::fs::read(path)?)?),
        None => Ok(AppConfig::default()),
    }
}

fn storage_root() -> PathBuf {
    std::env::var_os("DEVLINK_ROOT")
        .map(PathBuf::from)
        .unwrap_or_else(|| std::env::temp_dir().join("devlink-remote-app"))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config()?;

    let (forwarder, records) = LogForwarder::new(tracing::Level::INFO, config.max_log_length);
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .with(forwarder)
        .init();

    let root = storage_root();
    info!(target: "remote_app", root = %root.display(), "serving files");

    let server = AppServer::builder()
        .bind(&config.bind_addr)
        .path(&config.path)
        .tick_rate_hz(config.tick_rate_hz)
        .build()
        .await?;

    let app = RemoteApp::new(
        Arc::clone(server.connection()),
        AppServices {
            presenter: Arc::new(LogPresenter),
            files: Arc::new(FsFileStore::new(RootedDirectories::new(root))),
            capture: Arc::new(BlankCapture),
            scene: Arc::new(DemoScene::with_objects(&["Cube", "Sphere"])),
            host: Arc::new(StaticHostInfo::new("remote-app")),
        },
    );
    let mut dispatcher = server.dispatcher();
    app.install(&mut dispatcher);
    app.forward_logs(records);

    server
        .serve(dispatcher, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(target: "remote_app", error = %e, "cannot listen for ctrl-c");
                std::future::pending::<()>().await;
            }
        })
        .await?;
    Ok(())
}
