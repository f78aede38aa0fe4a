//! Collaborators the handler sets talk to.
//!
//! Everything outside the protocol itself (presentation, storage, screen
//! capture, scene manipulation, host identity) is reached through these
//! traits. Implementations use interior mutability where they keep state,
//! since handlers only hold shared references.

use std::io;
use std::path::{Path, PathBuf};

use devlink_dispatch::ConnectionState;
use devlink_protocol::{ConnectionInfo, DirectoryKind, FileList, LogLevel};

// ---------------------------------------------------------------------------
// Application side
// ---------------------------------------------------------------------------

/// Shows what the controller sent.
pub trait Presenter: Send + Sync + 'static {
    fn show_text(&self, text: &str);
    fn show_connection_info(&self, info: &ConnectionInfo);
    /// A file was written; `size` is its length in bytes.
    fn show_received_file(&self, name: &str, size: u64);
    /// Encoded image bytes (PNG).
    fn show_image(&self, image: &[u8]);
    /// `Open` clears any disconnected notice; `Disconnected` shows one.
    fn show_connection_state(&self, state: ConnectionState);
}

/// Entries of one directory, as plain names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryListing {
    pub files: Vec<String>,
    pub directories: Vec<String>,
}

/// File access below the logical storage roots.
pub trait FileStore: Send + Sync + 'static {
    fn list(&self, directory: DirectoryKind, path: &str) -> io::Result<DirectoryListing>;
    fn read(&self, directory: DirectoryKind, path: &str) -> io::Result<Vec<u8>>;
    /// Writes `data` as `name` directly below the root; returns the size
    /// written.
    fn write(&self, directory: DirectoryKind, name: &str, data: &[u8]) -> io::Result<u64>;
}

/// Grabs the current screen as PNG bytes.
pub trait ScreenCapture: Send + Sync + 'static {
    fn capture_png(&self) -> io::Result<Vec<u8>>;
}

/// Lookup and manipulation of named scene objects.
pub trait SceneObjects: Send + Sync + 'static {
    /// Selects the object named `name` as the target of later moves.
    /// Returns `false` if no such object exists.
    fn connect(&self, name: &str) -> bool;
    /// Moves the selected object by a relative offset. No-op without one.
    fn translate(&self, x: f32, y: f32, z: f32);
}

/// Identity reported in [`ConnectionInfo`] replies.
pub trait HostInfo: Send + Sync + 'static {
    fn application_name(&self) -> String;
    fn device_id(&self) -> String;
    fn device_name(&self) -> String;
    fn device_model(&self) -> String;

    fn connection_info(&self, request_id: i32) -> ConnectionInfo {
        ConnectionInfo {
            request_id,
            application_name: self.application_name(),
            device_id: self.device_id(),
            device_name: self.device_name(),
            device_model: self.device_model(),
        }
    }
}

/// Maps a logical storage root to a real directory.
pub trait DirectoryResolver: Send + Sync + 'static {
    fn resolve(&self, directory: DirectoryKind) -> PathBuf;
}

// ---------------------------------------------------------------------------
// Controller side
// ---------------------------------------------------------------------------

/// Shows what the application sent back.
pub trait ControllerView: Send + Sync + 'static {
    fn log(&self, level: LogLevel, line: &str);
    fn title(&self, info: &ConnectionInfo);
    fn file_list(&self, list: &FileList);
    fn screenshot(&self, timestamp: &str, image: &[u8]);
}

/// Stores files downloaded from the application.
pub trait DownloadSink: Send + Sync + 'static {
    /// Saves `data` as `file_name`; returns where it went.
    fn save(&self, file_name: &str, data: &[u8]) -> io::Result<PathBuf>;
}

// ---------------------------------------------------------------------------
// Provided implementations
// ---------------------------------------------------------------------------

/// Host identity fixed at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticHostInfo {
    pub application_name: String,
    pub device_id: String,
    pub device_name: String,
    pub device_model: String,
}

impl StaticHostInfo {
    /// Identity for `application_name` on this machine, with a fresh random
    /// device id.
    pub fn new(application_name: impl Into<String>) -> Self {
        let bytes: [u8; 16] = rand::random();
        let device_id = bytes.iter().map(|b| format!("{b:02x}")).collect();
        let device_name = ["HOSTNAME", "COMPUTERNAME", "HOST"]
            .iter()
            .find_map(|var| std::env::var(var).ok().filter(|v| !v.is_empty()))
            .unwrap_or_else(|| "unknown".to_string());
        Self {
            application_name: application_name.into(),
            device_id,
            device_name,
            device_model: format!("{} {}", std::env::consts::OS, std::env::consts::ARCH),
        }
    }
}

impl HostInfo for StaticHostInfo {
    fn application_name(&self) -> String {
        self.application_name.clone()
    }

    fn device_id(&self) -> String {
        self.device_id.clone()
    }

    fn device_name(&self) -> String {
        self.device_name.clone()
    }

    fn device_model(&self) -> String {
        self.device_model.clone()
    }
}

/// Puts every storage root in its own subdirectory of `base`.
#[derive(Debug, Clone)]
pub struct RootedDirectories {
    base: PathBuf,
}

impl RootedDirectories {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }
}

impl DirectoryResolver for RootedDirectories {
    fn resolve(&self, directory: DirectoryKind) -> PathBuf {
        self.base.join(directory.to_string())
    }
}

/// [`FileStore`] over the local filesystem.
///
/// Relative paths are joined below the resolved root; paths that try to
/// climb out of it with `..` or are absolute are refused.
#[derive(Debug, Clone)]
pub struct FsFileStore<R> {
    resolver: R,
}

impl<R: DirectoryResolver> FsFileStore<R> {
    pub fn new(resolver: R) -> Self {
        Self { resolver }
    }

    fn locate(&self, directory: DirectoryKind, path: &str) -> io::Result<PathBuf> {
        let relative = Path::new(path);
        let escapes = relative.components().any(|c| {
            !matches!(
                c,
                std::path::Component::Normal(_) | std::path::Component::CurDir
            )
        });
        if escapes {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("{path} leaves the {directory} root"),
            ));
        }
        Ok(self.resolver.resolve(directory).join(relative))
    }
}

impl<R: DirectoryResolver> FileStore for FsFileStore<R> {
    fn list(&self, directory: DirectoryKind, path: &str) -> io::Result<DirectoryListing> {
        let mut listing = DirectoryListing::default();
        for entry in std::fs::read_dir(self.locate(directory, path)?)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if entry.file_type()?.is_dir() {
                listing.directories.push(name);
            } else {
                listing.files.push(name);
            }
        }
        listing.files.sort();
        listing.directories.sort();
        Ok(listing)
    }

    fn read(&self, directory: DirectoryKind, path: &str) -> io::Result<Vec<u8>> {
        std::fs::read(self.locate(directory, path)?)
    }

    fn write(&self, directory: DirectoryKind, name: &str, data: &[u8]) -> io::Result<u64> {
        let target = self.locate(directory, name)?;
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&target, data)?;
        Ok(data.len() as u64)
    }
}

/// [`DownloadSink`] that writes into one local directory.
#[derive(Debug, Clone)]
pub struct DirectoryDownloads {
    dir: PathBuf,
}

impl DirectoryDownloads {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl DownloadSink for DirectoryDownloads {
    fn save(&self, file_name: &str, data: &[u8]) -> io::Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(file_name);
        std::fs::write(&path, data)?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_host_info_generates_hex_device_id() {
        let a = StaticHostInfo::new("app");
        let b = StaticHostInfo::new("app");
        assert_eq!(a.device_id.len(), 32);
        assert!(a.device_id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a.device_id, b.device_id);
        assert!(a.device_model.contains(std::env::consts::OS));
    }

    #[test]
    fn test_connection_info_echoes_request_id() {
        let host = StaticHostInfo::new("Sandbox");
        let info = host.connection_info(42);
        assert_eq!(info.request_id, 42);
        assert_eq!(info.application_name, "Sandbox");
        assert_eq!(info.device_id, host.device_id);
    }

    #[test]
    fn test_fs_store_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FsFileStore::new(RootedDirectories::new(tmp.path()));

        let size = store
            .write(DirectoryKind::PersistentData, "notes.txt", b"hello")
            .unwrap();
        assert_eq!(size, 5);
        std::fs::create_dir_all(tmp.path().join("persistent-data/sub")).unwrap();

        let listing = store.list(DirectoryKind::PersistentData, "").unwrap();
        assert_eq!(listing.files, vec!["notes.txt"]);
        assert_eq!(listing.directories, vec!["sub"]);

        let data = store.read(DirectoryKind::PersistentData, "notes.txt").unwrap();
        assert_eq!(data, b"hello");
    }

    #[test]
    fn test_fs_store_missing_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FsFileStore::new(RootedDirectories::new(tmp.path()));
        let err = store.list(DirectoryKind::Data, "nope").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_fs_store_refuses_escaping_paths() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FsFileStore::new(RootedDirectories::new(tmp.path()));
        let err = store.read(DirectoryKind::Data, "../secret").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::PermissionDenied);
        assert!(store.read(DirectoryKind::Data, "/etc/passwd").is_err());
    }

    #[test]
    fn test_directory_downloads_saves_file() {
        let tmp = tempfile::tempdir().unwrap();
        let sink = DirectoryDownloads::new(tmp.path().join("downloads"));
        let path = sink.save("a.bin", &[1, 2, 3]).unwrap();
        assert_eq!(std::fs::read(path).unwrap(), vec![1, 2, 3]);
    }
}
