//! Message variants that travel inside an envelope.
//!
//! Every variant is a plain record struct with public fields. The closed
//! [`Message`] enum wraps them, and the field-less [`MessageKind`] mirrors
//! it so handler tables and the registry can be keyed without a payload.
//!
//! Field order matters: the canonical serialized form is a compact JSON
//! object whose members appear in declaration order, and each variant's
//! [`Variant::FIELDS`] lists that same order.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Enumerated field types
// ---------------------------------------------------------------------------

/// A logical storage root on the application host.
///
/// The protocol only carries the kind; the host decides which real
/// directory each kind maps to. On the wire it is a bare integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum DirectoryKind {
    /// Read-only application data.
    Data,
    /// Assets shipped alongside the application.
    StreamingAssets,
    /// Data that survives restarts and updates.
    PersistentData,
    /// Scratch space the OS may purge.
    TemporaryCache,
}

impl DirectoryKind {
    /// All kinds, in wire order.
    pub const ALL: [DirectoryKind; 4] = [
        DirectoryKind::Data,
        DirectoryKind::StreamingAssets,
        DirectoryKind::PersistentData,
        DirectoryKind::TemporaryCache,
    ];
}

impl TryFrom<i32> for DirectoryKind {
    type Error = String;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Data),
            1 => Ok(Self::StreamingAssets),
            2 => Ok(Self::PersistentData),
            3 => Ok(Self::TemporaryCache),
            other => Err(format!("unknown directory kind {other}")),
        }
    }
}

impl From<DirectoryKind> for i32 {
    fn from(kind: DirectoryKind) -> Self {
        match kind {
            DirectoryKind::Data => 0,
            DirectoryKind::StreamingAssets => 1,
            DirectoryKind::PersistentData => 2,
            DirectoryKind::TemporaryCache => 3,
        }
    }
}

impl fmt::Display for DirectoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Data => "data",
            Self::StreamingAssets => "streaming-assets",
            Self::PersistentData => "persistent-data",
            Self::TemporaryCache => "temporary-cache",
        };
        f.write_str(name)
    }
}

/// Severity of a forwarded log line. Serialized as its integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum LogLevel {
    Error,
    Assert,
    Warning,
    Log,
    Exception,
}

impl TryFrom<i32> for LogLevel {
    type Error = String;

    fn try_from(value: i32) -> Result<Self, String> {
        match value {
            0 => Ok(LogLevel::Error),
            1 => Ok(LogLevel::Assert),
            2 => Ok(LogLevel::Warning),
            3 => Ok(LogLevel::Log),
            4 => Ok(LogLevel::Exception),
            other => Err(format!("unknown log level {other}")),
        }
    }
}

impl From<LogLevel> for i32 {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => 0,
            LogLevel::Assert => 1,
            LogLevel::Warning => 2,
            LogLevel::Log => 3,
            LogLevel::Exception => 4,
        }
    }
}

// ---------------------------------------------------------------------------
// Binary fields
// ---------------------------------------------------------------------------

/// Serde adapter that carries raw bytes as standard Base64 text.
mod base64_text {
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD as BASE64;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        BASE64
            .decode(text.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Variant records
// ---------------------------------------------------------------------------

/// A free-form note shown by the receiving side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TextNote {
    pub text: String,
}

/// A generic request naming what the sender wants.
///
/// The application answers `request == "ConnectionInfo"` with a
/// [`ConnectionInfo`] carrying the same `request_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Request {
    pub request: String,
    pub request_id: i32,
}

impl Request {
    /// Sub-request name asking for a [`ConnectionInfo`] reply.
    pub const CONNECTION_INFO: &'static str = "ConnectionInfo";

    pub fn new(request: impl Into<String>, request_id: i32) -> Self {
        Self {
            request: request.into(),
            request_id,
        }
    }
}

/// Identity of the peer: which application runs on which device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectionInfo {
    pub request_id: i32,
    pub application_name: String,
    pub device_id: String,
    pub device_name: String,
    pub device_model: String,
}

/// Starts or stops screenshot capture.
///
/// `interval` is in seconds; zero or negative asks for a single shot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScreenshotRequest {
    pub request_id: i32,
    pub stop: bool,
    pub interval: f32,
}

impl ScreenshotRequest {
    pub fn start(request_id: i32, interval: f32) -> Self {
        Self {
            request_id,
            stop: false,
            interval,
        }
    }

    pub fn stop(request_id: i32) -> Self {
        Self {
            request_id,
            stop: true,
            interval: -1.0,
        }
    }

    /// Whether the request asks for a repeating capture.
    pub fn is_repeating(&self) -> bool {
        !self.stop && self.interval > 0.0
    }
}

/// Asks for the entries of a directory below a storage root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileListRequest {
    pub request_id: i32,
    pub directory: DirectoryKind,
    pub path: String,
}

/// Reply to [`FileListRequest`]: plain names, not full paths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileList {
    pub request_id: i32,
    pub directory: DirectoryKind,
    pub path: String,
    pub files: Vec<String>,
    pub directories: Vec<String>,
}

/// Asks the application to send one file back as a [`FilePayload`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileUploadRequest {
    pub request_id: i32,
    pub directory: DirectoryKind,
    pub path: String,
}

/// File contents in either direction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilePayload {
    pub request_id: i32,
    pub directory: DirectoryKind,
    pub path: String,
    #[serde(with = "base64_text")]
    pub data: Vec<u8>,
}

impl FilePayload {
    /// The last `/`-separated segment of `path`.
    pub fn file_name(&self) -> &str {
        match self.path.rfind('/') {
            Some(index) => &self.path[index + 1..],
            None => &self.path,
        }
    }
}

/// Asks the application to select a scene object by name as the target
/// of later [`MoveObject`] messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectObjectRequest {
    pub request_id: i32,
    pub object_name: String,
}

/// An encoded image (PNG in practice).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ImageData {
    #[serde(with = "base64_text")]
    pub image: Vec<u8>,
}

/// An image captured in answer to a [`ScreenshotRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Screenshot {
    pub request_id: i32,
    /// Capture time, `YYYY/MM/DD hh:mm:ss`.
    pub timestamp: String,
    #[serde(with = "base64_text")]
    pub image: Vec<u8>,
}

/// Moves the selected scene object by a relative offset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MoveObject {
    /// Correlation id of the [`ConnectObjectRequest`] that selected it.
    pub target: i32,
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

/// One log line streamed from the application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LogRecord {
    pub level: LogLevel,
    /// Wall-clock time, `hh:mm:ss`.
    pub timestamp: String,
    pub text: String,
    pub stack: String,
}

/// Sent before an orderly close. Carries nothing, so its payload is empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Goodbye;

// ---------------------------------------------------------------------------
// Kinds and the closed message set
// ---------------------------------------------------------------------------

/// Field-less identity of each [`Message`] variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MessageKind {
    Text,
    Request,
    ConnectionInfo,
    ScreenshotRequest,
    FileListRequest,
    FileList,
    FileUploadRequest,
    File,
    ConnectObjectRequest,
    ImageData,
    Screenshot,
    MoveObject,
    Log,
    Goodbye,
}

impl MessageKind {
    /// Every kind, in registry order.
    pub const ALL: [MessageKind; 14] = [
        MessageKind::Text,
        MessageKind::Request,
        MessageKind::ConnectionInfo,
        MessageKind::ScreenshotRequest,
        MessageKind::FileListRequest,
        MessageKind::FileList,
        MessageKind::FileUploadRequest,
        MessageKind::File,
        MessageKind::ConnectObjectRequest,
        MessageKind::ImageData,
        MessageKind::Screenshot,
        MessageKind::MoveObject,
        MessageKind::Log,
        MessageKind::Goodbye,
    ];

    /// The wire tag of this kind.
    pub const fn tag(self) -> &'static str {
        match self {
            Self::Text => "Text",
            Self::Request => "Request",
            Self::ConnectionInfo => "ConnectionInfo",
            Self::ScreenshotRequest => "ScreenshotRequest",
            Self::FileListRequest => "FileListRequest",
            Self::FileList => "FileList",
            Self::FileUploadRequest => "FileUploadRequest",
            Self::File => "File",
            Self::ConnectObjectRequest => "ConnectObjectRequest",
            Self::ImageData => "ImageData",
            Self::Screenshot => "Screenshot",
            Self::MoveObject => "MoveObject",
            Self::Log => "Log",
            Self::Goodbye => "Goodbye",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// One message of the closed protocol set.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Text(TextNote),
    Request(Request),
    ConnectionInfo(ConnectionInfo),
    ScreenshotRequest(ScreenshotRequest),
    FileListRequest(FileListRequest),
    FileList(FileList),
    FileUploadRequest(FileUploadRequest),
    File(FilePayload),
    ConnectObjectRequest(ConnectObjectRequest),
    ImageData(ImageData),
    Screenshot(Screenshot),
    MoveObject(MoveObject),
    Log(LogRecord),
    Goodbye(Goodbye),
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Text(_) => MessageKind::Text,
            Self::Request(_) => MessageKind::Request,
            Self::ConnectionInfo(_) => MessageKind::ConnectionInfo,
            Self::ScreenshotRequest(_) => MessageKind::ScreenshotRequest,
            Self::FileListRequest(_) => MessageKind::FileListRequest,
            Self::FileList(_) => MessageKind::FileList,
            Self::FileUploadRequest(_) => MessageKind::FileUploadRequest,
            Self::File(_) => MessageKind::File,
            Self::ConnectObjectRequest(_) => MessageKind::ConnectObjectRequest,
            Self::ImageData(_) => MessageKind::ImageData,
            Self::Screenshot(_) => MessageKind::Screenshot,
            Self::MoveObject(_) => MessageKind::MoveObject,
            Self::Log(_) => MessageKind::Log,
            Self::Goodbye(_) => MessageKind::Goodbye,
        }
    }

    /// The wire tag, fixed by the variant.
    pub fn type_tag(&self) -> &'static str {
        self.kind().tag()
    }

    /// Serializes the fields into the canonical text form.
    pub fn to_canonical(&self) -> Result<String, serde_json::Error> {
        match self {
            Self::Text(m) => m.to_canonical(),
            Self::Request(m) => m.to_canonical(),
            Self::ConnectionInfo(m) => m.to_canonical(),
            Self::ScreenshotRequest(m) => m.to_canonical(),
            Self::FileListRequest(m) => m.to_canonical(),
            Self::FileList(m) => m.to_canonical(),
            Self::FileUploadRequest(m) => m.to_canonical(),
            Self::File(m) => m.to_canonical(),
            Self::ConnectObjectRequest(m) => m.to_canonical(),
            Self::ImageData(m) => m.to_canonical(),
            Self::Screenshot(m) => m.to_canonical(),
            Self::MoveObject(m) => m.to_canonical(),
            Self::Log(m) => m.to_canonical(),
            Self::Goodbye(m) => m.to_canonical(),
        }
    }
}

// ---------------------------------------------------------------------------
// Variant trait
// ---------------------------------------------------------------------------

/// Ties a record struct to its place in the closed set.
///
/// Implemented for every variant struct; used by the registry to build
/// decoders and by the dispatcher to offer typed handler registration.
pub trait Variant: Sized + Serialize + DeserializeOwned + Into<Message> + Send + 'static {
    /// The kind this struct represents.
    const KIND: MessageKind;

    /// Serialized field names, in canonical order.
    const FIELDS: &'static [&'static str];

    /// Unwraps the struct if `message` is this variant.
    fn from_message(message: Message) -> Option<Self>;

    /// Canonical text form of the fields.
    fn to_canonical(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parses the canonical text form.
    fn from_canonical(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

macro_rules! record_variant {
    ($ty:ident, $kind:ident, [$($field:literal),* $(,)?]) => {
        impl Variant for $ty {
            const KIND: MessageKind = MessageKind::$kind;
            const FIELDS: &'static [&'static str] = &[$($field),*];

            fn from_message(message: Message) -> Option<Self> {
                match message {
                    Message::$kind(inner) => Some(inner),
                    _ => None,
                }
            }
        }

        impl From<$ty> for Message {
            fn from(inner: $ty) -> Self {
                Message::$kind(inner)
            }
        }
    };
}

record_variant!(TextNote, Text, ["text"]);
record_variant!(Request, Request, ["request", "request_id"]);
record_variant!(
    ConnectionInfo,
    ConnectionInfo,
    ["request_id", "application_name", "device_id", "device_name", "device_model"]
);
record_variant!(ScreenshotRequest, ScreenshotRequest, ["request_id", "stop", "interval"]);
record_variant!(FileListRequest, FileListRequest, ["request_id", "directory", "path"]);
record_variant!(
    FileList,
    FileList,
    ["request_id", "directory", "path", "files", "directories"]
);
record_variant!(FileUploadRequest, FileUploadRequest, ["request_id", "directory", "path"]);
record_variant!(FilePayload, File, ["request_id", "directory", "path", "data"]);
record_variant!(ConnectObjectRequest, ConnectObjectRequest, ["request_id", "object_name"]);
record_variant!(ImageData, ImageData, ["image"]);
record_variant!(Screenshot, Screenshot, ["request_id", "timestamp", "image"]);
record_variant!(MoveObject, MoveObject, ["target", "x", "y", "z"]);
record_variant!(LogRecord, Log, ["level", "timestamp", "text", "stack"]);

impl Variant for Goodbye {
    const KIND: MessageKind = MessageKind::Goodbye;
    const FIELDS: &'static [&'static str] = &[];

    fn from_message(message: Message) -> Option<Self> {
        match message {
            Message::Goodbye(inner) => Some(inner),
            _ => None,
        }
    }

    fn to_canonical(&self) -> Result<String, serde_json::Error> {
        Ok(String::new())
    }

    fn from_canonical(text: &str) -> Result<Self, serde_json::Error> {
        if text.is_empty() {
            Ok(Goodbye)
        } else {
            Err(<serde_json::Error as serde::de::Error>::custom(
                "Goodbye carries no fields",
            ))
        }
    }
}

impl From<Goodbye> for Message {
    fn from(inner: Goodbye) -> Self {
        Message::Goodbye(inner)
    }
}

// =========================================================================
// Tests
// =========================================================================
