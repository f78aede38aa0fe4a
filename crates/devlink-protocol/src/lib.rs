//! Wire protocol for devlink.
//!
//! This crate defines what the application and the controller say to each
//! other:
//!
//! - **Types** ([`Message`], [`MessageKind`], the variant records) for the
//!   closed set of messages.
//! - **Registry** ([`TypeRegistry`]) which maps wire tags to variants.
//! - **Codec** ([`EnvelopeCodec`]) which turns messages into
//!   `tag,flag,payload` text frames and back.
//!
//! # Architecture
//!
//! The protocol layer sits between the transport (text frames) and the
//! dispatcher (typed handlers). It knows nothing about sockets or sessions.
//!
//! ```text
//! Transport (text) → Protocol (Message) → Dispatch (handler per kind)
//! ```

mod codec;
mod error;
mod ids;
mod registry;
mod types;

pub use codec::{EnvelopeCodec, FLAG_COMPRESSED, FLAG_RAW, MAX_INFLATED_LEN};
pub use error::{DecodeError, EncodeError, RegistryError};
pub use ids::RequestIds;
pub use registry::{DecodeFn, TypeRegistry, VariantDescriptor};
pub use types::{
    ConnectObjectRequest, ConnectionInfo, DirectoryKind, FileList, FileListRequest, FilePayload,
    FileUploadRequest, Goodbye, ImageData, LogLevel, LogRecord, Message, MessageKind, MoveObject,
    Request, Screenshot, ScreenshotRequest, TextNote, Variant,
};
