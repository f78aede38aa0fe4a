//! Error types for the protocol layer.
//!
//! Encoding and decoding each get their own enum so callers can tell a
//! frame they failed to produce from a frame they failed to understand.
//! Both are recoverable: the message or frame is dropped and the session
//! stays open. Only [`RegistryError`] is fatal, and only at startup.

/// Errors produced while turning a message into an envelope.
#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    /// The message fields could not be serialized.
    #[error("serialize failed: {0}")]
    Serialize(#[source] serde_json::Error),

    /// The GZIP stream could not be written.
    #[error("compress failed: {0}")]
    Compress(#[source] std::io::Error),

    /// A float field is NaN or infinite, which JSON cannot carry.
    #[error("{tag}.{field} is not a finite number")]
    NonFinite {
        /// Tag of the offending variant.
        tag: &'static str,
        /// Name of the offending field.
        field: &'static str,
    },
}

/// Errors produced while turning an envelope back into a message.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The frame is not `tag,flag,payload`.
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// The type tag is not in the registry.
    #[error("unknown message type: {0}")]
    UnknownType(String),

    /// The payload is valid JSON but does not match the variant's fields
    /// (missing, extra, or mistyped).
    #[error("{tag} payload does not match its schema: {reason}")]
    SchemaMismatch {
        /// Tag of the variant the payload was decoded against.
        tag: &'static str,
        /// What serde reported.
        reason: String,
    },

    /// The decoded payload is not UTF-8 JSON text at all.
    #[error("{tag} payload is not valid JSON text: {reason}")]
    InvalidPayload {
        /// Tag of the variant the payload was decoded against.
        tag: &'static str,
        /// What went wrong.
        reason: String,
    },

    /// The payload field is not valid Base64.
    #[error("payload is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    /// The flag said compressed but the bytes do not inflate.
    #[error("payload does not decompress: {0}")]
    Decompression(#[source] std::io::Error),
}

/// Integrity violations found while building a [`TypeRegistry`](crate::TypeRegistry).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// Two descriptors claim the same wire tag.
    #[error("duplicate message type tag: {0}")]
    DuplicateTag(&'static str),

    /// Two descriptors claim the same message kind.
    #[error("message kind {0} registered twice")]
    DuplicateKind(&'static str),
}
