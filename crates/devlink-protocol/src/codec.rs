//! Envelope codec: [`Message`] ⇄ `tag,flag,payload` text frames.
//!
//! The payload is the Base64 of the variant's canonical JSON, or of its GZIP
//! stream when that is strictly smaller. The flag is `c` for compressed and
//! `-` otherwise. A variant whose canonical form is empty encodes as
//! `tag,-,`.
//!
//! Every call allocates its own buffers, so one [`EnvelopeCodec`] can be
//! shared by the receive task and the processing loop without locking.

use std::io::{Read, Write};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;

use crate::registry::TypeRegistry;
use crate::types::Message;
use crate::{DecodeError, EncodeError, RegistryError};

/// Flag marking a GZIP-compressed payload.
pub const FLAG_COMPRESSED: char = 'c';
/// Flag marking a raw payload.
pub const FLAG_RAW: char = '-';

/// Largest payload a compressed envelope may inflate to (64 MiB).
pub const MAX_INFLATED_LEN: u64 = 64 * 1024 * 1024;

/// Encodes and decodes envelopes against a fixed registry.
#[derive(Debug, Clone, Copy)]
pub struct EnvelopeCodec {
    registry: &'static TypeRegistry,
}

impl EnvelopeCodec {
    /// A codec that resolves tags through `registry`.
    pub fn new(registry: &'static TypeRegistry) -> Self {
        Self { registry }
    }

    /// A codec over [`TypeRegistry::builtin`].
    ///
    /// # Errors
    /// Returns the registry's integrity error if the built-in variant table
    /// is inconsistent.
    pub fn builtin() -> Result<Self, RegistryError> {
        TypeRegistry::builtin().map(Self::new)
    }

    /// The table this codec decodes against.
    pub fn registry(&self) -> &'static TypeRegistry {
        self.registry
    }

    /// Serializes `message` into one text frame.
    ///
    /// # Errors
    /// [`EncodeError::NonFinite`] if a float field is NaN or infinite,
    /// otherwise serializer or compressor failures.
    pub fn encode(&self, message: &Message) -> Result<String, EncodeError> {
        let tag = message.type_tag();
        if let Some(field) = non_finite_field(message) {
            return Err(EncodeError::NonFinite { tag, field });
        }
        let canonical = message.to_canonical().map_err(EncodeError::Serialize)?;
        if canonical.is_empty() {
            return Ok(format!("{tag},{FLAG_RAW},"));
        }

        let raw = canonical.as_bytes();
        let compressed = gzip(raw).map_err(EncodeError::Compress)?;
        let envelope = if compressed.len() < raw.len() {
            format!("{tag},{FLAG_COMPRESSED},{}", BASE64.encode(&compressed))
        } else {
            format!("{tag},{FLAG_RAW},{}", BASE64.encode(raw))
        };

        tracing::trace!(
            tag,
            raw_len = raw.len(),
            compressed_len = compressed.len(),
            frame_len = envelope.len(),
            "encoded envelope"
        );
        Ok(envelope)
    }

    /// Parses one text frame back into a [`Message`].
    ///
    /// Any flag starting with `c` means compressed; every other flag means
    /// raw. A compressed payload that inflates past [`MAX_INFLATED_LEN`]
    /// is rejected as [`DecodeError::Decompression`].
    pub fn decode(&self, frame: &str) -> Result<Message, DecodeError> {
        let (tag, rest) = frame
            .split_once(',')
            .ok_or_else(|| DecodeError::MalformedEnvelope("missing type separator".into()))?;

        let descriptor = self
            .registry
            .lookup(tag)
            .ok_or_else(|| DecodeError::UnknownType(tag.to_string()))?;

        let (flag, payload) = rest
            .split_once(',')
            .ok_or_else(|| DecodeError::MalformedEnvelope("missing flag separator".into()))?;
        let compressed = flag.starts_with(FLAG_COMPRESSED);

        let mut bytes = BASE64.decode(payload)?;
        if compressed {
            bytes = gunzip(&bytes).map_err(DecodeError::Decompression)?;
        }
        let canonical = String::from_utf8(bytes).map_err(|e| DecodeError::InvalidPayload {
            tag: descriptor.tag,
            reason: e.to_string(),
        })?;

        (descriptor.decode)(&canonical)
    }
}

/// First float field of `message` that has no JSON representation.
fn non_finite_field(message: &Message) -> Option<&'static str> {
    match message {
        Message::MoveObject(m) => [("x", m.x), ("y", m.y), ("z", m.z)]
            .into_iter()
            .find(|(_, v)| !v.is_finite())
            .map(|(field, _)| field),
        Message::ScreenshotRequest(m) if !m.interval.is_finite() => Some("interval"),
        _ => None,
    }
}

fn gzip(raw: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(raw.len() / 2), Compression::fast());
    encoder.write_all(raw)?;
    encoder.finish()
}

fn gunzip(compressed: &[u8]) -> std::io::Result<Vec<u8>> {
    gunzip_capped(compressed, MAX_INFLATED_LEN)
}

fn gunzip_capped(compressed: &[u8], limit: u64) -> std::io::Result<Vec<u8>> {
    let mut out = Vec::with_capacity(compressed.len() * 2);
    GzDecoder::new(compressed)
        .take(limit + 1)
        .read_to_end(&mut out)?;
    if out.len() as u64 > limit {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("payload inflates past {limit} bytes"),
        ));
    }
    Ok(out)
}
