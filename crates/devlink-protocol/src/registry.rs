//! The closed tag → variant mapping used to resolve incoming envelopes.
//!
//! The registry is built once from a descriptor list and never mutated.
//! [`TypeRegistry::builtin`] holds the process-wide instance for the
//! protocol's own variants; a duplicate tag there is an integrity failure
//! that callers surface at startup instead of at the first bad frame.

use std::collections::HashMap;
use std::sync::OnceLock;

use crate::types::{
    ConnectObjectRequest, ConnectionInfo, FileList, FileListRequest, FilePayload,
    FileUploadRequest, Goodbye, ImageData, LogRecord, Message, MessageKind, MoveObject, Request,
    Screenshot, ScreenshotRequest, TextNote, Variant,
};
use crate::{DecodeError, RegistryError};

/// Turns the canonical text of one variant into a [`Message`].
pub type DecodeFn = fn(&str) -> Result<Message, DecodeError>;

/// Everything the codec needs to know about one variant.
#[derive(Debug, Clone, Copy)]
pub struct VariantDescriptor {
    pub kind: MessageKind,
    /// Wire tag, the first envelope field.
    pub tag: &'static str,
    /// Field names in canonical order.
    pub fields: &'static [&'static str],
    /// Parses canonical text into this variant.
    pub decode: DecodeFn,
}

impl VariantDescriptor {
    /// Describes `V` under its own tag.
    pub fn of<V: Variant>() -> Self {
        Self {
            kind: V::KIND,
            tag: V::KIND.tag(),
            fields: V::FIELDS,
            decode: decode_as::<V>,
        }
    }
}

fn decode_as<V: Variant>(canonical: &str) -> Result<Message, DecodeError> {
    let tag = V::KIND.tag();
    V::from_canonical(canonical).map(Into::into).map_err(|e| {
        // An empty payload for a record variant means every field is missing.
        if e.is_data() || canonical.trim().is_empty() {
            DecodeError::SchemaMismatch {
                tag,
                reason: e.to_string(),
            }
        } else {
            DecodeError::InvalidPayload {
                tag,
                reason: e.to_string(),
            }
        }
    })
}

/// Immutable tag → descriptor map.
#[derive(Debug)]
pub struct TypeRegistry {
    by_tag: HashMap<&'static str, VariantDescriptor>,
    by_kind: HashMap<MessageKind, VariantDescriptor>,
}

impl TypeRegistry {
    /// Builds a registry, rejecting duplicate tags or kinds.
    pub fn new(
        descriptors: impl IntoIterator<Item = VariantDescriptor>,
    ) -> Result<Self, RegistryError> {
        let mut by_tag = HashMap::new();
        let mut by_kind = HashMap::new();
        for descriptor in descriptors {
            if by_tag.insert(descriptor.tag, descriptor).is_some() {
                return Err(RegistryError::DuplicateTag(descriptor.tag));
            }
            if by_kind.insert(descriptor.kind, descriptor).is_some() {
                return Err(RegistryError::DuplicateKind(descriptor.kind.tag()));
            }
        }
        Ok(Self { by_tag, by_kind })
    }

    /// Descriptors for every built-in variant, in [`MessageKind::ALL`] order.
    pub fn builtin_descriptors() -> Vec<VariantDescriptor> {
        vec![
            VariantDescriptor::of::<TextNote>(),
            VariantDescriptor::of::<Request>(),
            VariantDescriptor::of::<ConnectionInfo>(),
            VariantDescriptor::of::<ScreenshotRequest>(),
            VariantDescriptor::of::<FileListRequest>(),
            VariantDescriptor::of::<FileList>(),
            VariantDescriptor::of::<FileUploadRequest>(),
            VariantDescriptor::of::<FilePayload>(),
            VariantDescriptor::of::<ConnectObjectRequest>(),
            VariantDescriptor::of::<ImageData>(),
            VariantDescriptor::of::<Screenshot>(),
            VariantDescriptor::of::<MoveObject>(),
            VariantDescriptor::of::<LogRecord>(),
            VariantDescriptor::of::<Goodbye>(),
        ]
    }

    /// The process-wide registry of built-in variants, built on first use.
    pub fn builtin() -> Result<&'static TypeRegistry, RegistryError> {
        static BUILTIN: OnceLock<Result<TypeRegistry, RegistryError>> = OnceLock::new();
        BUILTIN
            .get_or_init(|| TypeRegistry::new(Self::builtin_descriptors()))
            .as_ref()
            .map_err(Clone::clone)
    }

    /// Looks up a wire tag.
    pub fn lookup(&self, tag: &str) -> Option<&VariantDescriptor> {
        self.by_tag.get(tag)
    }

    /// Looks up the descriptor of a kind.
    pub fn descriptor(&self, kind: MessageKind) -> Option<&VariantDescriptor> {
        self.by_kind.get(&kind)
    }

    /// Whether `tag` names a registered variant.
    pub fn contains(&self, tag: &str) -> bool {
        self.by_tag.contains_key(tag)
    }

    /// All registered tags, sorted.
    pub fn tags(&self) -> Vec<&'static str> {
        let mut tags: Vec<_> = self.by_tag.keys().copied().collect();
        tags.sort_unstable();
        tags
    }

    /// Number of registered variants.
    pub fn len(&self) -> usize {
        self.by_tag.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_tag.is_empty()
    }
}
