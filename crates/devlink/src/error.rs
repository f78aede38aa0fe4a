//! Unified error type for devlink.

use devlink_protocol::RegistryError;
use devlink_transport::TransportError;

/// Errors that stop a server or client from starting or running.
///
/// Per-frame and per-message failures never surface here; they are logged
/// and the frame or message is dropped. The `#[from]` attributes let `?`
/// lift sub-crate errors directly.
#[derive(Debug, thiserror::Error)]
pub enum DevlinkError {
    /// Binding, accepting, or dialing failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The built-in variant table is inconsistent.
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_transport_error() {
        let err: DevlinkError = TransportError::ConnectionClosed("gone".into()).into();
        assert!(matches!(err, DevlinkError::Transport(_)));
        assert!(err.to_string().contains("gone"));
    }

    #[test]
    fn test_from_registry_error() {
        let err: DevlinkError = RegistryError::DuplicateTag("Text").into();
        assert!(matches!(err, DevlinkError::Registry(_)));
        assert!(err.to_string().contains("Text"));
    }
}
