use std::fmt;

/// Lifecycle of the single active session.
///
/// `Disconnected → Connecting → Open → Disconnected`. A session reaches
/// `Open` only once the transport reports it open. Replacing a session
/// goes back through `Disconnected` before the new one is `Connecting`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Open,
}

impl ConnectionState {
    pub fn is_open(self) -> bool {
        self == Self::Open
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Open => "open",
        })
    }
}
