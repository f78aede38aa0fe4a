/// Failure of a single handler invocation.
///
/// Never fatal: the dispatcher logs it, counts it, and moves on to the next
/// message.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// The handler could not complete its effect.
    #[error("{0}")]
    Failed(String),

    /// Something the message refers to does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl HandlerError {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed(reason.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }
}
