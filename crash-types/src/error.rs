use thiserror::Error;

/// Taxonomy of synchronous failures visible to callers of the core (§7).
///
/// Every variant carries a stable `code()` so the Facade can hand back a
/// `{ "code": ..., "message": ... }` body without inspecting the `Display`
/// text, which is free to change.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CoreError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    State(String),

    #[error("{0}")]
    Funds(String),

    #[error("infrastructure unavailable: {0}")]
    Infrastructure(String),
}

impl CoreError {
    pub fn validation(msg: impl Into<String>) -> Self {
        CoreError::Validation(msg.into())
    }

    pub fn state(msg: impl Into<String>) -> Self {
        CoreError::State(msg.into())
    }

    pub fn funds(msg: impl Into<String>) -> Self {
        CoreError::Funds(msg.into())
    }

    pub fn infrastructure(msg: impl Into<String>) -> Self {
        CoreError::Infrastructure(msg.into())
    }

    /// Stable machine-readable code, independent of the human message.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::Validation(_) => "validation_error",
            CoreError::State(_) => "invalid_state",
            CoreError::Funds(_) => "funds_error",
            CoreError::Infrastructure(_) => "infrastructure_unavailable",
        }
    }

    pub fn message(&self) -> String {
        self.to_string()
    }
}
