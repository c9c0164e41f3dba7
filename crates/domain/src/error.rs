/// Shared error type used across all Chimera crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("protocol: {0}")]
    Protocol(String),

    #[error("thread protocol version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: String, found: String },

    #[error("blueprint: {0}")]
    Blueprint(String),

    #[error("plugin {plugin}: {message}")]
    Plugin { plugin: String, message: String },

    #[error("model: {0}")]
    Model(String),

    #[error("tool not found: {0}")]
    ToolNotFound(String),

    #[error("invalid arguments for tool {tool}: {message}")]
    InvalidToolArgs { tool: String, message: String },

    #[error("execution cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// True when this error is a user-requested cancellation rather than a
    /// genuine failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}
