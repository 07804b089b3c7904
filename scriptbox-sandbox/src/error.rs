use thiserror::Error;

/// Error taxonomy for script execution
#[derive(Error, Debug)]
pub enum SandboxError {
    /// Static analysis rejected the script; nothing was spawned
    #[error("Security validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    /// Malformed session id or key, rejected before touching the filesystem
    #[error("Invalid identifier: {0}")]
    Identifier(String),

    #[error("Execution timed out after {0} seconds")]
    Timeout(u64),

    /// Error raised by the script itself
    #[error("Script error: {0}")]
    Runtime(String),

    /// The child died before writing its result record
    #[error("Sandbox process ended without a result: {0}")]
    ResultProtocol(String),

    #[error("Failed to collect artifact '{name}': {reason}")]
    ArtifactCollection { name: String, reason: String },

    #[error("Path escapes its base directory: {0}")]
    PathEscape(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type SandboxResult<T> = Result<T, SandboxError>;
