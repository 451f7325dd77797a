use thiserror::Error;

pub type Result<T> = std::result::Result<T, SandboxError>;

/// Error taxonomy for the sandbox.
///
/// `Parse` and `Runtime` are turn-scoped: the session loop converts them
/// into a diagnostic for the current input unit and keeps the session
/// open with bindings unchanged. Nothing here is fatal to the process.
#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("syntax error at line {line}, offset {offset}: {message}")]
    Parse {
        line: usize,
        offset: usize,
        message: String,
    },

    #[error("runtime error during execution: {0}")]
    Runtime(String),

    #[error("invalid configuration: {0}")]
    BadConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SandboxError {
    /// True for faults that terminate only the current turn.
    pub fn is_turn_scoped(&self) -> bool {
        matches!(self, SandboxError::Parse { .. } | SandboxError::Runtime(_))
    }
}
