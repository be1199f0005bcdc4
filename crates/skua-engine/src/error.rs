use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("temporary file allocation failed: {0}")]
    TempFile(String),

    #[error("control channel error: {0}")]
    Control(String),

    #[error("control channel timeout waiting for '{0}'")]
    ControlTimeout(String),

    #[error("hash pipeline disconnected")]
    HashPipeClosed,

    #[error("{0}")]
    Other(String),
}
