use std::path::PathBuf;

use thiserror::Error;

/// Result type used across the sender.
pub type Result<T> = std::result::Result<T, GrblError>;

#[derive(Error, Debug)]
pub enum GrblError {
    /// The serial link is not open, or writing to it failed.
    #[error("Link Error: {0}")]
    Link(String),

    /// A program source could not be read. The loaded program is left untouched.
    #[error("Cannot load program {path}: {source}")]
    Load {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Recovery unavailable: {0}")]
    RecoveryUnavailable(String),

    #[error("Serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A pending settings fetch was replaced by a newer one.
    #[error("Settings fetch superseded by a newer request")]
    FetchSuperseded,

    #[error("Sender worker is not running")]
    WorkerClosed,
}

impl GrblError {
    pub fn link(message: impl Into<String>) -> Self {
        GrblError::Link(message.into())
    }

    pub fn recovery_unavailable(reason: impl Into<String>) -> Self {
        GrblError::RecoveryUnavailable(reason.into())
    }

    pub fn is_link_error(&self) -> bool {
        matches!(self, GrblError::Link(_))
    }
}
