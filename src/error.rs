use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Failure taxonomy for the chat core.
///
/// `Connectivity` and `Generation` are deliberately distinct so a caller can
/// tell "no connection" apart from "the backend rejected this generation".
#[derive(Debug, Error)]
pub enum Error {
    #[error("backend unreachable: {0}")]
    Connectivity(String),

    #[error("token counting failed: {0}")]
    Tokenization(String),

    #[error("generation failed: {0}")]
    Generation(String),

    #[error("image operation failed: {0}")]
    Image(String),

    #[error("a generation is already in progress")]
    Busy,

    #[error("malformed chat data: {0}")]
    InvalidChat(String),

    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("archive error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

impl Error {
    /// True when the failure means the backend could not be reached at all.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Error::Connectivity(_))
    }
}
