//! Error types shared by the node, the transports and the vanish layer.

use thiserror::Error;

use crate::key::Key;

#[derive(Debug, Error)]
pub enum Error {
    /// A contact or a value is not known.
    #[error("Not found: {0:?}")]
    NotFound(Key),

    /// The remote call did not complete.
    #[error("Transport failure: {0}")]
    Transport(String),

    /// The response did not match the request it answers.
    #[error("Malformed message: {0}")]
    Malformed(String),

    /// The remote node answered with an error.
    #[error("Remote error: {0}")]
    Remote(String),

    /// Fewer shares than the threshold could be reached.
    #[error("Insufficient shares: found {found} of {threshold}")]
    InsufficientShares { found: usize, threshold: usize },

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),
}

impl Error {
    /// Returns `true` if the error means the peer should be dropped from consideration.
    pub fn is_unreachable(&self) -> bool {
        match self {
            Error::Transport(_) | Error::Malformed(_) => true,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
