use std::io;

use thiserror::Error;

use crate::envelope::EnvelopeError;

/// Errors returned by [`crate::MessageStore`] and the message handles it
/// hands out.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error accessing the spool directory")]
    Io(#[from] io::Error),

    #[error("envelope is malformed")]
    Envelope(#[from] EnvelopeError),

    #[error("content exceeded the configured maximum size of {limit} bytes")]
    TooBig { limit: u64 },

    #[error("message {0} was not found in the spool")]
    NotFound(String),

    #[error("message {0} is locked by another process")]
    Locked(String),
}
