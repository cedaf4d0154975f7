//! Error types for chatline-session

use thiserror::Error;

/// Result type alias using chatline-session Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during session operations
#[derive(Error, Debug)]
pub enum Error {
    /// An error from the backend client
    #[error(transparent)]
    Client(#[from] chatline_client::Error),

    /// Submit with blank text and no attachment
    #[error("Message is empty")]
    EmptyMessage,

    /// A send is already outstanding in this conversation
    #[error("A message is already being sent in this conversation")]
    SendInFlight,

    /// No conversation has been opened
    #[error("No conversation is open")]
    NoActiveConversation,
}

impl Error {
    /// Whether a submit was refused before anything was sent.
    /// Rejections leave the transcript untouched.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Error::EmptyMessage | Error::SendInFlight | Error::NoActiveConversation
        )
    }
}
