// Typed rejections for chat operations

use thiserror::Error;

/// Why an inbound event was refused.
///
/// Every variant except `CorruptPayload` is reported privately to the
/// originating connection and leaves shared state untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChatError {
    #[error("Username cannot be empty.")]
    UsernameEmpty,

    #[error("Username already taken. Please choose another.")]
    UsernameTaken,

    #[error("Please set a username first.")]
    NotNamed,

    #[error("File size exceeds 10MB limit")]
    FileTooLarge { size: u64, limit: u64 },

    #[error("Only administrators can delete messages.")]
    NotAuthorized,

    #[error("Message {0} not found.")]
    MessageNotFound(u64),

    #[error("Attachment payload for file {0} is not valid base64")]
    CorruptPayload(String),
}

pub type ChatResult<T> = std::result::Result<T, ChatError>;
