use thiserror::Error;

pub type BoxedError = Box<dyn std::error::Error + Send + Sync>;

/// A slice boundary or an edit is invalid for the content it applies to
///
/// Never recovered by clamping; the operation that produced it fails.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SliceError {
    #[error("range {start}..{end} is invalid for content of length {len}")]
    Range { start: usize, end: usize, len: usize },

    #[error("offset {0} is not on a char boundary")]
    CharBoundary(usize),

    #[error("edit {0} overlaps or precedes the previous edit")]
    UnorderedEdits(usize),

    #[error("edits produce content of length {expected}, but the new content has length {actual}")]
    EditMismatch { expected: usize, actual: usize },
}

/// Errors from the generation service
#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("Context length exceeded: {0}")]
    ContextLengthExceeded(BoxedError),

    #[error("Transient error: {0}")]
    TransientError(BoxedError),

    #[error("Permanent error: {0}")]
    PermanentError(BoxedError),
}

impl GenerationError {
    pub fn permanent(e: impl Into<BoxedError>) -> Self {
        GenerationError::PermanentError(e.into())
    }

    pub fn transient(e: impl Into<BoxedError>) -> Self {
        GenerationError::TransientError(e.into())
    }

    pub fn context_length_exceeded(e: impl Into<BoxedError>) -> Self {
        GenerationError::ContextLengthExceeded(e.into())
    }
}

impl From<anyhow::Error> for GenerationError {
    fn from(e: anyhow::Error) -> Self {
        GenerationError::PermanentError(e.into())
    }
}

/// Errors while rendering a conversation to text
#[derive(Error, Debug)]
pub enum FormatError {
    #[error("message {index} rendered out of order, expected a message after {previous}")]
    OutOfOrder { index: usize, previous: usize },

    #[error("message {index} does not exist in a conversation of {len} messages")]
    UnknownMessage { index: usize, len: usize },

    #[error(transparent)]
    Slice(#[from] SliceError),

    #[error("Failed to format conversation: {0}")]
    Failed(#[from] anyhow::Error),
}

/// Errors while tokenizing a conversation
#[derive(Error, Debug)]
pub enum TokenizeError {
    #[error(transparent)]
    Format(#[from] FormatError),

    #[error("Failed to encode text: {0}")]
    Encode(anyhow::Error),

    #[error("Failed to decode tokens: {0}")]
    Decode(anyhow::Error),

    #[error(transparent)]
    Slice(#[from] SliceError),
}
