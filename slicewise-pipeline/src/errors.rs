use slicewise_core::chat::{AttemptFailure, FailureKind};
use slicewise_core::errors::{GenerationError, SliceError, TokenizeError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransformError {
    #[error(transparent)]
    Slice(#[from] SliceError),

    #[error("Invalid content: {0}")]
    InvalidContent(String),

    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

impl TransformError {
    pub fn invalid_content(message: impl Into<String>) -> Self {
        TransformError::InvalidContent(message.into())
    }
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Maximum generation depth of {max_depth} exceeded")]
    DepthExceeded { max_depth: usize },

    #[error("Generation failed: {0}")]
    Generation(#[from] GenerationError),

    #[error("Transform {name} failed before generation: {source}")]
    PreTransform {
        name: String,
        source: TransformError,
    },

    #[error("Transform {name} failed after generation: {source}")]
    PostTransform {
        name: String,
        source: TransformError,
    },

    #[error("Callback failed: {0}")]
    Callback(anyhow::Error),

    #[error("Watcher failed: {0}")]
    Watcher(anyhow::Error),

    #[error(transparent)]
    Tokenize(#[from] TokenizeError),
}

impl PipelineError {
    /// Whether the batch fail mode applies to this error
    ///
    /// Only generation failures and the depth guard can be skipped or included; everything else
    /// is a bug in a transform, callback or watcher and is always raised.
    pub fn is_catchable(&self) -> bool {
        matches!(
            self,
            PipelineError::Generation(_) | PipelineError::DepthExceeded { .. }
        )
    }

    pub fn to_failure(&self) -> AttemptFailure {
        let kind = match self {
            PipelineError::Generation(_) => FailureKind::Generation,
            PipelineError::DepthExceeded { .. } => FailureKind::DepthExceeded,
            PipelineError::PreTransform { .. } | PipelineError::PostTransform { .. } => {
                FailureKind::Transform
            }
            _ => FailureKind::Other,
        };

        AttemptFailure {
            kind,
            message: self.to_string(),
        }
    }
}
