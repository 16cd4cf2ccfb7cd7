//! Errors surfaced by the pipeline components.

use thiserror::Error;

/// How an error should be treated by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Worth another attempt after backoff.
    Transient,
    /// Retrying will not help.
    Terminal,
    /// The component is not configured to do this at all.
    Configuration,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("An active download job already exists for video {video_id}")]
    DuplicateJob { video_id: String },

    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error("Durable storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Store error: {0}")]
    Store(#[from] anyhow::Error),
}

impl PipelineError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            PipelineError::StorageUnavailable(_) | PipelineError::Store(_) => ErrorClass::Transient,
            PipelineError::Configuration(_) => ErrorClass::Configuration,
            PipelineError::DuplicateJob { .. }
            | PipelineError::InvalidSchedule(_)
            | PipelineError::NotFound { .. }
            | PipelineError::InvalidState(_) => ErrorClass::Terminal,
        }
    }
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
