//! Typed error hierarchy for the distill pipeline.
//!
//! Two top-level enums cover the two fault domains:
//! - `BackendError` — faults raised by the generation backend call itself
//! - `PipelineError` — faults that terminate a pipeline run
//!
//! There is deliberately no "extraction error": a response that yields no
//! recoverable structure is absorbed by the stage's degraded fallback and
//! never terminates a run.

use thiserror::Error;

use crate::stage::StageId;

/// Faults raised by the generation backend call.
#[derive(Debug, Error)]
pub enum BackendError {
    /// Network-level failure reaching the backend.
    #[error("Backend transport error: {message}")]
    Transport { message: String },

    /// The backend answered with a non-success HTTP status.
    #[error("Backend returned HTTP {status}: {message}")]
    Api { status: u16, message: String },

    /// The response body itself encodes an error envelope, or was not the
    /// wire format at all.
    #[error("Backend reported an error: {message}")]
    Content { message: String },
}

/// Faults that terminate a pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("Failed to persist {stage} result: {source}")]
    Persistence {
        stage: StageId,
        #[source]
        source: anyhow::Error,
    },

    #[error("Access denied: {reason}")]
    AccessDenied { reason: String },

    #[error("Session {id} not found")]
    SessionNotFound { id: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
