//! Error taxonomy for the answer pipeline.
//!
//! | Variant | Recovery |
//! |---------|----------|
//! | [`InvalidInput`](PipelineError::InvalidInput) | Surfaced to the caller as a client error |
//! | [`UpstreamDegraded`](PipelineError::UpstreamDegraded) | Logged; the strategy contributes no matches |
//! | [`GenerationFailure`](PipelineError::GenerationFailure) | Fatal to the request |
//! | [`PersistenceFailure`](PipelineError::PersistenceFailure) | Logged and swallowed |

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("{stage} unavailable: {source}")]
    UpstreamDegraded {
        stage: &'static str,
        #[source]
        source: anyhow::Error,
    },
    #[error("generation failed: {0}")]
    GenerationFailure(#[source] anyhow::Error),
    #[error("persistence failed: {0}")]
    PersistenceFailure(#[source] anyhow::Error),
}

impl PipelineError {
    pub fn invalid(message: impl Into<String>) -> Self {
        PipelineError::InvalidInput(message.into())
    }

    pub fn degraded(stage: &'static str, source: anyhow::Error) -> Self {
        PipelineError::UpstreamDegraded { stage, source }
    }

    /// Machine-readable code used in HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::InvalidInput(_) => "bad_request",
            PipelineError::GenerationFailure(_) => "generation_failed",
            PipelineError::UpstreamDegraded { .. } | PipelineError::PersistenceFailure(_) => {
                "internal"
            }
        }
    }
}
