use std::time::Duration;

use thiserror::Error;

use voice_relay_core::error::ProviderError;
use voice_relay_media::AudioRejection;
use voice_relay_providers::ServiceType;

/// Failure of one pipeline request.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Malformed or missing input. Never sent to a provider.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("payload too large: {size} bytes exceeds limit of {limit} bytes")]
    PayloadTooLarge { size: usize, limit: usize },

    /// Every candidate of a stage failed. `source` is the primary's error.
    #[error("{stage} stage failed: {source}")]
    StageFailed {
        stage: ServiceType,
        retryable: bool,
        #[source]
        source: ProviderError,
    },

    #[error("{stage} stage timed out after {}s", .deadline.as_secs_f64())]
    StageTimeout { stage: ServiceType, deadline: Duration },

    /// A stage succeeded at the transport level but produced nothing usable.
    #[error("{stage} stage returned an empty result")]
    EmptyResult { stage: ServiceType },

    #[error("internal pipeline error: {0}")]
    Internal(String),
}

/// Coarse failure classes, used by callers to pick user-facing fallback text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureCategory {
    /// Client sent something unusable; ask again.
    Input,
    /// Could not hear the user.
    SpeechRecognition,
    /// Could not produce an answer.
    Completion,
    /// Have an answer but could not voice it; show text instead.
    Synthesis,
    Timeout,
    Internal,
}

impl PipelineError {
    pub fn stage(&self) -> Option<ServiceType> {
        match self {
            Self::StageFailed { stage, .. }
            | Self::StageTimeout { stage, .. }
            | Self::EmptyResult { stage } => Some(*stage),
            _ => None,
        }
    }

    pub fn category(&self) -> FailureCategory {
        match self {
            Self::InvalidInput(_) | Self::PayloadTooLarge { .. } => FailureCategory::Input,
            Self::StageTimeout { .. } => FailureCategory::Timeout,
            Self::Internal(_) => FailureCategory::Internal,
            Self::StageFailed { stage, .. } | Self::EmptyResult { stage } => match stage {
                ServiceType::Stt => FailureCategory::SpeechRecognition,
                ServiceType::Ai => FailureCategory::Completion,
                ServiceType::Tts => FailureCategory::Synthesis,
            },
        }
    }

    /// Short label used for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::PayloadTooLarge { .. } => "payload_too_large",
            Self::StageFailed { .. } => "stage_failed",
            Self::StageTimeout { .. } => "stage_timeout",
            Self::EmptyResult { .. } => "empty_result",
            Self::Internal(_) => "internal",
        }
    }
}

impl From<AudioRejection> for PipelineError {
    fn from(rejection: AudioRejection) -> Self {
        match rejection {
            AudioRejection::TooLarge { size, limit } => Self::PayloadTooLarge { size, limit },
            other => Self::InvalidInput(other.to_string()),
        }
    }
}
