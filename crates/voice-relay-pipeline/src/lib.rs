//! The voice inference pipeline: speech-to-text, completion, text-to-speech.
//!
//! Each [`stage::Stage`] runs its provider chain under a deadline;
//! [`pipeline::InferencePipeline`] runs the three stages in order for one
//! request and carries the bounded conversation history between them.

pub mod error;
pub mod history;
pub mod pipeline;
pub mod stage;

pub use error::{FailureCategory, PipelineError};
pub use pipeline::{InferencePipeline, PipelineMetadata, PipelineRequest, PipelineResponse};
pub use stage::{Stage, StageOutcome, StageReport};
