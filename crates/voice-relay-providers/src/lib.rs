//! Speech and completion provider abstraction.
//!
//! Each backend implements one of [`SpeechToTextProvider`],
//! [`CompletionProvider`] or [`TextToSpeechProvider`]. Calls are made
//! resilient by composing [`retry::RetryExecutor`] (same provider, again)
//! with [`failover::FallbackChainExecutor`] (next provider in line).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use voice_relay_core::error::ProviderError;
use voice_relay_core::types::ConversationTurn;
use voice_relay_media::{AudioStream, AudioUpload};

pub mod canned;
pub mod customgpt;
pub mod elevenlabs;
pub mod failover;
pub mod google_tts;
mod http;
pub mod openai;
pub mod registry;
pub mod retry;
pub mod sse;
pub mod streamelements;

pub use failover::{FallbackChainExecutor, FallbackResult, ProviderCandidate, ServiceType};
pub use registry::ProviderRegistry;
pub use retry::{RetryExecutor, RetryOutcome};

/// Common identity shared by every provider.
pub trait Provider: Send + Sync {
    /// Provider identifier (e.g., "openai", "elevenlabs").
    fn id(&self) -> &str;

    /// Whether credentials are present. Unconfigured providers fail every
    /// call with [`ProviderError::NotConfigured`].
    fn is_configured(&self) -> bool {
        true
    }

    /// Static stand-ins return placeholder output instead of real results.
    fn is_placeholder(&self) -> bool {
        false
    }
}

/// Options forwarded to completion backends.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompletionOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// ISO-639-1 reply language.
    pub language: String,
}

/// Options forwarded to speech synthesis backends.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VoiceOptions {
    /// Provider-specific voice name; `None` uses the configured default.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
    pub language: String,
}

#[async_trait]
pub trait SpeechToTextProvider: Provider {
    async fn transcribe(&self, audio: &AudioUpload, language: &str)
    -> Result<String, ProviderError>;
}

#[async_trait]
pub trait CompletionProvider: Provider {
    async fn complete(
        &self,
        messages: &[ConversationTurn],
        options: &CompletionOptions,
    ) -> Result<String, ProviderError>;
}

#[async_trait]
pub trait TextToSpeechProvider: Provider {
    /// Start synthesis. The returned stream owns the connection or temp
    /// file backing it and releases it when drained or dropped.
    async fn synthesize(&self, text: &str, options: &VoiceOptions)
    -> Result<AudioStream, ProviderError>;
}
