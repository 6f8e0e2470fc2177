//! Static last-resort providers that never touch the network.

use async_trait::async_trait;

use voice_relay_core::error::ProviderError;
use voice_relay_core::types::ConversationTurn;
use voice_relay_media::AudioUpload;

use crate::{CompletionOptions, CompletionProvider, Provider, SpeechToTextProvider};

pub const TEMPLATE_REPLY: &str =
    "I apologize, but I'm experiencing technical difficulties. Please try again in a moment.";

pub const TEXT_ONLY_TRANSCRIPT: &str = "[Speech recognition unavailable - please type your message]";

/// Completion stand-in that always answers with an apology.
#[derive(Debug, Clone)]
pub struct TemplateCompletion {
    reply: String,
}

impl TemplateCompletion {
    pub fn new() -> Self {
        Self::with_reply(TEMPLATE_REPLY)
    }

    pub fn with_reply(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
        }
    }
}

impl Default for TemplateCompletion {
    fn default() -> Self {
        Self::new()
    }
}

impl Provider for TemplateCompletion {
    fn id(&self) -> &str {
        "template"
    }

    fn is_placeholder(&self) -> bool {
        true
    }
}

#[async_trait]
impl CompletionProvider for TemplateCompletion {
    async fn complete(
        &self,
        _messages: &[ConversationTurn],
        _options: &CompletionOptions,
    ) -> Result<String, ProviderError> {
        Ok(self.reply.clone())
    }
}

/// Transcription stand-in asking the user to type instead.
#[derive(Debug, Clone, Default)]
pub struct TextOnlyTranscriber;

impl Provider for TextOnlyTranscriber {
    fn id(&self) -> &str {
        "text_only"
    }

    fn is_placeholder(&self) -> bool {
        true
    }
}

#[async_trait]
impl SpeechToTextProvider for TextOnlyTranscriber {
    async fn transcribe(
        &self,
        _audio: &AudioUpload,
        _language: &str,
    ) -> Result<String, ProviderError> {
        Ok(TEXT_ONLY_TRANSCRIPT.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_template_reply() {
        let reply = TemplateCompletion::new()
            .complete(&[], &CompletionOptions::default())
            .await
            .unwrap();
        assert_eq!(reply, TEMPLATE_REPLY);
        assert!(TemplateCompletion::new().is_placeholder());
    }

    #[tokio::test]
    async fn test_text_only_transcript() {
        let upload = AudioUpload::new(vec![1, 2, 3], "audio/webm");
        let text = TextOnlyTranscriber.transcribe(&upload, "en").await.unwrap();
        assert!(text.contains("please type"));
    }
}
