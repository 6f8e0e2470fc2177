//! ElevenLabs streaming text-to-speech.

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use voice_relay_core::config::ElevenLabsConfig;
use voice_relay_core::error::ProviderError;
use voice_relay_media::AudioStream;

use crate::http::{ensure_success, not_configured, transport_error};
use crate::{Provider, TextToSpeechProvider, VoiceOptions};

const ELEVENLABS_BASE_URL: &str = "https://api.elevenlabs.io";
const DEFAULT_VOICE_ID: &str = "EXAVITQu4vr4xnSDxMaL";
const DEFAULT_MODEL: &str = "eleven_monolingual_v1";
const DEFAULT_OUTPUT_FORMAT: &str = "mp3_44100_128";

pub struct ElevenLabsSpeech {
    api_key: Option<String>,
    voice_id: String,
    model_id: String,
    output_format: String,
    client: reqwest::Client,
}

/// Build the streaming endpoint URL for a voice.
pub fn build_tts_url(voice_id: &str, output_format: &str) -> String {
    format!("{ELEVENLABS_BASE_URL}/v1/text-to-speech/{voice_id}/stream?output_format={output_format}")
}

impl ElevenLabsSpeech {
    pub fn new(config: &ElevenLabsConfig) -> Self {
        Self {
            api_key: config.resolve_api_key(),
            voice_id: config
                .voice_id
                .clone()
                .unwrap_or_else(|| DEFAULT_VOICE_ID.into()),
            model_id: config
                .model_id
                .clone()
                .unwrap_or_else(|| DEFAULT_MODEL.into()),
            output_format: config
                .output_format
                .clone()
                .unwrap_or_else(|| DEFAULT_OUTPUT_FORMAT.into()),
            client: reqwest::Client::new(),
        }
    }
}

impl Provider for ElevenLabsSpeech {
    fn id(&self) -> &str {
        "elevenlabs"
    }

    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }
}

#[async_trait]
impl TextToSpeechProvider for ElevenLabsSpeech {
    async fn synthesize(
        &self,
        text: &str,
        options: &VoiceOptions,
    ) -> Result<AudioStream, ProviderError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| not_configured("elevenlabs", "API key"))?;
        let voice_id = options.voice.as_deref().unwrap_or(&self.voice_id);

        debug!(voice_id, model = %self.model_id, text_len = text.len(), "Starting ElevenLabs stream");

        let resp = self
            .client
            .post(build_tts_url(voice_id, &self.output_format))
            .header("xi-api-key", api_key)
            .json(&json!({
                "text": text,
                "model_id": self.model_id,
                "voice_settings": {
                    "stability": 0.5,
                    "similarity_boost": 0.75
                }
            }))
            .send()
            .await
            .map_err(transport_error)?;

        Ok(AudioStream::from_response(ensure_success(resp).await?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_url() {
        let url = build_tts_url("Rachel", "mp3_44100_128");
        assert!(url.starts_with("https://api.elevenlabs.io"));
        assert!(url.contains("/Rachel/stream"));
        assert!(url.ends_with("output_format=mp3_44100_128"));
    }

    #[test]
    fn test_defaults_applied() {
        let speech = ElevenLabsSpeech::new(&ElevenLabsConfig::default());
        assert_eq!(speech.voice_id, DEFAULT_VOICE_ID);
        assert_eq!(speech.model_id, DEFAULT_MODEL);
        assert_eq!(speech.id(), "elevenlabs");
    }
}
