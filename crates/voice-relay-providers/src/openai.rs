//! OpenAI-compatible providers: Whisper transcription, chat completions and speech.
//!
//! Groq exposes the same transcription protocol under its own base URL, so
//! [`WhisperTranscriber`] serves both.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use voice_relay_core::config::{GroqConfig, OpenAiConfig};
use voice_relay_core::error::ProviderError;
use voice_relay_core::types::{ConversationTurn, Role};
use voice_relay_media::{AudioStream, AudioUpload};

use crate::http::{ensure_success, not_configured, transport_error, trim_base_url};
use crate::{
    CompletionOptions, CompletionProvider, Provider, SpeechToTextProvider, TextToSpeechProvider,
    VoiceOptions,
};

const OPENAI_BASE_URL: &str = "https://api.openai.com";
const GROQ_BASE_URL: &str = "https://api.groq.com/openai";

const DEFAULT_OPENAI_STT_MODEL: &str = "gpt-4o-mini-transcribe";
const DEFAULT_GROQ_STT_MODEL: &str = "whisper-large-v3-turbo";
const DEFAULT_CHAT_MODEL: &str = "gpt-3.5-turbo";
const DEFAULT_MAX_TOKENS: u32 = 150;
const DEFAULT_TTS_MODEL: &str = "tts-1";
const DEFAULT_TTS_VOICE: &str = "nova";

/// Instructions for short, spoken-style replies in the requested language.
pub fn voice_system_prompt(language: &str) -> String {
    format!(
        "You are a helpful assistant with a voice interface. Keep your responses very succinct \
         and limited to a single sentence since the user is interacting with you through a voice \
         interface. Always provide your responses in the language that corresponds to the \
         ISO-639-1 code: {language}."
    )
}

// --- Transcription ---

pub struct WhisperTranscriber {
    provider_id: &'static str,
    base_url: String,
    api_key: Option<String>,
    model: String,
    timeout: Duration,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    #[serde(default)]
    text: String,
}

impl WhisperTranscriber {
    pub fn openai(config: &OpenAiConfig) -> Self {
        Self {
            provider_id: "openai",
            base_url: trim_base_url(config.base_url.as_deref(), OPENAI_BASE_URL),
            api_key: config.resolve_api_key(),
            model: config
                .stt_model
                .clone()
                .unwrap_or_else(|| DEFAULT_OPENAI_STT_MODEL.into()),
            timeout: config.request_timeout(),
            client: reqwest::Client::new(),
        }
    }

    pub fn groq(config: &GroqConfig) -> Self {
        Self {
            provider_id: "groq",
            base_url: trim_base_url(config.base_url.as_deref(), GROQ_BASE_URL),
            api_key: config.resolve_api_key(),
            model: config
                .stt_model
                .clone()
                .unwrap_or_else(|| DEFAULT_GROQ_STT_MODEL.into()),
            timeout: Duration::from_secs(15),
            client: reqwest::Client::new(),
        }
    }

    pub fn url(&self) -> String {
        format!("{}/v1/audio/transcriptions", self.base_url)
    }
}

impl Provider for WhisperTranscriber {
    fn id(&self) -> &str {
        self.provider_id
    }

    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }
}

#[async_trait]
impl SpeechToTextProvider for WhisperTranscriber {
    async fn transcribe(
        &self,
        audio: &AudioUpload,
        language: &str,
    ) -> Result<String, ProviderError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| not_configured(self.provider_id, "API key"))?;

        debug!(
            provider = self.provider_id,
            model = %self.model,
            bytes = audio.len(),
            "Sending audio for transcription"
        );

        let part = reqwest::multipart::Part::bytes(audio.bytes.to_vec())
            .file_name(audio.upload_name())
            .mime_str(audio.mime())
            .map_err(|e| ProviderError::Other(format!("invalid audio mime type: {e}")))?;

        let form = reqwest::multipart::Form::new()
            .text("model", self.model.clone())
            .text("language", language.to_string())
            .text("response_format", "json")
            .part("file", part);

        let resp = self
            .client
            .post(self.url())
            .bearer_auth(api_key)
            .timeout(self.timeout)
            .multipart(form)
            .send()
            .await
            .map_err(transport_error)?;

        let body: TranscriptionResponse = ensure_success(resp)
            .await?
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        Ok(body.text.trim().to_string())
    }
}

// --- Chat completions ---

pub struct OpenAiChat {
    base_url: String,
    api_key: Option<String>,
    model: String,
    max_tokens: u32,
    system_prompt: Option<String>,
    timeout: Duration,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiChat {
    pub fn new(config: &OpenAiConfig) -> Self {
        Self {
            base_url: trim_base_url(config.base_url.as_deref(), OPENAI_BASE_URL),
            api_key: config.resolve_api_key(),
            model: config
                .completion_model
                .clone()
                .unwrap_or_else(|| DEFAULT_CHAT_MODEL.into()),
            max_tokens: config.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            system_prompt: config.system_prompt.clone(),
            timeout: config.request_timeout(),
            client: reqwest::Client::new(),
        }
    }
}

impl Provider for OpenAiChat {
    fn id(&self) -> &str {
        "openai"
    }

    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }
}

#[async_trait]
impl CompletionProvider for OpenAiChat {
    async fn complete(
        &self,
        messages: &[ConversationTurn],
        options: &CompletionOptions,
    ) -> Result<String, ProviderError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| not_configured("openai", "API key"))?;

        let system = self
            .system_prompt
            .clone()
            .unwrap_or_else(|| voice_system_prompt(&options.language));

        let mut wire = Vec::with_capacity(messages.len() + 1);
        if messages.first().is_none_or(|m| m.role != Role::System) {
            wire.push(ChatMessage {
                role: Role::System.as_str(),
                content: &system,
            });
        }
        wire.extend(messages.iter().map(|m| ChatMessage {
            role: m.role.as_str(),
            content: &m.content,
        }));

        let model = options.model.as_deref().unwrap_or(&self.model);
        let body = ChatRequest {
            model,
            messages: wire,
            max_tokens: options.max_tokens.unwrap_or(self.max_tokens),
            temperature: options.temperature,
        };

        debug!(model, messages = body.messages.len(), "Calling OpenAI chat completions");

        let resp = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .bearer_auth(api_key)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        let parsed: ChatResponse = ensure_success(resp)
            .await?
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content.unwrap_or_default())
            .ok_or_else(|| ProviderError::InvalidResponse("no choices in completion".into()))
    }
}

// --- Speech ---

pub struct OpenAiSpeech {
    base_url: String,
    api_key: Option<String>,
    model: String,
    voice: String,
    client: reqwest::Client,
}

impl OpenAiSpeech {
    pub fn new(config: &OpenAiConfig) -> Self {
        let client = reqwest::Client::builder()
            .read_timeout(config.request_timeout())
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            base_url: trim_base_url(config.base_url.as_deref(), OPENAI_BASE_URL),
            api_key: config.resolve_api_key(),
            model: config
                .tts_model
                .clone()
                .unwrap_or_else(|| DEFAULT_TTS_MODEL.into()),
            voice: config
                .tts_voice
                .clone()
                .unwrap_or_else(|| DEFAULT_TTS_VOICE.into()),
            client,
        }
    }
}

impl Provider for OpenAiSpeech {
    fn id(&self) -> &str {
        "openai"
    }

    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }
}

#[async_trait]
impl TextToSpeechProvider for OpenAiSpeech {
    async fn synthesize(
        &self,
        text: &str,
        options: &VoiceOptions,
    ) -> Result<AudioStream, ProviderError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| not_configured("openai", "API key"))?;
        let voice = options.voice.as_deref().unwrap_or(&self.voice);

        debug!(model = %self.model, voice, text_len = text.len(), "Starting OpenAI speech stream");

        let resp = self
            .client
            .post(format!("{}/v1/audio/speech", self.base_url))
            .bearer_auth(api_key)
            .json(&serde_json::json!({
                "model": self.model,
                "voice": voice,
                "input": text,
                "response_format": "mp3",
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
    fn test_transcription_urls() {
        let openai = WhisperTranscriber::openai(&OpenAiConfig::default());
        assert_eq!(openai.url(), "https://api.openai.com/v1/audio/transcriptions");

        let groq = WhisperTranscriber::groq(&GroqConfig::default());
        assert!(groq.url().starts_with("https://api.groq.com/openai"));
        assert_eq!(groq.id(), "groq");
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let config = OpenAiConfig {
            base_url: Some("http://localhost:9000/".into()),
            ..Default::default()
        };
        assert_eq!(
            WhisperTranscriber::openai(&config).url(),
            "http://localhost:9000/v1/audio/transcriptions"
        );
    }

    #[test]
    fn test_chat_request_shape() {
        let body = ChatRequest {
            model: "gpt-3.5-turbo",
            messages: vec![ChatMessage {
                role: "user",
                content: "hi",
            }],
            max_tokens: 150,
            temperature: None,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["messages"][0]["role"], "user");
        assert!(json.get("temperature").is_none());
    }

    #[test]
    fn test_voice_prompt_mentions_language() {
        assert!(voice_system_prompt("de").contains("ISO-639-1 code: de"));
    }

    #[tokio::test]
    async fn test_missing_key_is_not_configured() {
        let config = OpenAiConfig {
            api_key_env: Some("VR_TEST_UNSET_OPENAI_KEY".into()),
            ..Default::default()
        };
        let chat = OpenAiChat {
            api_key: None,
            ..OpenAiChat::new(&config)
        };
        let err = chat
            .complete(&[ConversationTurn::user("hi")], &CompletionOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::NotConfigured(_)));
        assert!(!err.is_retryable());
    }
}
