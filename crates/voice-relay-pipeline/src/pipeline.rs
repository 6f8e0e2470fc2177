use std::time::Instant;

use futures::FutureExt;
use tracing::{debug, info, warn};

use voice_relay_core::config::{Config, PipelineConfig, StagesConfig};
use voice_relay_core::error::ProviderError;
use voice_relay_core::types::{ConversationTurn, truncate_chars};
use voice_relay_media::{AudioStream, AudioUpload};
use voice_relay_providers::{
    CompletionOptions, CompletionProvider, ProviderRegistry, ServiceType, SpeechToTextProvider,
    TextToSpeechProvider, VoiceOptions,
};

use crate::error::PipelineError;
use crate::history::ConversationHistory;
use crate::stage::{Stage, StageOutcome, StageReport, StageState};

/// One inference request as received from a client.
#[derive(Debug, Clone)]
pub struct PipelineRequest {
    pub audio: AudioUpload,
    /// Base64-encoded JSON history, exactly as the client sent it.
    pub conversation: Option<String>,
}

impl PipelineRequest {
    pub fn new(audio: AudioUpload) -> Self {
        Self {
            audio,
            conversation: None,
        }
    }

    pub fn with_conversation(mut self, encoded: impl Into<String>) -> Self {
        self.conversation = Some(encoded.into());
        self
    }
}

/// Everything about a completed request except the audio itself.
#[derive(Debug, Clone)]
pub struct PipelineMetadata {
    pub transcript: String,
    pub reply: String,
    /// History after this exchange, trimmed to the turn limit and to what
    /// fits in `encoded_history`.
    pub history: Vec<ConversationTurn>,
    /// `history` in its wire form, ready to echo back to the client.
    pub encoded_history: String,
    pub stt: StageReport,
    pub ai: StageReport,
    pub tts: StageReport,
}

#[derive(Debug)]
pub struct PipelineResponse {
    /// Synthesized reply. Releases its backing resources when drained or dropped.
    pub audio: AudioStream,
    pub metadata: PipelineMetadata,
}

/// Runs speech-to-text, completion and text-to-speech for one request.
///
/// Built once at startup and shared across requests; holds no per-request
/// state.
#[derive(Debug)]
pub struct InferencePipeline {
    limits: PipelineConfig,
    stt: Stage<dyn SpeechToTextProvider>,
    ai: Stage<dyn CompletionProvider>,
    tts: Stage<dyn TextToSpeechProvider>,
}

impl InferencePipeline {
    pub fn new(limits: PipelineConfig, stages: &StagesConfig, registry: ProviderRegistry) -> Self {
        let ProviderRegistry { stt, ai, tts } = registry;
        Self {
            stt: Stage::new(ServiceType::Stt, &stages.stt, stt),
            ai: Stage::new(ServiceType::Ai, &stages.ai, ai),
            tts: Stage::new(ServiceType::Tts, &stages.tts, tts),
            limits,
        }
    }

    /// Build the pipeline and every provider chain from `config`.
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.pipeline.clone(),
            &config.stages,
            ProviderRegistry::from_config(config),
        )
    }

    pub fn limits(&self) -> &PipelineConfig {
        &self.limits
    }

    pub fn stt_stage(&self) -> &Stage<dyn SpeechToTextProvider> {
        &self.stt
    }

    pub fn ai_stage(&self) -> &Stage<dyn CompletionProvider> {
        &self.ai
    }

    pub fn tts_stage(&self) -> &Stage<dyn TextToSpeechProvider> {
        &self.tts
    }

    /// Run the full voice round trip.
    ///
    /// Input is validated before any provider is contacted. Each stage runs
    /// under its own deadline; the first failing stage ends the request.
    pub async fn process(&self, request: PipelineRequest) -> Result<PipelineResponse, PipelineError> {
        let started = Instant::now();
        let PipelineRequest {
            audio,
            conversation,
        } = request;

        let mut history =
            ConversationHistory::decode_lenient(conversation.as_deref(), self.limits.max_history_turns);
        debug!(prior_turns = history.len(), audio_bytes = audio.len(), "Inference request accepted");

        let result = async {
            let transcript = self.transcribe(&audio).await?;
            let reply = self.reply(&history, &transcript.value).await?;
            let spoken = truncate_chars(&reply.value, self.limits.tts_max_chars);
            let speech = self.speak(spoken).await?;
            Ok::<_, PipelineError>((transcript, reply, speech))
        }
        .await;

        let (transcript, reply, speech) = match result {
            Ok(outcomes) => outcomes,
            Err(e) => {
                warn!(
                    kind = e.kind(),
                    stage = e.stage().map(|s| s.as_str()),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    error = %e,
                    "Inference failed"
                );
                return Err(e);
            }
        };

        history.record_exchange(transcript.value.clone(), reply.value.clone());
        let encoded_history = history.encode_within(self.limits.conversation_header_bytes);

        info!(
            transcript_chars = transcript.value.chars().count(),
            reply_chars = reply.value.chars().count(),
            stt_provider = %transcript.report.provider,
            ai_provider = %reply.report.provider,
            tts_provider = %speech.report.provider,
            stt_ms = transcript.report.elapsed.as_millis() as u64,
            ai_ms = reply.report.elapsed.as_millis() as u64,
            tts_ms = speech.report.elapsed.as_millis() as u64,
            history_turns = history.len(),
            "Inference complete"
        );

        Ok(PipelineResponse {
            audio: speech.value,
            metadata: PipelineMetadata {
                transcript: transcript.value,
                reply: reply.value,
                history: history.into_turns(),
                encoded_history,
                stt: transcript.report,
                ai: reply.report,
                tts: speech.report,
            },
        })
    }

    /// Validate `audio` and transcribe it.
    ///
    /// The transcript is trimmed and capped at `transcript_max_chars`. An
    /// empty transcript is an error.
    pub async fn transcribe(
        &self,
        audio: &AudioUpload,
    ) -> Result<StageOutcome<String>, PipelineError> {
        debug!(stage = %ServiceType::Stt, state = ?StageState::Validating, "Validating audio");
        audio.validate(self.limits.max_audio_bytes)?;

        let language = self.limits.language.as_str();
        let outcome = self
            .stt
            .run(|provider| provider.transcribe(audio, language))
            .await?;

        let transcript = truncate_chars(outcome.value.trim(), self.limits.transcript_max_chars);
        if transcript.is_empty() {
            return Err(PipelineError::EmptyResult {
                stage: ServiceType::Stt,
            });
        }
        let transcript = transcript.to_string();
        Ok(outcome.map(|_| transcript))
    }

    /// Ask the completion chain to answer `prompt` in the context of `history`.
    ///
    /// The reply is trimmed and capped at `reply_max_chars`.
    pub async fn reply(
        &self,
        history: &ConversationHistory,
        prompt: &str,
    ) -> Result<StageOutcome<String>, PipelineError> {
        debug!(stage = %ServiceType::Ai, state = ?StageState::Validating, "Preparing prompt");
        // `process` never gets here with a blank prompt; direct callers can.
        if prompt.trim().is_empty() {
            return Err(PipelineError::InvalidInput("prompt is empty".to_string()));
        }

        let messages = history.with_prompt(prompt);
        let options = CompletionOptions {
            language: self.limits.language.clone(),
            ..CompletionOptions::default()
        };
        let outcome = self
            .ai
            .run(|provider| provider.complete(&messages, &options))
            .await?;

        let reply = truncate_chars(outcome.value.trim(), self.limits.reply_max_chars);
        if reply.is_empty() {
            return Err(PipelineError::EmptyResult {
                stage: ServiceType::Ai,
            });
        }
        let reply = reply.to_string();
        Ok(outcome.map(|_| reply))
    }

    /// Synthesize `text`.
    ///
    /// Text longer than `tts_max_chars` is rejected. The returned stream has
    /// already produced its first chunk, so an upstream that answers with no
    /// audio at all surfaces here as an empty result rather than as an empty
    /// response body.
    pub async fn speak(&self, text: &str) -> Result<StageOutcome<AudioStream>, PipelineError> {
        debug!(stage = %ServiceType::Tts, state = ?StageState::Validating, "Validating text");
        let text = text.trim();
        if text.is_empty() {
            return Err(PipelineError::InvalidInput("text is empty".to_string()));
        }
        let chars = text.chars().count();
        if chars > self.limits.tts_max_chars {
            return Err(PipelineError::InvalidInput(format!(
                "text is {chars} characters, limit is {}",
                self.limits.tts_max_chars
            )));
        }

        let options = VoiceOptions {
            voice: None,
            language: self.limits.language.clone(),
        };
        let outcome = self
            .tts
            .run(|provider| {
                let options = &options;
                async move {
                    let stream = provider.synthesize(text, options).await?;
                    prime(stream).await
                }
                .boxed()
            })
            .await?;

        match outcome.value {
            Some(stream) => Ok(StageOutcome {
                value: stream,
                report: outcome.report,
            }),
            None => Err(PipelineError::EmptyResult {
                stage: ServiceType::Tts,
            }),
        }
    }
}

/// Wait for the first audio chunk so transport failures count against the
/// provider that produced the stream.
async fn prime(stream: AudioStream) -> Result<Option<AudioStream>, ProviderError> {
    stream
        .primed()
        .await
        .map_err(|e| ProviderError::Connection(format!("audio stream failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use voice_relay_providers::canned::{TEMPLATE_REPLY, TemplateCompletion, TextOnlyTranscriber};
    use voice_relay_providers::{Provider, TextToSpeechProvider};

    struct Silent;

    impl Provider for Silent {
        fn id(&self) -> &str {
            "silent"
        }
    }

    #[async_trait::async_trait]
    impl TextToSpeechProvider for Silent {
        async fn synthesize(
            &self,
            _text: &str,
            _options: &VoiceOptions,
        ) -> Result<AudioStream, ProviderError> {
            Ok(AudioStream::empty())
        }
    }

    fn pipeline(tts: Arc<dyn TextToSpeechProvider>) -> InferencePipeline {
        InferencePipeline::new(
            PipelineConfig::default(),
            &StagesConfig::default(),
            ProviderRegistry::new(
                vec![Arc::new(TextOnlyTranscriber)],
                vec![Arc::new(TemplateCompletion::new())],
                vec![tts],
            ),
        )
    }

    #[tokio::test]
    async fn test_silent_tts_is_empty_result() {
        let err = pipeline(Arc::new(Silent)).speak("hello").await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::EmptyResult {
                stage: ServiceType::Tts
            }
        ));
    }

    #[tokio::test]
    async fn test_speak_rejects_blank_and_oversized_text() {
        let pipeline = pipeline(Arc::new(Silent));
        assert!(matches!(
            pipeline.speak("   ").await.unwrap_err(),
            PipelineError::InvalidInput(_)
        ));
        let long = "a".repeat(pipeline.limits().tts_max_chars + 1);
        assert!(matches!(
            pipeline.speak(&long).await.unwrap_err(),
            PipelineError::InvalidInput(_)
        ));
    }

    #[tokio::test]
    async fn test_reply_uses_template_chain() {
        let pipeline = pipeline(Arc::new(Silent));
        let history = ConversationHistory::new(10);
        let reply = pipeline.reply(&history, "hello?").await.unwrap();
        assert_eq!(reply.value, TEMPLATE_REPLY);
        assert_eq!(reply.report.provider, "template");
    }

    #[tokio::test]
    async fn test_reply_rejects_blank_prompt() {
        let pipeline = pipeline(Arc::new(Silent));
        let history = ConversationHistory::new(10);
        assert!(matches!(
            pipeline.reply(&history, " \n\t").await.unwrap_err(),
            PipelineError::InvalidInput(_)
        ));
    }
}
