//! Provider registry: resolves configured provider kinds into ordered chains.
//!
//! Resolution happens once at startup. The hot path only walks the
//! resulting `Vec`s; no provider is looked up by name per request.

use std::sync::Arc;

use tracing::info;

use voice_relay_core::cache::TtlCache;
use voice_relay_core::config::{
    CompletionProviderKind, Config, SttProviderKind, TtsProviderKind,
};

use crate::canned::{TemplateCompletion, TextOnlyTranscriber};
use crate::customgpt::{CustomGptCompletion, SessionCache};
use crate::elevenlabs::ElevenLabsSpeech;
use crate::google_tts::GoogleTranslateSpeech;
use crate::openai::{OpenAiChat, OpenAiSpeech, WhisperTranscriber};
use crate::streamelements::StreamElementsSpeech;
use crate::{CompletionProvider, Provider, SpeechToTextProvider, TextToSpeechProvider};

/// Ordered provider chains, primary first.
#[derive(Clone)]
pub struct ProviderRegistry {
    pub stt: Vec<Arc<dyn SpeechToTextProvider>>,
    pub ai: Vec<Arc<dyn CompletionProvider>>,
    pub tts: Vec<Arc<dyn TextToSpeechProvider>>,
}

impl ProviderRegistry {
    pub fn new(
        stt: Vec<Arc<dyn SpeechToTextProvider>>,
        ai: Vec<Arc<dyn CompletionProvider>>,
        tts: Vec<Arc<dyn TextToSpeechProvider>>,
    ) -> Self {
        Self { stt, ai, tts }
    }

    /// Build every chain named in `config`.
    pub fn from_config(config: &Config) -> Self {
        let sessions: Arc<SessionCache> = Arc::new(TtlCache::new(
            config.session_ttl(),
            config.session_cache_entries(),
        ));
        let scratch = config.pipeline.scratch_dir();
        let providers = &config.providers;

        let stt = std::iter::once(config.stt.primary)
            .chain(config.stt.fallbacks.iter().copied())
            .map(|kind| -> Arc<dyn SpeechToTextProvider> {
                match kind {
                    SttProviderKind::OpenAi => Arc::new(WhisperTranscriber::openai(&providers.openai)),
                    SttProviderKind::Groq => Arc::new(WhisperTranscriber::groq(&providers.groq)),
                    SttProviderKind::TextOnly => Arc::new(TextOnlyTranscriber),
                }
            })
            .collect();

        let ai = std::iter::once(config.ai.primary)
            .chain(config.ai.fallbacks.iter().copied())
            .map(|kind| -> Arc<dyn CompletionProvider> {
                match kind {
                    CompletionProviderKind::OpenAi => Arc::new(OpenAiChat::new(&providers.openai)),
                    CompletionProviderKind::CustomGpt => Arc::new(CustomGptCompletion::new(
                        &providers.customgpt,
                        Arc::clone(&sessions),
                    )),
                    CompletionProviderKind::Template => Arc::new(TemplateCompletion::new()),
                }
            })
            .collect();

        let tts = std::iter::once(config.tts.primary)
            .chain(config.tts.fallbacks.iter().copied())
            .map(|kind| -> Arc<dyn TextToSpeechProvider> {
                match kind {
                    TtsProviderKind::OpenAi => Arc::new(OpenAiSpeech::new(&providers.openai)),
                    TtsProviderKind::ElevenLabs => {
                        Arc::new(ElevenLabsSpeech::new(&providers.elevenlabs))
                    }
                    TtsProviderKind::StreamElements => Arc::new(StreamElementsSpeech::new(
                        &providers.streamelements,
                        scratch.clone(),
                    )),
                    TtsProviderKind::GoogleTranslate => Arc::new(GoogleTranslateSpeech::new(
                        &providers.google_tts,
                        scratch.clone(),
                    )),
                }
            })
            .collect();

        let registry = Self { stt, ai, tts };
        info!(
            stt = ?registry.stt_ids(),
            ai = ?registry.ai_ids(),
            tts = ?registry.tts_ids(),
            "Provider chains resolved"
        );
        registry
    }

    pub fn stt_ids(&self) -> Vec<&str> {
        ids(&self.stt)
    }

    pub fn ai_ids(&self) -> Vec<&str> {
        ids(&self.ai)
    }

    pub fn tts_ids(&self) -> Vec<&str> {
        ids(&self.tts)
    }
}

fn ids<P: Provider + ?Sized>(chain: &[Arc<P>]) -> Vec<&str> {
    chain.iter().map(|p| p.id()).collect()
}

/// Whether any provider in the chain can produce real output.
pub fn chain_available<P: Provider + ?Sized>(chain: &[Arc<P>]) -> bool {
    chain.iter().any(|p| p.is_configured() && !p.is_placeholder())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_chains() {
        let registry = ProviderRegistry::from_config(&Config::default());
        assert_eq!(registry.stt_ids(), ["openai"]);
        assert_eq!(registry.ai_ids(), ["openai"]);
        assert_eq!(
            registry.tts_ids(),
            ["openai", "streamelements", "google_translate"]
        );
    }

    #[test]
    fn test_configured_chain_order() {
        let config = Config::from_json5(
            r#"{
                stt: { primary: "groq", fallbacks: ["text_only"] },
                ai: { primary: "customgpt", fallbacks: ["openai", "template"] },
                tts: { primary: "elevenlabs", fallbacks: [] },
            }"#,
        )
        .unwrap();
        let registry = ProviderRegistry::from_config(&config);
        assert_eq!(registry.stt_ids(), ["groq", "text_only"]);
        assert_eq!(registry.ai_ids(), ["customgpt", "openai", "template"]);
        assert_eq!(registry.tts_ids(), ["elevenlabs"]);
    }

    #[test]
    fn test_placeholders_do_not_count_as_available() {
        let chain: Vec<Arc<dyn CompletionProvider>> = vec![Arc::new(TemplateCompletion::new())];
        assert!(!chain_available(&chain));

        let keyless_tts: Vec<Arc<dyn TextToSpeechProvider>> = vec![Arc::new(
            StreamElementsSpeech::new(&Default::default(), std::env::temp_dir()),
        )];
        assert!(chain_available(&keyless_tts));
    }
}
