//! Configuration loading and validation.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use crate::backoff::RetryConfig;

/// Top-level Voice Relay configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<ServerConfig>,

    #[serde(default)]
    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub stages: StagesConfig,

    #[serde(default)]
    pub providers: ProvidersConfig,

    #[serde(default)]
    pub stt: SttChainConfig,

    #[serde(default)]
    pub ai: AiChainConfig,

    #[serde(default)]
    pub tts: TtsChainConfig,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache: Option<CacheConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

// --- HTTP server ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind: Option<String>,

    /// Origins allowed by CORS. Empty means any origin.
    #[serde(default)]
    pub cors_origins: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimitConfig>,
}

fn default_port() -> u16 {
    8000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: None,
            cors_origins: Vec::new(),
            rate_limit: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Pipeline requests allowed per client within one window.
    #[serde(default = "default_max_requests")]
    pub max_requests: u32,

    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
}

fn default_max_requests() -> u32 {
    20
}

fn default_window_secs() -> u64 {
    60
}

// --- Pipeline bounds ---

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Largest accepted audio upload.
    pub max_audio_bytes: usize,
    /// Most recent turns kept in conversation history.
    pub max_history_turns: usize,
    pub transcript_max_chars: usize,
    pub reply_max_chars: usize,
    /// Longest text accepted by the TTS stage.
    pub tts_max_chars: usize,
    /// Transcript characters echoed back in the `X-Transcript` header.
    pub transcript_header_chars: usize,
    /// Bytes of the base64 reply echoed back in the `X-AI-Response` header.
    pub reply_header_bytes: usize,
    /// Largest encoded `X-Conversation` value. Oldest turns are dropped to fit.
    pub conversation_header_bytes: usize,
    /// ISO-639-1 language passed to STT and TTS providers.
    pub language: String,
    /// Directory for temporary audio files. Defaults to the system temp dir.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scratch_dir: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_audio_bytes: 10 * 1024 * 1024,
            max_history_turns: 10,
            transcript_max_chars: 1_000,
            reply_max_chars: 5_000,
            tts_max_chars: 4_096,
            transcript_header_chars: 500,
            reply_header_bytes: 2_000,
            conversation_header_bytes: 8_192,
            language: "en".into(),
            scratch_dir: None,
        }
    }
}

impl PipelineConfig {
    pub fn scratch_dir(&self) -> PathBuf {
        self.scratch_dir
            .as_deref()
            .map(PathBuf::from)
            .unwrap_or_else(std::env::temp_dir)
    }
}

// --- Per-stage deadlines and retry ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageConfig {
    pub timeout_secs: u64,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl StageConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagesConfig {
    #[serde(default = "default_stt_stage")]
    pub stt: StageConfig,
    #[serde(default = "default_ai_stage")]
    pub ai: StageConfig,
    #[serde(default = "default_tts_stage")]
    pub tts: StageConfig,
}

impl Default for StagesConfig {
    fn default() -> Self {
        Self {
            stt: default_stt_stage(),
            ai: default_ai_stage(),
            tts: default_tts_stage(),
        }
    }
}

fn default_stt_stage() -> StageConfig {
    StageConfig {
        timeout_secs: 30,
        retry: RetryConfig::stt(),
    }
}

fn default_ai_stage() -> StageConfig {
    StageConfig {
        timeout_secs: 60,
        retry: RetryConfig::ai(),
    }
}

fn default_tts_stage() -> StageConfig {
    StageConfig {
        timeout_secs: 120,
        retry: RetryConfig::tts(),
    }
}

// --- Provider chains ---

/// Speech-to-text backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SttProviderKind {
    #[serde(rename = "openai")]
    OpenAi,
    Groq,
    /// Returns a fixed "please type" placeholder instead of a transcript.
    TextOnly,
}

/// Completion backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionProviderKind {
    #[serde(rename = "openai")]
    OpenAi,
    #[serde(rename = "customgpt")]
    CustomGpt,
    /// Returns a fixed apology sentence.
    Template,
}

/// Text-to-speech backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TtsProviderKind {
    #[serde(rename = "openai")]
    OpenAi,
    #[serde(rename = "elevenlabs")]
    ElevenLabs,
    #[serde(rename = "streamelements")]
    StreamElements,
    GoogleTranslate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SttChainConfig {
    #[serde(default = "default_stt_primary")]
    pub primary: SttProviderKind,
    #[serde(default)]
    pub fallbacks: Vec<SttProviderKind>,
}

fn default_stt_primary() -> SttProviderKind {
    SttProviderKind::OpenAi
}

impl Default for SttChainConfig {
    fn default() -> Self {
        Self {
            primary: default_stt_primary(),
            fallbacks: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiChainConfig {
    #[serde(default = "default_ai_primary")]
    pub primary: CompletionProviderKind,
    #[serde(default)]
    pub fallbacks: Vec<CompletionProviderKind>,
}

fn default_ai_primary() -> CompletionProviderKind {
    CompletionProviderKind::OpenAi
}

impl Default for AiChainConfig {
    fn default() -> Self {
        Self {
            primary: default_ai_primary(),
            fallbacks: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsChainConfig {
    #[serde(default = "default_tts_primary")]
    pub primary: TtsProviderKind,
    #[serde(default = "default_tts_fallbacks")]
    pub fallbacks: Vec<TtsProviderKind>,
}

fn default_tts_primary() -> TtsProviderKind {
    TtsProviderKind::OpenAi
}

fn default_tts_fallbacks() -> Vec<TtsProviderKind> {
    vec![TtsProviderKind::StreamElements, TtsProviderKind::GoogleTranslate]
}

impl Default for TtsChainConfig {
    fn default() -> Self {
        Self {
            primary: default_tts_primary(),
            fallbacks: default_tts_fallbacks(),
        }
    }
}

// --- Provider credentials and options ---

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub openai: OpenAiConfig,
    #[serde(default)]
    pub groq: GroqConfig,
    #[serde(default)]
    pub customgpt: CustomGptConfig,
    #[serde(default)]
    pub elevenlabs: ElevenLabsConfig,
    #[serde(default)]
    pub streamelements: StreamElementsConfig,
    #[serde(default)]
    pub google_tts: GoogleTtsConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OpenAiConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Transcription model (default: "gpt-4o-mini-transcribe").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stt_model: Option<String>,
    /// Chat model (default: "gpt-3.5-turbo").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    /// TTS model (default: "tts-1").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tts_model: Option<String>,
    /// TTS voice (default: "nova").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tts_voice: Option<String>,
    /// Per-request HTTP timeout in seconds (default: 15).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_timeout_secs: Option<u64>,
}

impl OpenAiConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret_field(&self.api_key, &self.api_key_env).or_else(|| env_secret("OPENAI_API_KEY"))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.unwrap_or(15))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GroqConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Transcription model (default: "whisper-large-v3-turbo").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stt_model: Option<String>,
}

impl GroqConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret_field(&self.api_key, &self.api_key_env).or_else(|| env_secret("GROQ_API_KEY"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomGptConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id_env: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Use the SSE streaming endpoint (default: true).
    #[serde(default = "default_true")]
    pub stream: bool,
    /// Instructions prepended to the first message of a conversation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    /// Shorten replies for voice output. Absent means no shortening.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub brevity: Option<BrevityConfig>,
}

impl Default for CustomGptConfig {
    fn default() -> Self {
        Self {
            project_id: None,
            project_id_env: None,
            api_key: None,
            api_key_env: None,
            base_url: None,
            stream: true,
            instructions: None,
            brevity: Some(BrevityConfig::default()),
        }
    }
}

impl CustomGptConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret_field(&self.api_key, &self.api_key_env).or_else(|| env_secret("CUSTOMGPT_API_KEY"))
    }

    pub fn resolve_project_id(&self) -> Option<String> {
        resolve_secret_field(&self.project_id, &self.project_id_env)
            .or_else(|| env_secret("CUSTOMGPT_PROJECT_ID"))
    }
}

/// Limits applied to a reply before it is spoken.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrevityConfig {
    #[serde(default = "default_max_sentences")]
    pub max_sentences: usize,
    #[serde(default = "default_max_words")]
    pub max_words: usize,
    /// Stop reading a streamed reply once this many words have arrived.
    #[serde(default = "default_stream_word_limit")]
    pub stream_word_limit: usize,
}

fn default_max_sentences() -> usize {
    2
}

fn default_max_words() -> usize {
    50
}

fn default_stream_word_limit() -> usize {
    60
}

impl Default for BrevityConfig {
    fn default() -> Self {
        Self {
            max_sentences: default_max_sentences(),
            max_words: default_max_words(),
            stream_word_limit: default_stream_word_limit(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ElevenLabsConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    /// Output format (default: "mp3_44100_128").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_format: Option<String>,
}

impl ElevenLabsConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret_field(&self.api_key, &self.api_key_env)
            .or_else(|| env_secret("ELEVENLABS_API_KEY"))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamElementsConfig {
    /// Voice name (default: "Salli").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GoogleTtsConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

// --- Cache, logging ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Lifetime of a cached upstream session id.
    #[serde(default = "default_session_ttl")]
    pub session_ttl_secs: u64,
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

fn default_session_ttl() -> u64 {
    3_600
}

fn default_max_entries() -> usize {
    1_024
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log format: "plain" (default) or "json".
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Log level override (trace/debug/info/warn/error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    /// Per-crate log level overrides (e.g. "voice_relay_pipeline=debug").
    #[serde(default)]
    pub filters: Vec<String>,

    /// Output target: "stderr" (default) or "stdout".
    #[serde(default = "default_log_output")]
    pub output: String,
}

fn default_log_format() -> String {
    "plain".into()
}

fn default_log_output() -> String {
    "stderr".into()
}

fn default_true() -> bool {
    true
}

/// Resolve a secret: check the direct value first, then the env-var reference.
pub fn resolve_secret_field(direct: &Option<String>, env_var: &Option<String>) -> Option<String> {
    if let Some(val) = direct {
        if !val.is_empty() {
            return Some(val.clone());
        }
    }
    env_var.as_deref().and_then(env_secret)
}

fn env_secret(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

static ENV_REF: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"\$\{([^}]+)\}").expect("static regex"));

/// Substitute `${ENV_VAR}` patterns in a string with their environment variable values.
fn substitute_env_vars(input: &str) -> String {
    ENV_REF
        .replace_all(input, |caps: &regex::Captures| {
            std::env::var(&caps[1]).unwrap_or_default()
        })
        .into_owned()
}

impl Config {
    /// Load config from a JSON5 file, substituting `${ENV_VAR}` references.
    pub fn load(path: &Path) -> crate::error::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)?;
        Self::from_json5(&raw)
    }

    pub fn from_json5(raw: &str) -> crate::error::Result<Self> {
        let substituted = substitute_env_vars(raw);
        json5::from_str(&substituted)
            .map_err(|e| crate::error::VoiceRelayError::Config(e.to_string()))
    }

    /// Default config file path: `~/.voice_relay/config.json`.
    pub fn default_path() -> PathBuf {
        data_dir().join("config.json")
    }

    pub fn server_port(&self) -> u16 {
        self.server.as_ref().map(|s| s.port).unwrap_or_else(default_port)
    }

    pub fn bind_addr(&self) -> String {
        self.server
            .as_ref()
            .and_then(|s| s.bind.clone())
            .unwrap_or_else(|| "0.0.0.0".to_string())
    }

    pub fn cors_origins(&self) -> &[String] {
        self.server
            .as_ref()
            .map(|s| s.cors_origins.as_slice())
            .unwrap_or(&[])
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(
            self.cache
                .as_ref()
                .map(|c| c.session_ttl_secs)
                .unwrap_or_else(default_session_ttl),
        )
    }

    pub fn session_cache_entries(&self) -> usize {
        self.cache
            .as_ref()
            .map(|c| c.max_entries)
            .unwrap_or_else(default_max_entries)
    }

    /// Get a config value by dotted path (e.g. "stages.ai.timeout_secs").
    pub fn get_path(&self, path: &str) -> Option<serde_json::Value> {
        let json = serde_json::to_value(self).ok()?;
        let mut current = &json;
        for segment in path.split('.') {
            current = current.get(segment)?;
        }
        Some(current.clone())
    }

    /// Validate config, returning (warnings, errors).
    pub fn validate(&self) -> (Vec<String>, Vec<String>) {
        let mut warnings = Vec::new();
        let mut errors = Vec::new();

        for (name, stage) in [
            ("stt", &self.stages.stt),
            ("ai", &self.stages.ai),
            ("tts", &self.stages.tts),
        ] {
            if stage.timeout_secs == 0 {
                errors.push(format!("stages.{name}.timeout_secs cannot be 0"));
            }
            if let Err(e) = stage.retry.validate() {
                errors.push(format!("stages.{name}.retry: {e}"));
            }
        }

        if let Some(server) = &self.server {
            if server.port == 0 {
                errors.push("Server port cannot be 0".to_string());
            }
        }

        let p = &self.pipeline;
        if p.max_audio_bytes == 0 {
            errors.push("pipeline.max_audio_bytes cannot be 0".to_string());
        }
        if p.max_history_turns < 2 {
            warnings.push(format!(
                "pipeline.max_history_turns is {}; a full user/assistant exchange will not fit",
                p.max_history_turns
            ));
        }

        let providers = &self.providers;
        check_chain(
            "stt",
            self.stt.primary,
            &self.stt.fallbacks,
            |kind| stt_missing_credential(providers, kind),
            &mut warnings,
            &mut errors,
        );
        check_chain(
            "ai",
            self.ai.primary,
            &self.ai.fallbacks,
            |kind| completion_missing_credential(providers, kind),
            &mut warnings,
            &mut errors,
        );
        check_chain(
            "tts",
            self.tts.primary,
            &self.tts.fallbacks,
            |kind| tts_missing_credential(providers, kind),
            &mut warnings,
            &mut errors,
        );

        if let Some(voice) = &providers.openai.tts_voice {
            const VOICES: &[&str] = &["alloy", "echo", "fable", "onyx", "nova", "shimmer"];
            if !VOICES.contains(&voice.as_str()) {
                warnings.push(format!("OpenAI TTS voice '{voice}' may be invalid"));
            }
        }

        (warnings, errors)
    }

    /// Save config to a file, creating its directory.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

/// A missing credential is an error for the primary and a warning for fallbacks.
fn check_chain<K: Copy + Eq + std::hash::Hash + std::fmt::Debug>(
    section: &str,
    primary: K,
    fallbacks: &[K],
    missing: impl Fn(K) -> Option<&'static str>,
    warnings: &mut Vec<String>,
    errors: &mut Vec<String>,
) {
    if let Some(what) = missing(primary) {
        errors.push(format!("{section}.primary ({primary:?}) requires {what}"));
    }

    let mut seen = HashSet::from([primary]);
    for kind in fallbacks {
        if !seen.insert(*kind) {
            warnings.push(format!("{section}.fallbacks lists {kind:?} more than once"));
        }
        if let Some(what) = missing(*kind) {
            warnings.push(format!("{section} fallback {kind:?} requires {what}; it will always fail"));
        }
    }
}

fn stt_missing_credential(p: &ProvidersConfig, kind: SttProviderKind) -> Option<&'static str> {
    match kind {
        SttProviderKind::OpenAi if p.openai.resolve_api_key().is_none() => Some("an OpenAI API key"),
        SttProviderKind::Groq if p.groq.resolve_api_key().is_none() => Some("a Groq API key"),
        _ => None,
    }
}

fn completion_missing_credential(
    p: &ProvidersConfig,
    kind: CompletionProviderKind,
) -> Option<&'static str> {
    match kind {
        CompletionProviderKind::OpenAi if p.openai.resolve_api_key().is_none() => {
            Some("an OpenAI API key")
        }
        CompletionProviderKind::CustomGpt
            if p.customgpt.resolve_api_key().is_none()
                || p.customgpt.resolve_project_id().is_none() =>
        {
            Some("a CustomGPT API key and project id")
        }
        _ => None,
    }
}

fn tts_missing_credential(p: &ProvidersConfig, kind: TtsProviderKind) -> Option<&'static str> {
    match kind {
        TtsProviderKind::OpenAi if p.openai.resolve_api_key().is_none() => Some("an OpenAI API key"),
        TtsProviderKind::ElevenLabs if p.elevenlabs.resolve_api_key().is_none() => {
            Some("an ElevenLabs API key")
        }
        _ => None,
    }
}

/// Base directory for Voice Relay data: `~/.voice_relay/`
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".voice_relay")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keyed() -> Config {
        let mut config = Config::default();
        config.providers.openai.api_key = Some("sk-test".into());
        config
    }

    #[test]
    fn test_env_var_substitution() {
        // SAFETY: test-only, variable name unique to this test
        unsafe { std::env::set_var("TEST_VR_KEY", "sk-test-123") };
        let input = r#"{"key": "${TEST_VR_KEY}", "other": "plain"}"#;
        let result = substitute_env_vars(input);
        assert!(result.contains("sk-test-123"));
        assert!(result.contains("plain"));
        unsafe { std::env::remove_var("TEST_VR_KEY") };
    }

    #[test]
    fn test_env_var_missing() {
        let input = r#"{"key": "${NONEXISTENT_VAR_VR_TEST}"}"#;
        let result = substitute_env_vars(input);
        assert!(result.contains(r#""""#));
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server_port(), 8000);
        assert_eq!(config.pipeline.max_history_turns, 10);
        assert_eq!(config.pipeline.max_audio_bytes, 10 * 1024 * 1024);
        assert_eq!(config.stages.stt.timeout(), Duration::from_secs(30));
        assert_eq!(config.stages.ai.timeout(), Duration::from_secs(60));
        assert_eq!(config.stages.tts.timeout(), Duration::from_secs(120));
        assert_eq!(config.stages.ai.retry, RetryConfig::ai());
        assert_eq!(
            config.tts.fallbacks,
            vec![TtsProviderKind::StreamElements, TtsProviderKind::GoogleTranslate]
        );
    }

    #[test]
    fn test_json5_overrides() {
        let raw = r#"{
            // trailing commas and comments are fine
            stages: { stt: { timeout_secs: 5, retry: { max_attempts: 1 } } },
            tts: { primary: "elevenlabs", fallbacks: ["google_translate"] },
            ai: { primary: "customgpt", fallbacks: ["openai", "template"] },
        }"#;
        let config = Config::from_json5(raw).unwrap();
        assert_eq!(config.stages.stt.timeout_secs, 5);
        assert_eq!(config.stages.stt.retry.max_attempts, 1);
        assert_eq!(config.stages.ai.timeout_secs, 60);
        assert_eq!(config.tts.primary, TtsProviderKind::ElevenLabs);
        assert_eq!(config.ai.fallbacks.len(), 2);
    }

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config.server_port(), 8000);
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        Config::default().save(&path).unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.stages.ai.timeout_secs, 60);
        assert_eq!(config.stages.stt.retry, RetryConfig::stt());
    }

    #[test]
    fn test_unknown_provider_kind_is_config_error() {
        let err = Config::from_json5(r#"{ tts: { primary: "carrier_pigeon" } }"#).unwrap_err();
        assert!(matches!(err, crate::error::VoiceRelayError::Config(_)));
    }

    #[test]
    fn test_resolve_secret_direct_wins() {
        // SAFETY: test-only, variable name unique to this test
        unsafe { std::env::set_var("TEST_VR_SECRET", "from-env") };
        assert_eq!(
            resolve_secret_field(&None, &Some("TEST_VR_SECRET".into())),
            Some("from-env".into())
        );
        assert_eq!(
            resolve_secret_field(&Some("direct".into()), &Some("TEST_VR_SECRET".into())),
            Some("direct".into())
        );
        unsafe { std::env::remove_var("TEST_VR_SECRET") };
    }

    #[test]
    fn test_validate_bad_retry_is_error() {
        let mut config = keyed();
        config.stages.ai.retry.base_delay_ms = 20_000;
        let (_warnings, errors) = config.validate();
        assert!(
            errors.iter().any(|e| e.contains("stages.ai.retry")),
            "Expected retry error, got: {errors:?}"
        );
    }

    #[test]
    fn test_validate_zero_timeout_is_error() {
        let mut config = keyed();
        config.stages.tts.timeout_secs = 0;
        let (_warnings, errors) = config.validate();
        assert!(errors.iter().any(|e| e.contains("stages.tts.timeout_secs")));
    }

    #[test]
    fn test_validate_missing_fallback_key_warns() {
        let mut config = keyed();
        config.tts.fallbacks = vec![TtsProviderKind::ElevenLabs, TtsProviderKind::ElevenLabs];
        config.providers.elevenlabs.api_key_env = Some("VR_TEST_NO_SUCH_VAR".into());
        let (warnings, _errors) = config.validate();
        assert!(warnings.iter().any(|w| w.contains("more than once")));
    }

    #[test]
    fn test_get_path() {
        let config = Config::default();
        assert_eq!(
            config.get_path("stages.ai.timeout_secs"),
            Some(serde_json::json!(60))
        );
        assert!(config.get_path("no.such.path").is_none());
    }

    #[test]
    fn test_logging_config_defaults() {
        let config = Config::from_json5(r#"{ "logging": {} }"#).unwrap();
        let logging = config.logging.expect("logging should be present");
        assert_eq!(logging.format, "plain");
        assert!(logging.level.is_none());
        assert_eq!(logging.output, "stderr");
        assert!(logging.filters.is_empty());
    }
}
