//! StreamElements text-to-speech.
//!
//! Keyless and fast, which makes it a good first fallback. The body is
//! spooled to a temp file before streaming so a dropped connection fails
//! the candidate instead of truncating audio already sent to the client.

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::debug;

use voice_relay_core::config::StreamElementsConfig;
use voice_relay_core::error::ProviderError;
use voice_relay_media::AudioStream;

use crate::http::{Spool, ensure_success, transport_error, trim_base_url};
use crate::{Provider, TextToSpeechProvider, VoiceOptions};

const STREAMELEMENTS_BASE_URL: &str = "https://api.streamelements.com";
const DEFAULT_VOICE: &str = "Salli";

pub struct StreamElementsSpeech {
    base_url: String,
    voice: String,
    scratch_dir: PathBuf,
    client: reqwest::Client,
}

impl StreamElementsSpeech {
    pub fn new(config: &StreamElementsConfig, scratch_dir: PathBuf) -> Self {
        Self {
            base_url: trim_base_url(config.base_url.as_deref(), STREAMELEMENTS_BASE_URL),
            voice: config.voice.clone().unwrap_or_else(|| DEFAULT_VOICE.into()),
            scratch_dir,
            client: reqwest::Client::new(),
        }
    }

    pub fn url(&self) -> String {
        format!("{}/kappa/v2/speech", self.base_url)
    }
}

impl Provider for StreamElementsSpeech {
    fn id(&self) -> &str {
        "streamelements"
    }
}

#[async_trait]
impl TextToSpeechProvider for StreamElementsSpeech {
    async fn synthesize(
        &self,
        text: &str,
        options: &VoiceOptions,
    ) -> Result<AudioStream, ProviderError> {
        let voice = options.voice.as_deref().unwrap_or(&self.voice);
        debug!(voice, text_len = text.len(), "Requesting StreamElements speech");

        let resp = self
            .client
            .get(self.url())
            .query(&[("voice", voice), ("text", text)])
            .send()
            .await
            .map_err(transport_error)?;
        let resp = ensure_success(resp).await?;

        let mut spool = Spool::create(&self.scratch_dir, "tts_streamelements").await?;
        spool.append(resp).await?;
        spool.finish().await
    }
}
