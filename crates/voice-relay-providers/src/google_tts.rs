//! Google Translate text-to-speech.
//!
//! The endpoint only accepts short inputs, so text is split into segments
//! on word boundaries and the resulting MP3 frames are concatenated into one
//! temp file.

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::debug;

use voice_relay_core::config::GoogleTtsConfig;
use voice_relay_core::error::ProviderError;
use voice_relay_media::AudioStream;

use crate::http::{Spool, ensure_success, transport_error, trim_base_url};
use crate::{Provider, TextToSpeechProvider, VoiceOptions};

const GOOGLE_TTS_BASE_URL: &str = "https://translate.google.com";
const MAX_SEGMENT_CHARS: usize = 100;

pub struct GoogleTranslateSpeech {
    base_url: String,
    scratch_dir: PathBuf,
    client: reqwest::Client,
}

impl GoogleTranslateSpeech {
    pub fn new(config: &GoogleTtsConfig, scratch_dir: PathBuf) -> Self {
        Self {
            base_url: trim_base_url(config.base_url.as_deref(), GOOGLE_TTS_BASE_URL),
            scratch_dir,
            client: reqwest::Client::new(),
        }
    }
}

/// Split text into segments of at most `max_chars` characters, breaking on
/// whitespace where possible.
pub fn split_segments(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut current_chars = 0usize;

    for word in text.split_whitespace() {
        let mut word_chars: Vec<char> = word.chars().collect();

        // Hard-split words that alone exceed the limit.
        while word_chars.len() > max_chars {
            if !current.is_empty() {
                segments.push(std::mem::take(&mut current));
                current_chars = 0;
            }
            let rest = word_chars.split_off(max_chars);
            segments.push(word_chars.into_iter().collect());
            word_chars = rest;
        }

        let len = word_chars.len();
        let needed = if current.is_empty() { len } else { len + 1 };
        if current_chars + needed > max_chars {
            segments.push(std::mem::take(&mut current));
            current_chars = 0;
        }
        if !current.is_empty() {
            current.push(' ');
            current_chars += 1;
        }
        current.extend(word_chars);
        current_chars += len;
    }

    if !current.is_empty() {
        segments.push(current);
    }
    segments
}

impl Provider for GoogleTranslateSpeech {
    fn id(&self) -> &str {
        "google_translate"
    }
}

#[async_trait]
impl TextToSpeechProvider for GoogleTranslateSpeech {
    async fn synthesize(
        &self,
        text: &str,
        options: &VoiceOptions,
    ) -> Result<AudioStream, ProviderError> {
        let segments = split_segments(text, MAX_SEGMENT_CHARS);
        if segments.is_empty() {
            return Err(ProviderError::InvalidResponse("nothing to synthesize".into()));
        }
        let language = if options.language.is_empty() {
            "en"
        } else {
            options.language.as_str()
        };
        debug!(segments = segments.len(), language, "Requesting Google Translate speech");

        let url = format!("{}/translate_tts", self.base_url);
        let total = segments.len().to_string();
        let mut spool = Spool::create(&self.scratch_dir, "tts_google").await?;

        for (idx, segment) in segments.iter().enumerate() {
            let idx = idx.to_string();
            let textlen = segment.chars().count().to_string();
            let resp = self
                .client
                .get(&url)
                .query(&[
                    ("ie", "UTF-8"),
                    ("client", "tw-ob"),
                    ("tl", language),
                    ("q", segment.as_str()),
                    ("total", total.as_str()),
                    ("idx", idx.as_str()),
                    ("textlen", textlen.as_str()),
                ])
                .send()
                .await
                .map_err(transport_error)?;
            spool.append(ensure_success(resp).await?).await?;
        }

        spool.finish().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_text_single_segment() {
        assert_eq!(split_segments("hello there", 100), vec!["hello there"]);
    }

    #[test]
    fn test_splits_on_word_boundaries() {
        let segments = split_segments("aaa bbb ccc ddd", 7);
        assert_eq!(segments, vec!["aaa bbb", "ccc ddd"]);
        assert!(segments.iter().all(|s| s.chars().count() <= 7));
    }

    #[test]
    fn test_hard_splits_long_word() {
        let segments = split_segments("ab abcdefghij", 4);
        assert_eq!(segments, vec!["ab", "abcd", "efgh", "ij"]);
    }

    #[test]
    fn test_whitespace_only_is_empty() {
        assert!(split_segments("   \n ", 100).is_empty());
    }
}
