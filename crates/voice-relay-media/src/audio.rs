//! Uploaded audio and the checks applied before it reaches any provider.

use bytes::Bytes;
use thiserror::Error;

/// Why an upload was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AudioRejection {
    #[error("Invalid file type '{0}'. Please upload an audio file.")]
    NotAudio(String),

    #[error("No audio data provided")]
    Empty,

    #[error("Audio file too large ({size} bytes). Maximum size is {limit} bytes.")]
    TooLarge { size: usize, limit: usize },
}

/// Raw audio received from a client.
#[derive(Debug, Clone)]
pub struct AudioUpload {
    pub bytes: Bytes,
    pub content_type: String,
    pub file_name: Option<String>,
}

impl AudioUpload {
    pub fn new(bytes: impl Into<Bytes>, content_type: impl Into<String>) -> Self {
        Self {
            bytes: bytes.into(),
            content_type: content_type.into(),
            file_name: None,
        }
    }

    pub fn with_file_name(mut self, name: impl Into<String>) -> Self {
        self.file_name = Some(name.into());
        self
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Check type, emptiness and size, in that order.
    pub fn validate(&self, max_bytes: usize) -> Result<(), AudioRejection> {
        if !self.content_type.to_ascii_lowercase().contains("audio") {
            return Err(AudioRejection::NotAudio(self.content_type.clone()));
        }
        if self.bytes.is_empty() {
            return Err(AudioRejection::Empty);
        }
        if self.bytes.len() > max_bytes {
            return Err(AudioRejection::TooLarge {
                size: self.bytes.len(),
                limit: max_bytes,
            });
        }
        Ok(())
    }

    /// File extension matching the content type.
    pub fn extension(&self) -> &'static str {
        extension_for(&self.content_type)
    }

    /// Name sent to upstream transcription APIs, which sniff the format from it.
    pub fn upload_name(&self) -> String {
        match &self.file_name {
            Some(name) if name.contains('.') => name.clone(),
            _ => format!("audio.{}", self.extension()),
        }
    }

    /// MIME type without parameters (`audio/webm;codecs=opus` -> `audio/webm`).
    pub fn mime(&self) -> &str {
        self.content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
    }
}

/// Map an audio content type to a file extension. Browsers record webm by default.
pub fn extension_for(content_type: &str) -> &'static str {
    let ct = content_type.to_ascii_lowercase();
    match ct.as_str() {
        c if c.contains("webm") => "webm",
        c if c.contains("ogg") => "ogg",
        c if c.contains("wav") => "wav",
        c if c.contains("mp4") || c.contains("m4a") => "m4a",
        c if c.contains("mpeg") || c.contains("mp3") => "mp3",
        c if c.contains("flac") => "flac",
        _ => "webm",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_non_audio() {
        let upload = AudioUpload::new(vec![1, 2, 3], "text/plain");
        assert_eq!(
            upload.validate(10),
            Err(AudioRejection::NotAudio("text/plain".into()))
        );
    }

    #[test]
    fn test_rejects_empty_and_oversized() {
        assert_eq!(
            AudioUpload::new(Vec::new(), "audio/webm").validate(10),
            Err(AudioRejection::Empty)
        );
        assert_eq!(
            AudioUpload::new(vec![0; 11], "audio/webm").validate(10),
            Err(AudioRejection::TooLarge { size: 11, limit: 10 })
        );
        assert!(AudioUpload::new(vec![0; 10], "audio/webm").validate(10).is_ok());
    }

    #[test]
    fn test_upload_name_and_mime() {
        let upload = AudioUpload::new(vec![1], "audio/webm;codecs=opus");
        assert_eq!(upload.mime(), "audio/webm");
        assert_eq!(upload.upload_name(), "audio.webm");

        let named = AudioUpload::new(vec![1], "audio/wav").with_file_name("clip.wav");
        assert_eq!(named.upload_name(), "clip.wav");
    }

    #[test]
    fn test_extension_mapping() {
        assert_eq!(extension_for("audio/mpeg"), "mp3");
        assert_eq!(extension_for("audio/x-m4a"), "m4a");
        assert_eq!(extension_for("audio/whatever"), "webm");
    }
}
