//! Shared HTTP plumbing for provider clients.

use std::path::Path;
use std::sync::Arc;

use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use voice_relay_core::error::ProviderError;
use voice_relay_core::types::truncate_chars;
use voice_relay_media::{AudioStream, TempAudioFile};

/// Upstream error bodies are clipped to this many characters.
const MAX_ERROR_BODY_CHARS: usize = 500;

/// Map a transport failure onto the provider error taxonomy.
pub(crate) fn transport_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout(e.to_string())
    } else if e.is_connect() || e.is_request() || e.is_body() {
        ProviderError::Connection(e.to_string())
    } else if e.is_decode() {
        ProviderError::InvalidResponse(e.to_string())
    } else if let Some(status) = e.status() {
        ProviderError::Http {
            status: status.as_u16(),
            body: e.to_string(),
        }
    } else {
        ProviderError::Other(e.to_string())
    }
}

/// Pass successful responses through; turn anything else into `ProviderError::Http`.
pub(crate) async fn ensure_success(
    resp: reqwest::Response,
) -> Result<reqwest::Response, ProviderError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(ProviderError::Http {
        status: status.as_u16(),
        body: truncate_chars(body.trim(), MAX_ERROR_BODY_CHARS).to_string(),
    })
}

pub(crate) fn not_configured(provider: &str, what: &str) -> ProviderError {
    ProviderError::NotConfigured(format!("{provider}: no {what} configured"))
}

pub(crate) fn trim_base_url(url: Option<&str>, default: &str) -> String {
    url.unwrap_or(default).trim_end_matches('/').to_string()
}

/// Response bodies written in order into one temp audio file, which is
/// removed if spooling fails or once the resulting stream is released.
pub(crate) struct Spool {
    file: Arc<TempAudioFile>,
    handle: tokio::fs::File,
    written: u64,
}

impl Spool {
    pub(crate) async fn create(dir: &Path, prefix: &str) -> Result<Self, ProviderError> {
        tokio::fs::create_dir_all(dir).await.map_err(spool_error)?;
        let file = Arc::new(TempAudioFile::reserve(dir, prefix, "mp3"));
        let handle = tokio::fs::File::create(file.path())
            .await
            .map_err(spool_error)?;
        Ok(Self {
            file,
            handle,
            written: 0,
        })
    }

    pub(crate) async fn append(&mut self, resp: reqwest::Response) -> Result<(), ProviderError> {
        let mut body = Box::pin(resp.bytes_stream());
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(transport_error)?;
            self.handle.write_all(&chunk).await.map_err(spool_error)?;
            self.written += chunk.len() as u64;
        }
        Ok(())
    }

    pub(crate) async fn finish(mut self) -> Result<AudioStream, ProviderError> {
        self.handle.flush().await.map_err(spool_error)?;
        if self.written == 0 {
            return Err(ProviderError::InvalidResponse("empty audio body".into()));
        }
        debug!(path = %self.file.path().display(), bytes = self.written, "Spooled audio to temp file");
        let Self { file, handle, .. } = self;
        drop(handle);
        AudioStream::from_file(file).await.map_err(spool_error)
    }
}

fn spool_error(e: std::io::Error) -> ProviderError {
    ProviderError::Other(format!("temp audio file: {e}"))
}
