//! Lazily produced audio byte streams with scoped cleanup.
//!
//! An [`AudioStream`] owns whatever it needs to release when the consumer is
//! done with it: a temp file, an upstream connection, a request-scoped
//! buffer. Release happens when the stream ends, errors, or is dropped
//! before completion, whichever comes first.

use std::fmt;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt, TryStreamExt};
use pin_project_lite::pin_project;
use tokio_util::io::ReaderStream;
use tracing::trace;

use crate::temp_file::TempAudioFile;

/// Runs a release action once, on drop.
pub struct CleanupGuard {
    action: Option<Box<dyn FnOnce() + Send>>,
}

impl CleanupGuard {
    pub fn new(action: impl FnOnce() + Send + 'static) -> Self {
        Self {
            action: Some(Box::new(action)),
        }
    }

    /// Remove `file` when the guard fires.
    pub fn remove_file(file: Arc<TempAudioFile>) -> Self {
        Self::new(move || {
            file.remove();
        })
    }

    /// Keep `value` alive until the guard fires.
    pub fn hold<T: Send + 'static>(value: T) -> Self {
        Self::new(move || drop(value))
    }

    fn fire(&mut self) {
        if let Some(action) = self.action.take() {
            action();
        }
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        self.fire();
    }
}

impl fmt::Debug for CleanupGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CleanupGuard")
            .field("armed", &self.action.is_some())
            .finish()
    }
}

pin_project! {
    /// Byte stream of synthesized audio.
    pub struct AudioStream {
        #[pin]
        inner: BoxStream<'static, io::Result<Bytes>>,
        guards: Vec<CleanupGuard>,
        done: bool,
    }
}

impl AudioStream {
    pub fn new<S>(stream: S) -> Self
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        Self {
            inner: stream.boxed(),
            guards: Vec::new(),
            done: false,
        }
    }

    pub fn empty() -> Self {
        Self::new(futures::stream::empty())
    }

    /// A stream that yields `chunks` in order.
    pub fn from_chunks<I, B>(chunks: I) -> Self
    where
        I: IntoIterator<Item = B>,
        I::IntoIter: Send + 'static,
        B: Into<Bytes>,
    {
        Self::new(futures::stream::iter(
            chunks.into_iter().map(|c| Ok(c.into())),
        ))
    }

    /// Stream an HTTP response body chunk by chunk.
    ///
    /// Dropping the stream drops the response, which closes the connection.
    pub fn from_response(response: reqwest::Response) -> Self {
        Self::new(response.bytes_stream().map_err(io::Error::other))
    }

    /// Stream a temp file from disk, removing it once the stream is released.
    pub async fn from_file(file: Arc<TempAudioFile>) -> io::Result<Self> {
        let handle = match tokio::fs::File::open(file.path()).await {
            Ok(handle) => handle,
            Err(e) => {
                file.remove();
                return Err(e);
            }
        };
        Ok(Self::new(ReaderStream::new(handle)).with_cleanup(CleanupGuard::remove_file(file)))
    }

    /// Attach another release action.
    pub fn with_cleanup(mut self, guard: CleanupGuard) -> Self {
        if self.done {
            drop(guard);
        } else {
            self.guards.push(guard);
        }
        self
    }

    /// Whether the stream has ended and released its resources.
    pub fn is_released(&self) -> bool {
        self.done
    }

    /// Wait for the first non-empty chunk.
    ///
    /// Returns `None` when the stream ends without producing any audio.
    /// Otherwise the returned stream replays that chunk before the rest.
    pub async fn primed(mut self) -> io::Result<Option<Self>> {
        loop {
            match self.next().await {
                Some(Ok(chunk)) if chunk.is_empty() => continue,
                Some(Ok(chunk)) => {
                    let replay = futures::stream::iter([Ok(chunk)]);
                    return Ok(Some(Self::new(replay.chain(self))));
                }
                Some(Err(e)) => return Err(e),
                None => return Ok(None),
            }
        }
    }

    /// Drain the whole stream into memory.
    pub async fn collect_bytes(mut self) -> io::Result<Vec<u8>> {
        let mut out = Vec::new();
        while let Some(chunk) = self.next().await {
            out.extend_from_slice(&chunk?);
        }
        Ok(out)
    }

    /// Drain the stream, keeping chunk boundaries.
    pub async fn collect_chunks(mut self) -> io::Result<Vec<Bytes>> {
        let mut out = Vec::new();
        while let Some(chunk) = self.next().await {
            out.push(chunk?);
        }
        Ok(out)
    }
}

impl Stream for AudioStream {
    type Item = io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();
        if *this.done {
            return Poll::Ready(None);
        }
        let item = futures::ready!(this.inner.poll_next(cx));
        match &item {
            Some(Ok(_)) => {}
            Some(Err(_)) | None => {
                *this.done = true;
                trace!(guards = this.guards.len(), "Audio stream finished, releasing");
                this.guards.clear();
            }
        }
        Poll::Ready(item)
    }
}

impl fmt::Debug for AudioStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioStream")
            .field("guards", &self.guards.len())
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_guard(counter: &Arc<AtomicUsize>) -> CleanupGuard {
        let counter = Arc::clone(counter);
        CleanupGuard::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[tokio::test]
    async fn test_chunks_arrive_in_order() {
        let stream = AudioStream::from_chunks([&b"RIFF"[..], b"....", b"end."]);
        let chunks = stream.collect_chunks().await.unwrap();
        assert_eq!(chunks, vec![
            Bytes::from_static(b"RIFF"),
            Bytes::from_static(b"...."),
            Bytes::from_static(b"end."),
        ]);
    }

    #[tokio::test]
    async fn test_cleanup_runs_once_on_drain() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut stream =
            AudioStream::from_chunks([&b"a"[..], b"b"]).with_cleanup(counting_guard(&counter));

        assert!(stream.next().await.is_some());
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert!(stream.next().await.is_some());
        assert!(stream.next().await.is_none());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(stream.is_released());

        drop(stream);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cleanup_runs_when_dropped_early() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut stream =
            AudioStream::from_chunks([&b"a"[..], b"b"]).with_cleanup(counting_guard(&counter));
        assert!(stream.next().await.is_some());
        drop(stream);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cleanup_runs_on_error() {
        let counter = Arc::new(AtomicUsize::new(0));
        let failing = futures::stream::iter(vec![
            Ok(Bytes::from_static(b"ok")),
            Err(io::Error::other("upstream reset")),
            Ok(Bytes::from_static(b"never")),
        ]);
        let stream = AudioStream::new(failing).with_cleanup(counting_guard(&counter));
        assert!(stream.collect_bytes().await.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_primed_replays_first_chunk() {
        let counter = Arc::new(AtomicUsize::new(0));
        let stream = AudioStream::from_chunks([&b""[..], b"one", b"two"])
            .with_cleanup(counting_guard(&counter));
        let primed = stream.primed().await.unwrap().expect("audio expected");
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        let chunks = primed.collect_chunks().await.unwrap();
        assert_eq!(chunks, vec![Bytes::from_static(b"one"), Bytes::from_static(b"two")]);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_primed_empty_stream_releases() {
        let counter = Arc::new(AtomicUsize::new(0));
        let stream = AudioStream::empty().with_cleanup(counting_guard(&counter));
        assert!(stream.primed().await.unwrap().is_none());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_file_stream_removes_file_after_drain() {
        let dir = tempfile::tempdir().unwrap();
        let file = Arc::new(
            TempAudioFile::create(dir.path(), "tts", "mp3", b"ID3 audio")
                .await
                .unwrap(),
        );
        let path = file.path().to_path_buf();

        let stream = AudioStream::from_file(Arc::clone(&file)).await.unwrap();
        drop(file);
        assert!(path.exists(), "file must outlive the handle while streaming");

        let bytes = stream.collect_bytes().await.unwrap();
        assert_eq!(bytes, b"ID3 audio");
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_file_stream_removes_file_when_aborted() {
        let dir = tempfile::tempdir().unwrap();
        let file = Arc::new(
            TempAudioFile::create(dir.path(), "tts", "mp3", b"ID3 audio")
                .await
                .unwrap(),
        );
        let path = file.path().to_path_buf();
        let stream = AudioStream::from_file(file).await.unwrap();
        drop(stream);
        assert!(!path.exists());
    }
}
