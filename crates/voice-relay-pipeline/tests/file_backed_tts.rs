//! Stage deadlines against a spooling TTS provider talking to a local server.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::routing::get;
use bytes::Bytes;
use futures::{StreamExt, stream};

use voice_relay_core::backoff::RetryConfig;
use voice_relay_core::config::StreamElementsConfig;
use voice_relay_pipeline::{PipelineError, Stage};
use voice_relay_providers::streamelements::StreamElementsSpeech;
use voice_relay_providers::{ServiceType, TextToSpeechProvider, VoiceOptions};

/// Sends one chunk, then holds the connection open far past any deadline.
async fn stalled_speech() -> Body {
    let first = stream::once(async { Ok::<_, std::io::Error>(Bytes::from_static(b"ID3first-")) });
    let late = stream::once(async {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(Bytes::from_static(b"too-late"))
    });
    Body::from_stream(first.chain(late))
}

async fn start_stalled_upstream() -> String {
    let app = Router::new().route("/kappa/v2/speech", get(stalled_speech));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{addr}")
}

fn scratch_entries(dir: &Path) -> usize {
    std::fs::read_dir(dir).map(|entries| entries.count()).unwrap_or(0)
}

// Real sockets are involved, so this runs on the wall clock rather than a
// paused one.
#[tokio::test]
async fn test_deadline_mid_download_removes_spool_file() {
    let base = start_stalled_upstream().await;
    let scratch = tempfile::tempdir().unwrap();
    let config = StreamElementsConfig {
        base_url: Some(base),
        ..StreamElementsConfig::default()
    };
    let speech: Arc<dyn TextToSpeechProvider> =
        Arc::new(StreamElementsSpeech::new(&config, scratch.path().to_path_buf()));

    let options = VoiceOptions::default();
    let stage = Stage::with_deadline(
        ServiceType::Tts,
        Duration::from_millis(500),
        RetryConfig::new(1, Duration::from_millis(10), Duration::from_millis(10)).without_jitter(),
        vec![speech],
    );

    let watch_dir = scratch.path().to_path_buf();
    let watcher = async move {
        for _ in 0..100 {
            if scratch_entries(&watch_dir) > 0 {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        false
    };
    let (result, saw_partial_file) =
        tokio::join!(stage.run(|p| p.synthesize("hello", &options)), watcher);

    assert!(saw_partial_file, "download never started spooling");
    match result {
        Err(PipelineError::StageTimeout { stage, .. }) => assert_eq!(stage, ServiceType::Tts),
        other => panic!("expected a TTS timeout, got {:?}", other.map(|o| o.report)),
    }
    assert_eq!(scratch_entries(scratch.path()), 0);
}
