//! HTTP handlers.

use std::time::Duration;

use axum::Json;
use axum::body::Body;
use axum::extract::{Multipart, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, header};
use axum::response::{IntoResponse, Response};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use voice_relay_core::types::{truncate_bytes, truncate_chars};
use voice_relay_media::{AudioStream, AudioUpload};
use voice_relay_pipeline::{PipelineRequest, PipelineResponse};

use crate::error::ApiError;
use crate::state::AppState;

pub const CONVERSATION_HEADER: &str = "x-conversation";

const AUDIO_MPEG: &str = "audio/mpeg";

const EXPOSED_HEADERS: &str = "X-Transcript, X-AI-Response, X-Conversation, X-STT-Time, \
     X-AI-Time, X-TTS-Time, X-STT-Provider, X-AI-Provider, X-TTS-Provider";

/// `POST /inference`: audio in, synthesized reply out.
pub async fn inference(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<Response, ApiError> {
    let audio = read_audio_field(multipart).await?;
    let conversation = headers
        .get(CONVERSATION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    debug!(
        audio_bytes = audio.len(),
        has_history = conversation.is_some(),
        "Inference request"
    );

    let result = state
        .pipeline
        .process(PipelineRequest { audio, conversation })
        .await;

    #[cfg(feature = "metrics")]
    record_outcome(&result);

    let response = result?;
    inference_response(&state, response)
}

#[cfg(feature = "metrics")]
fn record_outcome(result: &Result<PipelineResponse, voice_relay_pipeline::PipelineError>) {
    match result {
        Ok(response) => {
            crate::metrics::record_inference("ok");
            crate::metrics::record_pipeline(&response.metadata);
        }
        Err(e) => {
            crate::metrics::record_inference(e.kind());
            crate::metrics::record_error(e.kind());
        }
    }
}

fn inference_response(state: &AppState, response: PipelineResponse) -> Result<Response, ApiError> {
    let PipelineResponse { audio, metadata } = response;
    let limits = state.pipeline.limits();

    let transcript = truncate_chars(&metadata.transcript, limits.transcript_header_chars);
    // Keep the encoded value within the header budget: 4 base64 chars per 3 bytes.
    let reply_budget = limits.reply_header_bytes / 4 * 3;
    let reply = truncate_bytes(&metadata.reply, reply_budget);

    let mut builder = audio_response_builder()
        .header("X-Transcript", STANDARD.encode(transcript))
        .header("X-AI-Response", STANDARD.encode(reply))
        .header("X-Conversation", metadata.encoded_history.as_str());

    for (name, report) in [
        ("STT", &metadata.stt),
        ("AI", &metadata.ai),
        ("TTS", &metadata.tts),
    ] {
        builder = builder
            .header(format!("X-{name}-Time"), seconds(report.elapsed))
            .header(format!("X-{name}-Provider"), header_text(&report.provider));
    }

    info!(
        transcript_chars = metadata.transcript.chars().count(),
        history_turns = metadata.history.len(),
        "Streaming inference response"
    );

    builder
        .body(stream_body(audio))
        .map_err(|e| ApiError::internal(format!("failed to build response: {e}")))
}

#[derive(Debug, Deserialize)]
pub struct SpeakRequest {
    pub text: String,
}

/// `POST /api/tts`: text in, audio out. Runs only the TTS stage.
pub async fn speak(
    State(state): State<AppState>,
    Json(request): Json<SpeakRequest>,
) -> Result<Response, ApiError> {
    let outcome = state.pipeline.speak(&request.text).await?;

    #[cfg(feature = "metrics")]
    crate::metrics::record_stage(voice_relay_providers::ServiceType::Tts, &outcome.report);

    audio_response_builder()
        .header("X-TTS-Time", seconds(outcome.report.elapsed))
        .header("X-TTS-Provider", header_text(&outcome.report.provider))
        .body(stream_body(outcome.value))
        .map_err(|e| ApiError::internal(format!("failed to build response: {e}")))
}

#[derive(Debug, Serialize)]
pub struct TranscribeResponse {
    pub transcript: String,
    pub provider: String,
    pub fallback_level: usize,
    pub elapsed_secs: f64,
}

/// `POST /api/transcribe`: audio in, JSON transcript out. Runs only the STT stage.
pub async fn transcribe(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<TranscribeResponse>, ApiError> {
    let audio = read_audio_field(multipart).await?;
    let outcome = state.pipeline.transcribe(&audio).await?;

    #[cfg(feature = "metrics")]
    crate::metrics::record_stage(voice_relay_providers::ServiceType::Stt, &outcome.report);

    Ok(Json(TranscribeResponse {
        transcript: outcome.value,
        provider: outcome.report.provider,
        fallback_level: outcome.report.fallback_level,
        elapsed_secs: outcome.report.elapsed.as_secs_f64(),
    }))
}

/// `GET /api/capabilities`
pub async fn capabilities(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.capabilities.as_ref().clone())
}

/// `GET /health`
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "voice_mode_enabled": state.capabilities.voice_mode_enabled,
    }))
}

/// `GET /metrics`
#[cfg(feature = "metrics")]
pub async fn metrics(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => handle.render().into_response(),
        None => axum::http::StatusCode::NOT_FOUND.into_response(),
    }
}

/// Pull the `audio` file field out of a multipart body.
async fn read_audio_field(mut multipart: Multipart) -> Result<AudioUpload, ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(ApiError::from_multipart)?
    {
        if field.name() != Some("audio") {
            continue;
        }
        let content_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        let file_name = field.file_name().map(str::to_string);
        let bytes = field.bytes().await.map_err(ApiError::from_multipart)?;

        let upload = AudioUpload::new(bytes, content_type);
        return Ok(match file_name {
            Some(name) => upload.with_file_name(name),
            None => upload,
        });
    }
    Err(ApiError::bad_request(
        "Missing audio input (expected multipart 'audio' file field)",
    ))
}

fn audio_response_builder() -> axum::http::response::Builder {
    Response::builder()
        .header(header::CONTENT_TYPE, AUDIO_MPEG)
        .header(header::CACHE_CONTROL, "no-cache")
        .header(HeaderName::from_static("x-accel-buffering"), "no")
        .header(header::ACCESS_CONTROL_EXPOSE_HEADERS, EXPOSED_HEADERS)
}

fn stream_body(audio: AudioStream) -> Body {
    Body::from_stream(audio)
}

fn seconds(elapsed: Duration) -> String {
    format!("{:.3}", elapsed.as_secs_f64())
}

/// Provider ids are ASCII in practice; anything else is dropped rather than
/// failing the response.
fn header_text(value: &str) -> HeaderValue {
    HeaderValue::from_str(value).unwrap_or_else(|_| HeaderValue::from_static("unknown"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seconds_format() {
        assert_eq!(seconds(Duration::from_millis(1234)), "1.234");
        assert_eq!(seconds(Duration::ZERO), "0.000");
    }

    #[test]
    fn test_header_text_rejects_control_chars() {
        assert_eq!(header_text("openai"), "openai");
        assert_eq!(header_text("bad\nvalue"), "unknown");
    }
}
