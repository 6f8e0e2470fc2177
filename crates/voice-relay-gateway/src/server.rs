//! Axum-based HTTP server.

use std::net::SocketAddr;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::http::HeaderValue;
use axum::middleware;
use axum::routing::{get, post};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::rate_limit::limit_requests;
use crate::routes;
use crate::state::AppState;

/// Room for multipart framing on top of the audio itself.
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

/// Build the application router.
pub fn build_router(state: AppState) -> Router {
    let body_limit = state.pipeline.limits().max_audio_bytes + MULTIPART_OVERHEAD_BYTES;

    // Rate limiting applies to the endpoints that reach paid providers.
    let pipeline_routes = Router::new()
        .route("/inference", post(routes::inference))
        .route("/api/tts", post(routes::speak))
        .route("/api/transcribe", post(routes::transcribe))
        .layer(DefaultBodyLimit::max(body_limit))
        .route_layer(middleware::from_fn_with_state(state.clone(), limit_requests));

    let app = Router::new()
        .merge(pipeline_routes)
        .route("/api/capabilities", get(routes::capabilities))
        .route("/health", get(routes::health));

    #[cfg(feature = "metrics")]
    let app = app.route("/metrics", get(routes::metrics));

    let cors = cors_layer(state.config.cors_origins());
    app.layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() {
        return layer.allow_origin(Any);
    }
    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                warn!(origin = %o, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(parsed)
}

/// Bind to the configured address and serve until Ctrl-C.
pub async fn start_server(state: AppState) -> anyhow::Result<()> {
    let addr = format!("{}:{}", state.config.bind_addr(), state.config.server_port());
    let listener = TcpListener::bind(&addr).await?;
    info!("Voice Relay listening on {addr}");
    serve(listener, state).await
}

/// Serve on an already bound listener until Ctrl-C.
pub async fn serve(listener: TcpListener, state: AppState) -> anyhow::Result<()> {
    let cleanup = state.rate_limiter.as_ref().map(|rl| rl.spawn_cleanup());
    let app = build_router(state);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    if let Some(handle) = cleanup {
        handle.abort();
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl-C, running until killed");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
