//! HTTP gateway for the Voice Relay pipeline.
//!
//! Accepts recorded audio, runs it through the inference pipeline, and
//! streams the synthesized reply back with the transcript, reply text and
//! updated conversation carried in response headers.

pub mod capabilities;
pub mod error;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod rate_limit;
pub mod routes;
pub mod server;
pub mod state;

pub use capabilities::Capabilities;
pub use error::ApiError;
pub use server::{build_router, serve, start_server};
pub use state::AppState;
