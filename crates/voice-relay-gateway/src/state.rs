//! Gateway shared state.

use std::sync::Arc;

use voice_relay_core::config::Config;
use voice_relay_pipeline::InferencePipeline;

use crate::capabilities::Capabilities;
use crate::rate_limit::RateLimiter;

/// Shared state handed to every handler. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub pipeline: Arc<InferencePipeline>,
    pub capabilities: Arc<Capabilities>,
    pub rate_limiter: Option<Arc<RateLimiter>>,
    #[cfg(feature = "metrics")]
    pub metrics: Option<metrics_exporter_prometheus::PrometheusHandle>,
}

impl AppState {
    pub fn new(config: Arc<Config>, pipeline: Arc<InferencePipeline>) -> Self {
        let rate_limiter = config
            .server
            .as_ref()
            .and_then(|s| s.rate_limit.as_ref())
            .map(|rl| Arc::new(RateLimiter::from_config(rl)));
        let capabilities = Arc::new(Capabilities::detect(&pipeline));

        Self {
            config,
            pipeline,
            capabilities,
            rate_limiter,
            #[cfg(feature = "metrics")]
            metrics: None,
        }
    }

    /// Build the pipeline from `config` and wrap both.
    pub fn from_config(config: Config) -> Self {
        let pipeline = Arc::new(InferencePipeline::from_config(&config));
        Self::new(Arc::new(config), pipeline)
    }

    #[cfg(feature = "metrics")]
    pub fn with_metrics(mut self, handle: metrics_exporter_prometheus::PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}
