//! Prometheus metrics recording and endpoint.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use voice_relay_pipeline::{PipelineMetadata, StageReport};
use voice_relay_providers::ServiceType;

/// Install the Prometheus metrics recorder and return the handle for rendering.
pub fn install_prometheus_recorder() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

/// Record the outcome of one `/inference` request ("ok" or an error kind).
pub fn record_inference(outcome: &str) {
    let labels = [("outcome", outcome.to_string())];
    metrics::counter!("inference_requests_total", &labels).increment(1);
}

/// Record how long a stage took and which fallback level served it.
pub fn record_stage(stage: ServiceType, report: &StageReport) {
    let stage_label = [("stage", stage.as_str().to_string())];
    metrics::histogram!("stage_duration_seconds", &stage_label)
        .record(report.elapsed.as_secs_f64());
    if report.fallback_level > 0 {
        let labels = [
            ("stage", stage.as_str().to_string()),
            ("level", report.fallback_level.to_string()),
        ];
        metrics::counter!("stage_fallback_total", &labels).increment(1);
    }
}

pub fn record_pipeline(metadata: &PipelineMetadata) {
    record_stage(ServiceType::Stt, &metadata.stt);
    record_stage(ServiceType::Ai, &metadata.ai);
    record_stage(ServiceType::Tts, &metadata.tts);
}

/// Record an error of a given kind.
pub fn record_error(kind: &str) {
    let labels = [("kind", kind.to_string())];
    metrics::counter!("errors_total", &labels).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_recording_without_recorder_does_not_panic() {
        // The metrics crate falls back to a no-op recorder.
        record_inference("ok");
        record_error("stage_timeout");
        record_stage(ServiceType::Tts, &StageReport {
            provider: "streamelements".into(),
            fallback_level: 1,
            elapsed: Duration::from_millis(250),
        });
    }
}
