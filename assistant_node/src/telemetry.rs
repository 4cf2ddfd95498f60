use opentelemetry::{
    global,
    metrics::{Counter, Histogram, MeterProvider},
    KeyValue,
};
use opentelemetry_sdk::metrics::SdkMeterProvider;
use prometheus::Registry;
use std::collections::HashSet;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Failed to build Prometheus exporter: {0}")]
    Exporter(String),
}

/// Node meters, exported through a Prometheus registry.
pub struct Metrics {
    frames_captured: Counter<u64>,
    frames_sampled: Counter<u64>,
    detections_narrated: Counter<u64>,
    voice_interactions: Counter<u64>,
    analysis_duration: Histogram<u64>,
    pub registry: Registry,
    _provider: SdkMeterProvider,
}

impl Metrics {
    pub fn new() -> Result<Self, TelemetryError> {
        let registry = Registry::new();
        let exporter = opentelemetry_prometheus::exporter()
            .with_registry(registry.clone())
            .build()
            .map_err(|e| TelemetryError::Exporter(e.to_string()))?;

        let provider = SdkMeterProvider::builder()
            .with_reader(exporter)
            .build();

        let meter = provider.meter("assistant_node");
        // Kept alive here as well so replacing the global does not shut it down.
        global::set_meter_provider(provider.clone());

        let frames_captured = meter
            .u64_counter("frames_captured")
            .with_description("Frames read from the camera")
            .build();

        let frames_sampled = meter
            .u64_counter("frames_sampled")
            .with_description("Frames enqueued for analysis")
            .build();

        let detections_narrated = meter
            .u64_counter("detections_narrated")
            .with_description("Detections spoken to the user")
            .build();

        let voice_interactions = meter
            .u64_counter("voice_interactions")
            .with_description("Completed or abandoned voice interactions")
            .build();

        let boundaries = generate_boundaries(&[(0, 500, 100), (500, 2000, 250), (2000, 10000, 2000)]);

        let analysis_duration = meter
            .u64_histogram("analysis_duration_ms")
            .with_boundaries(boundaries)
            .with_description("Time spent analyzing and narrating one sampled frame")
            .build();

        Ok(Metrics {
            frames_captured,
            frames_sampled,
            detections_narrated,
            voice_interactions,
            analysis_duration,
            registry,
            _provider: provider,
        })
    }

    pub fn record_frame_captured(&self) {
        self.frames_captured.add(1, &[]);
    }

    pub fn record_frame_sampled(&self) {
        self.frames_sampled.add(1, &[]);
    }

    pub fn record_detection_narrated(&self, label: &str) {
        let attributes = [KeyValue::new("label", label.to_string())];
        self.detections_narrated.add(1, &attributes);
    }

    pub fn record_voice_interaction(&self, outcome: &'static str) {
        let attributes = [KeyValue::new("outcome", outcome)];
        self.voice_interactions.add(1, &attributes);
    }

    pub fn record_analysis_duration(&self, duration_ms: u64) {
        self.analysis_duration.record(duration_ms, &[]);
    }
}

/// Bucket boundaries from `(start, end, step)` segments, deduplicated where
/// segments meet.
fn generate_boundaries(segments: &[(u64, u64, usize)]) -> Vec<f64> {
    let mut seen = HashSet::new();
    segments
        .iter()
        .flat_map(|&(start, end, step)| (start..=end).step_by(step.max(1)))
        .filter(|&x| seen.insert(x))
        .map(|x| x as f64)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_boundaries() {
        let segments = [(2, 22, 10), (22, 26, 2), (26, 46, 20), (46, 146, 100)];
        let get = generate_boundaries(&segments);
        let expected = vec![2.0, 12.0, 22.0, 24.0, 26.0, 46.0, 146.0];

        assert_eq!(get, expected);
    }

    #[test]
    fn test_counters_are_exported() -> Result<(), Box<dyn std::error::Error>> {
        let metrics = Metrics::new()?;
        metrics.record_frame_captured();
        metrics.record_frame_sampled();
        metrics.record_detection_narrated("chair");
        metrics.record_analysis_duration(120);

        let names: Vec<String> = metrics
            .registry
            .gather()
            .iter()
            .map(|family| family.get_name().to_string())
            .collect();

        assert!(names.iter().any(|n| n.starts_with("frames_captured")));
        assert!(names.iter().any(|n| n.starts_with("detections_narrated")));
        assert!(names.iter().any(|n| n.starts_with("analysis_duration_ms")));
        Ok(())
    }
}
