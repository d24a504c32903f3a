use opentelemetry::{
    global,
    metrics::{Counter, Gauge, Histogram, MeterProvider},
};
use prometheus::Registry;

const INFERENCE_BOUNDARIES_MS: [f64; 9] =
    [10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0];

pub struct Metrics {
    captures: Counter<u64>,
    triggers: Counter<u64>,
    inference_duration: Histogram<u64>,
    camera_fps: Gauge<f64>,
    vehicle_total: Gauge<u64>,
    pub registry: Registry,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();
        let exporter = opentelemetry_prometheus::exporter()
            .with_registry(registry.clone())
            .build()
            .unwrap();

        let provider = opentelemetry_sdk::metrics::SdkMeterProvider::builder()
            .with_reader(exporter)
            .build();

        let meter = provider.meter("traffic_capture");
        global::set_meter_provider(provider);

        let captures = meter
            .u64_counter("captures_total")
            .with_description("Total number of completed capture pipeline runs")
            .build();

        let triggers = meter
            .u64_counter("serial_triggers_total")
            .with_description("Total number of inbound serial trigger tokens")
            .build();

        let inference_duration = meter
            .u64_histogram("inference_duration_ms")
            .with_boundaries(INFERENCE_BOUNDARIES_MS.to_vec())
            .with_description("Duration of detector calls in milliseconds")
            .build();

        let camera_fps = meter
            .f64_gauge("camera_fps")
            .with_description("Measured camera acquisition rate")
            .build();

        let vehicle_total = meter
            .u64_gauge("vehicle_total")
            .with_description("Vehicle total of the most recent detection")
            .build();

        Metrics {
            captures,
            triggers,
            inference_duration,
            camera_fps,
            vehicle_total,
            registry,
        }
    }

    pub fn record_capture(&self) {
        self.captures.add(1, &[]);
    }

    pub fn record_trigger(&self) {
        self.triggers.add(1, &[]);
    }

    pub fn record_inference_duration(&self, duration_ms: u64) {
        self.inference_duration.record(duration_ms, &[]);
    }

    pub fn record_camera_fps(&self, fps: f64) {
        self.camera_fps.record(fps, &[]);
    }

    pub fn record_vehicle_total(&self, total: u32) {
        self.vehicle_total.record(total as u64, &[]);
    }
}
