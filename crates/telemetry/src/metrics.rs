use lazy_static::lazy_static;
use prometheus::{
    HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts,
    Registry,
};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // ==== Profile Store Metrics ====
    pub static ref FACE_ENROLLED_IDENTITIES: IntGauge = {
        let metric = IntGauge::new("face_enrolled_identities", "Number of enrolled identities")
            .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref FACE_STORE_OPERATIONS: IntCounterVec = {
        let metric = IntCounterVec::new(
            Opts::new(
                "face_store_operations_total",
                "Total number of profile store mutations",
            ),
            &["operation", "status"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref FACE_PERSIST_FAILURES: IntCounterVec = {
        let metric = IntCounterVec::new(
            Opts::new(
                "face_persist_failures_total",
                "Total number of failed writes to durable storage",
            ),
            &["target"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    // ==== Matcher Metrics ====
    pub static ref FACE_MATCHER_REBUILDS: IntCounter = {
        let metric = IntCounter::new(
            "face_matcher_rebuilds_total",
            "Total number of matcher index rebuilds",
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref FACE_MATCHER_INDEXED_VECTORS: IntGauge = {
        let metric = IntGauge::new(
            "face_matcher_indexed_vectors",
            "Number of reference vectors in the current matcher snapshot",
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    // ==== Recognition Pipeline Metrics ====
    pub static ref FACE_FRAMES_PROCESSED: IntCounterVec = {
        let metric = IntCounterVec::new(
            Opts::new(
                "face_frames_processed_total",
                "Total number of frames run through the recognition pipeline",
            ),
            &["extractor", "status"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref FACE_FRAMES_SKIPPED: IntCounter = {
        let metric = IntCounter::new(
            "face_frames_skipped_total",
            "Total number of frames dropped because a frame was already in flight",
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref FACE_DETECTIONS: IntCounterVec = {
        let metric = IntCounterVec::new(
            Opts::new(
                "face_detections_total",
                "Total number of detected faces by decision",
            ),
            &["decision"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref FACE_EXTRACTION_LATENCY: HistogramVec = {
        let metric = HistogramVec::new(
            HistogramOpts::new(
                "face_extraction_latency_seconds",
                "Latency of feature extraction calls",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.02, 0.05, 0.1, 0.2, 0.5, 1.0, 5.0]),
            &["extractor", "mode"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref FACE_PIPELINE_FPS: IntGauge = {
        let metric = IntGauge::new("face_pipeline_fps", "Frames per second seen by the monitor loop")
            .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    // ==== Extractor Metrics ====
    pub static ref FACE_EXTRACTOR_STATE: IntGaugeVec = {
        let metric = IntGaugeVec::new(
            Opts::new(
                "face_extractor_ready",
                "Extractor readiness (1=ready, 0=not ready)",
            ),
            &["extractor"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref FACE_EXTRACTOR_INIT_ATTEMPTS: IntCounterVec = {
        let metric = IntCounterVec::new(
            Opts::new(
                "face_extractor_init_attempts_total",
                "Total number of extractor initialization attempts",
            ),
            &["extractor", "status"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref FACE_INFERENCE_TIME: HistogramVec = {
        let metric = HistogramVec::new(
            HistogramOpts::new(
                "face_inference_time_seconds",
                "Time spent on model inference (excluding pre/post processing)",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.02, 0.05, 0.1, 0.2, 0.5, 1.0]),
            &["model", "execution_provider"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    // ==== Event Log Metrics ====
    pub static ref FACE_EVENTS: IntCounterVec = {
        let metric = IntCounterVec::new(
            Opts::new(
                "face_events_total",
                "Total number of recognition events offered to the event log",
            ),
            &["outcome"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };
}

/// Helper function to encode metrics for Prometheus scraping
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| {
        prometheus::Error::Msg(format!("Failed to convert metrics to UTF-8: {}", e))
    })
}
