use lazy_static::lazy_static;
use prometheus::{Counter, Encoder, Histogram, HistogramOpts, Opts, Registry, TextEncoder};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();
    pub static ref LINES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "ingestor_lines_total",
        "Total lines received from the transport reader"
    ))
    .unwrap();
    pub static ref DECODE_FAILURES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "ingestor_decode_failures_total",
        "Total inputs dropped because no wire shape decoded them"
    ))
    .unwrap();
    pub static ref READINGS_TOTAL: Counter = Counter::with_opts(Opts::new(
        "ingestor_readings_total",
        "Total readings persisted"
    ))
    .unwrap();
    pub static ref UNMATCHED_TOTAL: Counter = Counter::with_opts(Opts::new(
        "ingestor_unmatched_total",
        "Total decoded readings that resolved to no device"
    ))
    .unwrap();
    pub static ref DEVICES_CREATED_TOTAL: Counter = Counter::with_opts(Opts::new(
        "ingestor_devices_created_total",
        "Total devices created lazily on first contact"
    ))
    .unwrap();
    pub static ref PERSIST_FAILURES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "ingestor_persist_failures_total",
        "Total reading writes that failed (not retried)"
    ))
    .unwrap();
    pub static ref ANOMALIES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "ingestor_anomalies_total",
        "Total delta anomalies attached to readings"
    ))
    .unwrap();
    pub static ref EVENTS_PUBLISHED_TOTAL: Counter = Counter::with_opts(Opts::new(
        "ingestor_events_published_total",
        "Total events handed to the publisher"
    ))
    .unwrap();
    pub static ref TRANSPORT_RECONNECTS_TOTAL: Counter = Counter::with_opts(Opts::new(
        "ingestor_transport_reconnects_total",
        "Total transport reconnect attempts"
    ))
    .unwrap();
    pub static ref INGEST_LATENCY_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "ingestor_ingest_latency_seconds",
            "Time from decoded reading to published events"
        )
        .buckets(vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0
        ])
    )
    .unwrap();
}

pub fn init_metrics() {
    REGISTRY.register(Box::new(LINES_TOTAL.clone())).unwrap();
    REGISTRY
        .register(Box::new(DECODE_FAILURES_TOTAL.clone()))
        .unwrap();
    REGISTRY.register(Box::new(READINGS_TOTAL.clone())).unwrap();
    REGISTRY
        .register(Box::new(UNMATCHED_TOTAL.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(DEVICES_CREATED_TOTAL.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(PERSIST_FAILURES_TOTAL.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(ANOMALIES_TOTAL.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(EVENTS_PUBLISHED_TOTAL.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(TRANSPORT_RECONNECTS_TOTAL.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(INGEST_LATENCY_SECONDS.clone()))
        .unwrap();
}

pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}
