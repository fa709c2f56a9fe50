use prometheus::{
    Encoder, HistogramVec, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub stream_events_total: IntCounterVec,
    pub resolver_fetches_total: IntCounterVec,
    pub upstream_fetches_total: IntCounterVec,
    pub upstream_fetch_latency_seconds: HistogramVec,
    pub riders_tracked: IntGaugeVec,
    pub stream_connected: IntGauge,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let stream_events_total = IntCounterVec::new(
            Opts::new("stream_events_total", "Stream events by kind and merge outcome"),
            &["kind", "outcome"],
        )
        .expect("valid stream_events_total metric");

        let resolver_fetches_total = IntCounterVec::new(
            Opts::new(
                "resolver_fetches_total",
                "Detail fetches for riders first seen on the stream",
            ),
            &["outcome"],
        )
        .expect("valid resolver_fetches_total metric");

        let upstream_fetches_total = IntCounterVec::new(
            Opts::new("upstream_fetches_total", "Upstream REST fetches by operation and outcome"),
            &["operation", "outcome"],
        )
        .expect("valid upstream_fetches_total metric");

        let upstream_fetch_latency_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "upstream_fetch_latency_seconds",
                "Latency of upstream REST fetches in seconds",
            ),
            &["operation"],
        )
        .expect("valid upstream_fetch_latency_seconds metric");

        let riders_tracked = IntGaugeVec::new(
            Opts::new("riders_tracked", "Riders held in each role's store"),
            &["role"],
        )
        .expect("valid riders_tracked metric");

        let stream_connected = IntGauge::new("stream_connected", "1 while the event stream is up")
            .expect("valid stream_connected metric");

        registry
            .register(Box::new(stream_events_total.clone()))
            .expect("register stream_events_total");
        registry
            .register(Box::new(resolver_fetches_total.clone()))
            .expect("register resolver_fetches_total");
        registry
            .register(Box::new(upstream_fetches_total.clone()))
            .expect("register upstream_fetches_total");
        registry
            .register(Box::new(upstream_fetch_latency_seconds.clone()))
            .expect("register upstream_fetch_latency_seconds");
        registry
            .register(Box::new(riders_tracked.clone()))
            .expect("register riders_tracked");
        registry
            .register(Box::new(stream_connected.clone()))
            .expect("register stream_connected");

        Self {
            registry,
            stream_events_total,
            resolver_fetches_total,
            upstream_fetches_total,
            upstream_fetch_latency_seconds,
            riders_tracked,
            stream_connected,
        }
    }

    pub fn observe_fetch(&self, operation: &str, ok: bool, elapsed_secs: f64) {
        let outcome = if ok { "success" } else { "error" };
        self.upstream_fetches_total
            .with_label_values(&[operation, outcome])
            .inc();
        self.upstream_fetch_latency_seconds
            .with_label_values(&[operation])
            .observe(elapsed_secs);
    }

    pub fn encode(&self) -> Result<String, String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|err| format!("failed to encode metrics: {err}"))?;

        String::from_utf8(buffer).map_err(|err| format!("metrics are not valid utf8: {err}"))
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
