use prometheus::{
    Encoder, GaugeVec, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub transitions_total: IntCounterVec,
    pub errors_total: IntCounterVec,
    pub operation_seconds: HistogramVec,
    pub assignments_expired_total: IntCounterVec,
    pub courier_utilization: GaugeVec,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let transitions_total = IntCounterVec::new(
            Opts::new(
                "lifecycle_transitions_total",
                "Committed status transitions by entity and target status",
            ),
            &["entity", "status"],
        )
        .expect("valid lifecycle_transitions_total metric");

        let errors_total = IntCounterVec::new(
            Opts::new(
                "lifecycle_errors_total",
                "Rejected lifecycle operations by operation and error kind",
            ),
            &["operation", "kind"],
        )
        .expect("valid lifecycle_errors_total metric");

        let operation_seconds = HistogramVec::new(
            HistogramOpts::new(
                "lifecycle_operation_seconds",
                "Latency of lifecycle operations in seconds",
            ),
            &["operation", "outcome"],
        )
        .expect("valid lifecycle_operation_seconds metric");

        let assignments_expired_total = IntCounterVec::new(
            Opts::new(
                "assignments_expired_total",
                "Courier offers expired, by what noticed the deadline",
            ),
            &["trigger"],
        )
        .expect("valid assignments_expired_total metric");

        let courier_utilization = GaugeVec::new(
            Opts::new("courier_utilization", "Courier active deliveries over capacity [0..1]"),
            &["courier_id"],
        )
        .expect("valid courier_utilization metric");

        registry
            .register(Box::new(transitions_total.clone()))
            .expect("register lifecycle_transitions_total");
        registry
            .register(Box::new(errors_total.clone()))
            .expect("register lifecycle_errors_total");
        registry
            .register(Box::new(operation_seconds.clone()))
            .expect("register lifecycle_operation_seconds");
        registry
            .register(Box::new(assignments_expired_total.clone()))
            .expect("register assignments_expired_total");
        registry
            .register(Box::new(courier_utilization.clone()))
            .expect("register courier_utilization");

        Self {
            registry,
            transitions_total,
            errors_total,
            operation_seconds,
            assignments_expired_total,
            courier_utilization,
        }
    }

    pub fn record_transition(&self, entity: &str, status: &str) {
        self.transitions_total
            .with_label_values(&[entity, status])
            .inc();
    }

    pub fn record_outcome(&self, operation: &str, elapsed_secs: f64, error_kind: Option<&str>) {
        let outcome = if error_kind.is_some() { "error" } else { "success" };
        self.operation_seconds
            .with_label_values(&[operation, outcome])
            .observe(elapsed_secs);

        if let Some(kind) = error_kind {
            self.errors_total.with_label_values(&[operation, kind]).inc();
        }
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
