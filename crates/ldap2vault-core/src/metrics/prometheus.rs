//! Prometheus metrics for the LDAP bridge.

use prometheus::{
    HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

/// Bridge metrics collection.
pub struct BridgeMetrics {
    /// The Prometheus registry.
    pub registry: Registry,

    /// LDAP operations by operation name.
    pub operations_total: IntCounterVec,

    /// Operation latency histogram by operation name.
    pub operation_duration_seconds: HistogramVec,

    /// Bind attempts by phase and outcome.
    pub binds_total: IntCounterVec,

    /// Current active client connections.
    pub active_connections: IntGauge,

    /// Connections refused because the limit was reached.
    pub connections_rejected: IntCounter,

    /// Connections closed because of a protocol error.
    pub protocol_errors: IntCounter,
}

impl BridgeMetrics {
    /// Create a new metrics collection.
    ///
    /// # Panics
    ///
    /// Panics if metric registration fails (should not happen with unique names).
    #[must_use]
    pub fn new() -> Self {
        let registry = Registry::new();

        let operations_total = IntCounterVec::new(
            Opts::new(
                "ldap2vault_operations_total",
                "Total number of LDAP operations processed by operation",
            ),
            &["operation"],
        )
        .expect("metric creation should succeed");

        let operation_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "ldap2vault_operation_duration_seconds",
                "LDAP operation latency in seconds",
            )
            .buckets(vec![
                0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
            ]),
            &["operation"],
        )
        .expect("metric creation should succeed");

        let binds_total = IntCounterVec::new(
            Opts::new(
                "ldap2vault_binds_total",
                "Total number of bind attempts by phase and outcome",
            ),
            &["phase", "outcome"],
        )
        .expect("metric creation should succeed");

        let active_connections = IntGauge::new(
            "ldap2vault_active_connections",
            "Current number of active client connections",
        )
        .expect("metric creation should succeed");

        let connections_rejected = IntCounter::new(
            "ldap2vault_connections_rejected_total",
            "Total number of connections refused at the connection limit",
        )
        .expect("metric creation should succeed");

        let protocol_errors = IntCounter::new(
            "ldap2vault_protocol_errors_total",
            "Total number of connections closed on a protocol error",
        )
        .expect("metric creation should succeed");

        registry
            .register(Box::new(operations_total.clone()))
            .expect("metric registration should succeed");
        registry
            .register(Box::new(operation_duration_seconds.clone()))
            .expect("metric registration should succeed");
        registry
            .register(Box::new(binds_total.clone()))
            .expect("metric registration should succeed");
        registry
            .register(Box::new(active_connections.clone()))
            .expect("metric registration should succeed");
        registry
            .register(Box::new(connections_rejected.clone()))
            .expect("metric registration should succeed");
        registry
            .register(Box::new(protocol_errors.clone()))
            .expect("metric registration should succeed");

        Self {
            registry,
            operations_total,
            operation_duration_seconds,
            binds_total,
            active_connections,
            connections_rejected,
            protocol_errors,
        }
    }

    /// Record an operation and how long it took.
    pub fn record_operation(&self, operation: &str, duration_seconds: f64) {
        self.operations_total.with_label_values(&[operation]).inc();
        self.operation_duration_seconds
            .with_label_values(&[operation])
            .observe(duration_seconds);
    }

    /// Record a bind outcome.
    pub fn record_bind(&self, phase: &str, outcome: &str) {
        self.binds_total.with_label_values(&[phase, outcome]).inc();
    }

    pub fn inc_connections(&self) {
        self.active_connections.inc();
    }

    pub fn dec_connections(&self) {
        self.active_connections.dec();
    }

    pub fn record_rejected_connection(&self) {
        self.connections_rejected.inc();
    }

    pub fn record_protocol_error(&self) {
        self.protocol_errors.inc();
    }

    /// Encode metrics in Prometheus text format.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = String::new();
        encoder.encode_utf8(&metric_families, &mut buffer)?;
        Ok(buffer)
    }
}

impl Default for BridgeMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for BridgeMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeMetrics")
            .field("active_connections", &self.active_connections.get())
            .finish_non_exhaustive()
    }
}
