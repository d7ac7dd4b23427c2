//! Prometheus Metrics
//!
//! Counters and gauges for the device plane and the measurement paths,
//! exposed as text on `/metrics`.

use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

/// Broker-wide metrics handle. Cheap to clone; all clones share the same
/// underlying registry.
#[derive(Clone)]
pub struct BrokerMetrics {
    registry: Registry,
    pub connections_total: IntCounter,
    pub connections_active: IntGauge,
    pub connection_errors: IntCounter,
    pub measurements_total: IntCounter,
    pub bursts_total: IntCounter,
}

impl BrokerMetrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let connections_total = IntCounter::new(
            "timesync_connections_total",
            "Device WebSocket connections accepted",
        )
        .expect("metric definition");
        let connections_active = IntGauge::new(
            "timesync_connections_active",
            "Device WebSocket connections currently open",
        )
        .expect("metric definition");
        let connection_errors = IntCounter::new(
            "timesync_connection_errors_total",
            "Device WebSocket handshakes that failed",
        )
        .expect("metric definition");
        let measurements_total = IntCounter::new(
            "timesync_measurements_total",
            "Single measurements requested over HTTP",
        )
        .expect("metric definition");
        let bursts_total = IntCounter::new(
            "timesync_bursts_total",
            "Multi-sample bursts requested over HTTP",
        )
        .expect("metric definition");

        registry
            .register(Box::new(connections_total.clone()))
            .expect("metric registration");
        registry
            .register(Box::new(connections_active.clone()))
            .expect("metric registration");
        registry
            .register(Box::new(connection_errors.clone()))
            .expect("metric registration");
        registry
            .register(Box::new(measurements_total.clone()))
            .expect("metric registration");
        registry
            .register(Box::new(bursts_total.clone()))
            .expect("metric registration");

        BrokerMetrics {
            registry,
            connections_total,
            connections_active,
            connection_errors,
            measurements_total,
            bursts_total,
        }
    }

    /// Renders the registry in the Prometheus text format.
    pub fn encode(&self) -> String {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        if encoder.encode(&self.registry.gather(), &mut buffer).is_err() {
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

impl Default for BrokerMetrics {
    fn default() -> Self {
        Self::new()
    }
}
