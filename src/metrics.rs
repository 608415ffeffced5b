//! Metrics definitions for the processor.
//!
//! Metrics are recorded through the `metrics` facade and exported to
//! Prometheus via `metrics-exporter-prometheus` when enabled in config.

use ::metrics::{counter, describe_counter, describe_gauge, gauge};
use bigdecimal::{BigDecimal, ToPrimitive};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

use crate::handlers::context::Meter;
use crate::records::ErrorType;

pub const BALANCE_GAUGE: &str = "usr_balance";
pub const TOTAL_SUPPLY_GAUGE: &str = "usr_total_supply";

/// Initialize all metric descriptions.
/// Call this once at startup before any metrics are recorded.
pub fn init_metrics() {
    describe_gauge!(BALANCE_GAUGE, "Latest USR balance of a holder, in tokens");
    describe_gauge!(TOTAL_SUPPLY_GAUGE, "Latest USR total supply, in tokens");
    describe_counter!(
        "usr_processor_errors_total",
        "Total number of error records emitted, by error type"
    );
    describe_counter!(
        "usr_blocks_processed_total",
        "Total number of blocks covered by processed ranges"
    );
}

/// Start the Prometheus HTTP listener and install it as the global recorder.
pub fn install_exporter(listen: SocketAddr) -> eyre::Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(listen)
        .install()
        .map_err(|e| eyre::eyre!("Failed to install Prometheus exporter on {}: {}", listen, e))?;
    init_metrics();
    Ok(())
}

/// Record an emitted error record.
pub fn record_handler_error(error_type: ErrorType) {
    counter!("usr_processor_errors_total", "error_type" => error_type.as_str()).increment(1);
}

/// Record a processed block range.
pub fn record_blocks_processed(count: u64) {
    counter!("usr_blocks_processed_total").increment(count);
}

/// [`Meter`] backed by the global `metrics` recorder.
#[derive(Debug, Default, Clone, Copy)]
pub struct PrometheusMeter;

impl Meter for PrometheusMeter {
    fn record_gauge(&self, name: &'static str, value: &BigDecimal, labels: &[(&'static str, String)]) {
        let Some(value) = value.to_f64() else {
            tracing::warn!(gauge = name, value = %value, "Gauge value not representable as f64, skipping");
            return;
        };
        gauge!(name, labels).set(value);
    }
}
