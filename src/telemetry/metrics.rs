//! Metrics collaborator: named counters, gauges and histograms.
//!
//! This crate owns no metric registry; it only calls into whatever is
//! injected here. No concrete Prometheus/OpenTelemetry exporter ships.

pub trait Metrics: Send + Sync {
    fn incr_counter(&self, name: &str, value: u64);
    fn set_gauge(&self, name: &str, value: f64);
    fn record_histogram(&self, name: &str, value: f64);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl Metrics for NoopMetrics {
    fn incr_counter(&self, _name: &str, _value: u64) {}
    fn set_gauge(&self, _name: &str, _value: f64) {}
    fn record_histogram(&self, _name: &str, _value: f64) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_metrics_accepts_any_call() {
        let metrics = NoopMetrics;
        metrics.incr_counter("resilience.retry.attempts", 1);
        metrics.set_gauge("resilience.bulkhead.in_flight", 3.0);
        metrics.record_histogram("resilience.timeout.elapsed_ms", 12.5);
    }
}
