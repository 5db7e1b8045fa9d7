//! Tracing collaborator: spans named under the `resilience.*` namespace.
//!
//! Kept separate from `tracing`'s own `Span` type deliberately — this is a
//! thin contract a caller can implement against any tracer, OpenTelemetry
//! included, without this crate depending on a concrete exporter.

use std::fmt::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanKind {
    Internal,
    Client,
    Server,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanStatus {
    Ok,
    Error,
}

pub trait Span: Send {
    fn set_attribute(&mut self, key: &str, value: &dyn Display);
    fn set_status(&mut self, status: SpanStatus);
    fn record_exception(&mut self, message: &str);
    fn end(self: Box<Self>);
}

pub trait Tracer: Send + Sync {
    fn start_span(&self, name: &str, kind: SpanKind) -> Box<dyn Span>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracer;

impl Tracer for NoopTracer {
    fn start_span(&self, _name: &str, _kind: SpanKind) -> Box<dyn Span> {
        Box::new(NoopSpan)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSpan;

impl Span for NoopSpan {
    fn set_attribute(&mut self, _key: &str, _value: &dyn Display) {}
    fn set_status(&mut self, _status: SpanStatus) {}
    fn record_exception(&mut self, _message: &str) {}
    fn end(self: Box<Self>) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_tracer_round_trips_without_panicking() {
        let tracer = NoopTracer;
        let mut span = tracer.start_span("resilience.circuit_breaker.execute", SpanKind::Internal);
        span.set_attribute("resilience.circuit_breaker.state", &"open");
        span.set_status(SpanStatus::Error);
        span.record_exception("boom");
        span.end();
    }
}
