//! Logging, metrics and tracing collaborators.
//!
//! The crate never assumes a particular observability stack is present: by
//! default every hook is a no-op, and a [`TracingLogger`] bridges into the
//! `tracing` crate for callers who already have a subscriber installed.

pub mod logger;
pub mod metrics;
pub mod tracing_adapter;

pub use logger::{Logger, NoopLogger, TracingLogger};
pub use metrics::{Metrics, NoopMetrics};
pub use tracing_adapter::{NoopSpan, NoopTracer, Span, Tracer};
