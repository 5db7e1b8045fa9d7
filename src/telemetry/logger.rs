//! Structured logging collaborator.

use std::fmt::Display;

/// A field attached to a log record: a name and a lazily-displayed value.
pub type Field<'a> = (&'a str, &'a dyn Display);

/// Structured logger used for every admission decision, state transition
/// and swallowed callback exception in this crate.
///
/// Default level usage: `debug` for admission decisions, `info` for state
/// changes and fallback activation, `warn` for denials/timeouts/exhausted
/// retries, `error` for invariant failures and caught callback panics.
pub trait Logger: Send + Sync {
    fn debug(&self, message: &str, fields: &[Field<'_>]);
    fn info(&self, message: &str, fields: &[Field<'_>]);
    fn warn(&self, message: &str, fields: &[Field<'_>]);
    fn error(&self, message: &str, fields: &[Field<'_>]);
}

/// Discards every log record; the default when no logger is injected.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLogger;

impl Logger for NoopLogger {
    fn debug(&self, _message: &str, _fields: &[Field<'_>]) {}
    fn info(&self, _message: &str, _fields: &[Field<'_>]) {}
    fn warn(&self, _message: &str, _fields: &[Field<'_>]) {}
    fn error(&self, _message: &str, _fields: &[Field<'_>]) {}
}

/// Bridges [`Logger`] calls into the `tracing` crate so the crate's own
/// events show up in whatever subscriber the host process has installed.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

fn format_fields(fields: &[Field<'_>]) -> String {
    fields
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(" ")
}

impl Logger for TracingLogger {
    fn debug(&self, message: &str, fields: &[Field<'_>]) {
        tracing::debug!(fields = %format_fields(fields), "{message}");
    }

    fn info(&self, message: &str, fields: &[Field<'_>]) {
        tracing::info!(fields = %format_fields(fields), "{message}");
    }

    fn warn(&self, message: &str, fields: &[Field<'_>]) {
        tracing::warn!(fields = %format_fields(fields), "{message}");
    }

    fn error(&self, message: &str, fields: &[Field<'_>]) {
        tracing::error!(fields = %format_fields(fields), "{message}");
    }
}
