//! Observability hooks
//!
//! The client reports what happened through this small trait instead of
//! depending on any particular metrics backend. Every method has an empty
//! default body and is called fire-and-forget from the request path, so an
//! implementation must not block. Error labels are the stable strings from
//! [`crate::error::SolarmanError::label`].

use std::time::Duration;

/// Sink for client telemetry
pub trait MetricsHooks: Send + Sync {
    /// A request completed successfully
    fn request_ok(&self, function: u8, duration: Duration) {
        let _ = (function, duration);
    }

    /// A request terminally failed
    fn request_err(&self, function: u8, error: &'static str) {
        let _ = (function, error);
    }

    /// A retryable failure consumed one retry
    fn retry(&self, function: u8) {
        let _ = function;
    }

    /// A transport connection was established
    fn connect(&self) {}

    /// A transport connection was torn down
    fn disconnect(&self) {}

    /// The reconnect policy started a connect attempt
    fn reconnect_attempt(&self) {}
}

/// Default sink that drops everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl MetricsHooks for NoopMetrics {}
