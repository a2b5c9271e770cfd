/*!
 * Tracing
 * Subscriber setup and timed spans for kernel operations
 */

use std::time::Instant;
use tracing::{debug, info, span, warn, Level, Span};
use tracing_subscriber::{fmt::format::FmtSpan, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize structured tracing
///
/// Environment variables:
/// - RUST_LOG: Set log level (default: info)
/// - KERNEL_TRACE_JSON: Enable JSON output (default: false)
///
/// Records emitted through the `log` facade are forwarded into the subscriber.
/// Calling this twice keeps the first subscriber.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let use_json = std::env::var("KERNEL_TRACE_JSON")
        .map(|v| v == "1" || v == "true")
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(env_filter);

    let installed = if use_json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_names(true)
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_span_events(FmtSpan::CLOSE),
            )
            .try_init()
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_names(true)
                    .with_span_events(FmtSpan::CLOSE)
                    .compact(),
            )
            .try_init()
    };

    match installed {
        Ok(()) => info!(json = use_json, "Structured tracing initialized"),
        Err(e) => debug!("tracing already initialized: {}", e),
    }
}

/// Timed span around one kernel operation
pub struct OperationSpan {
    span: Span,
    start: Instant,
    operation: &'static str,
}

impl OperationSpan {
    pub fn new(operation: &'static str, pid: u32) -> Self {
        let span = span!(
            Level::DEBUG,
            "kernel_op",
            operation = operation,
            pid = pid,
            duration_us = tracing::field::Empty,
            result = tracing::field::Empty,
        );
        Self {
            span,
            start: Instant::now(),
            operation,
        }
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Record success and close the span
    pub fn finish(self, result: impl std::fmt::Display) {
        let elapsed = self.start.elapsed().as_micros() as u64;
        self.span.record("duration_us", elapsed);
        self.span.record("result", tracing::field::display(&result));
        let _entered = self.span.enter();
        debug!(operation = self.operation, duration_us = elapsed, "operation complete");
    }

    /// Record failure and close the span
    pub fn fail(self, error: impl std::fmt::Display) {
        let elapsed = self.start.elapsed().as_micros() as u64;
        self.span.record("duration_us", elapsed);
        self.span.record("result", "error");
        let _entered = self.span.enter();
        warn!(operation = self.operation, error = %error, "operation failed");
    }
}
