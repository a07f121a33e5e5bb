/*!
 * Distributed Tracing
 * Structured tracing for naming requests and kernel operations
 *
 * Features:
 * - Trace ID per request for correlation across threads
 * - JSON-formatted logs for structured parsing
 * - Slow-path warnings embedded in span close
 */

use std::time::{Duration, Instant};
use tracing::{debug, info, span, warn, Level};
use tracing_subscriber::{
    fmt::format::FmtSpan, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};
use uuid::Uuid;

/// Requests slower than this are reported at warn level
const SLOW_REQUEST_MS: u128 = 10;
const SLOW_OPERATION_MS: u128 = 100;

/// Initialize structured tracing.
///
/// RUST_LOG sets the filter (default: info). Calling this twice is harmless;
/// the second subscriber is discarded.
pub fn init_tracing(json: bool) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(env_filter);

    let installed = if json {
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
            .is_ok()
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_names(true)
                    .with_line_number(true)
                    .compact(),
            )
            .try_init()
            .is_ok()
    };

    if installed {
        info!(json, "Structured tracing initialized");
    }
}

/// Generate a unique trace ID for request correlation
pub fn generate_trace_id() -> String {
    Uuid::new_v4().to_string()
}

/// Span around one naming request
pub struct RequestSpan {
    span: tracing::Span,
    start: Instant,
    request: &'static str,
    trace_id: String,
    excluded: Duration,
}

impl RequestSpan {
    pub fn new(request: &'static str, path: &str) -> Self {
        let trace_id = generate_trace_id();
        let span = span!(
            Level::DEBUG,
            "request",
            trace_id = %trace_id,
            request,
            path,
            duration_us = tracing::field::Empty,
            waited_us = tracing::field::Empty,
            result = tracing::field::Empty,
            error = tracing::field::Empty,
        );

        Self {
            span,
            start: Instant::now(),
            request,
            trace_id,
            excluded: Duration::ZERO,
        }
    }

    /// Discount time spent blocked on another component (e.g. a translator
    /// starting) from the slow-request check
    pub fn exclude(&mut self, waited: Duration) {
        self.excluded += waited;
    }

    /// Time attributable to the request itself
    fn own_time(&self) -> Duration {
        self.start.elapsed().saturating_sub(self.excluded)
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    /// Record the outcome of a request
    pub fn record_outcome<T, E: std::fmt::Display>(&self, outcome: &Result<T, E>) {
        match outcome {
            Ok(_) => {
                self.span.record("result", "success");
            }
            Err(e) => {
                self.span.record("error", e.to_string().as_str());
                self.span.record("result", "error");
            }
        }
    }

    pub fn enter(&self) -> tracing::span::Entered<'_> {
        self.span.enter()
    }
}

impl Drop for RequestSpan {
    fn drop(&mut self) {
        let duration = self.start.elapsed();
        let own = self.own_time();
        let _entered = self.span.enter();
        self.span.record("duration_us", duration.as_micros() as u64);
        if !self.excluded.is_zero() {
            self.span.record("waited_us", self.excluded.as_micros() as u64);
        }

        if own.as_millis() > SLOW_REQUEST_MS {
            warn!(
                trace_id = %self.trace_id,
                request = self.request,
                duration_ms = duration.as_millis() as u64,
                slow = true,
                "slow request detected"
            );
        } else {
            debug!(
                trace_id = %self.trace_id,
                request = self.request,
                duration_us = duration.as_micros() as u64,
                "request completed"
            );
        }
    }
}

/// Span for long-running kernel operations
pub struct OperationSpan {
    span: tracing::Span,
    start: Instant,
    trace_id: String,
}

impl OperationSpan {
    pub fn new(operation: &str) -> Self {
        let trace_id = generate_trace_id();
        let span = span!(
            Level::INFO,
            "operation",
            trace_id = %trace_id,
            operation,
            duration_ms = tracing::field::Empty,
            result = tracing::field::Empty,
            items_processed = tracing::field::Empty,
        );

        let entered = span.enter();
        debug!(operation, trace_id = %trace_id, "operation started");
        drop(entered);

        Self {
            span,
            start: Instant::now(),
            trace_id,
        }
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub fn record_result(&self, success: bool) {
        self.span
            .record("result", if success { "success" } else { "error" });
    }

    pub fn record_items_processed(&self, count: usize) {
        self.span.record("items_processed", count as u64);
    }
}

impl Drop for OperationSpan {
    fn drop(&mut self) {
        let duration = self.start.elapsed();
        let _entered = self.span.enter();
        self.span.record("duration_ms", duration.as_millis() as u64);

        if duration.as_millis() > SLOW_OPERATION_MS {
            warn!(
                trace_id = %self.trace_id,
                duration_ms = duration.as_millis() as u64,
                slow = true,
                "slow operation detected"
            );
        } else {
            debug!(
                trace_id = %self.trace_id,
                duration_ms = duration.as_millis() as u64,
                "operation completed"
            );
        }
    }
}

#[inline]
pub fn span_request(request: &'static str, path: &str) -> RequestSpan {
    RequestSpan::new(request, path)
}

#[inline]
pub fn span_operation(name: &str) -> OperationSpan {
    OperationSpan::new(name)
}
