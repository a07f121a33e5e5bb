/*!
 * Monitoring
 * Structured tracing for kernel requests and long-running operations
 */

mod tracer;

pub use tracer::{generate_trace_id, init_tracing, span_operation, span_request, OperationSpan, RequestSpan};
