/*!
 * Monitoring Module
 * Tracing subscriber setup and operation spans
 */

pub mod tracer;

pub use tracer::{init_tracing, OperationSpan};
