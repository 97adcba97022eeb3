//! Domain model for utrace
//!
//! Newtypes for values that cross module boundaries and the structured
//! errors raised while preparing a trace.

pub mod errors;
pub mod types;

pub use types::{Cookie, Pid};

pub use errors::{ReportError, TraceError};
