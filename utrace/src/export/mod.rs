//! Trace export functionality
//!
//! Currently supports the JSON coverage report: which traced functions were
//! acknowledged during the run.

pub mod coverage;

pub use coverage::{write_report, CoverageReport};
