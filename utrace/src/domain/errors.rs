//! Structured error types for utrace
//!
//! Using thiserror for automatic Display implementation and error chaining.

use super::types::Pid;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TraceError {
    #[error("Failed to parse ELF {binary}: {reason}")]
    ElfParseFailed { binary: String, reason: String },

    #[error("No function symbols in {0} (binary stripped?)")]
    NoSymbols(String),

    #[error("Invalid symbol pattern {pattern:?}: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("No functions in {0} match the include/exclude filters")]
    NoFunctionsMatched(String),

    #[error("{count} functions exceed the name table capacity of {capacity}; narrow with --include")]
    TooManyFunctions { count: usize, capacity: u32 },

    #[error("Symbol {symbol} at 0x{address:x} is not inside an executable section")]
    OffsetUnresolved { symbol: String, address: u64 },

    #[error("{0} is position-independent; name lookup needs --pid to learn its load address")]
    PieNeedsPid(String),

    #[error("Failed to read /proc/{0}/maps")]
    MemoryMapsParseFailed(Pid),

    #[error("No executable mapping of {binary} in process {pid}")]
    NoMemoryRangeFound { pid: Pid, binary: String },

    #[error("Failed to load eBPF object {path}: {error}")]
    EbpfLoadFailed { path: String, error: String },

    #[error("Failed to attach {probe} to {binary}: {error}")]
    ProbeAttachFailed { probe: String, binary: String, error: String },

    #[error("No probes could be attached to {0}")]
    NothingAttached(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Aya(#[from] aya::EbpfError),
}

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Failed to write coverage report {path}: {source}")]
    WriteFailed { path: String, source: std::io::Error },

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trace_error_display() {
        let err = TraceError::NoMemoryRangeFound { pid: Pid(1234), binary: "/bin/app".into() };
        assert_eq!(err.to_string(), "No executable mapping of /bin/app in process PID:1234");
    }

    #[test]
    fn test_probe_attach_error() {
        let err = TraceError::ProbeAttachFailed {
            probe: "utrace_cookie_all".to_string(),
            binary: "/usr/bin/my-app".to_string(),
            error: "perf_event_open: EINVAL".to_string(),
        };
        assert!(err.to_string().contains("utrace_cookie_all"));
        assert!(err.to_string().contains("/usr/bin/my-app"));
    }

    #[test]
    fn test_capacity_error_names_limit() {
        let err = TraceError::TooManyFunctions { count: 20000, capacity: 16384 };
        assert!(err.to_string().contains("16384"));
    }
}
