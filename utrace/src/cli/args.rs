//! CLI argument definitions

use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use utrace_common::{CommitMode, Policy};

/// Capture policy (no default: choose one explicitly)
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PolicyArg {
    /// Resolve the instruction pointer to a name; report every call
    NameLookup,
    /// Identify functions by attach cookie; report each function once
    CookieDedup,
    /// Identify functions by attach cookie; report every call
    CookieAll,
}

impl From<PolicyArg> for Policy {
    fn from(arg: PolicyArg) -> Self {
        match arg {
            PolicyArg::NameLookup => Policy::NameLookup,
            PolicyArg::CookieDedup => Policy::CookieDedup,
            PolicyArg::CookieAll => Policy::CookieAll,
        }
    }
}

/// When a committed event wakes the consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum CommitModeArg {
    /// Every commit
    #[default]
    Immediate,
    /// Never; the consumer drains on its own schedule
    Batch,
    /// Only when the consumer has caught up
    Adaptive,
}

impl From<CommitModeArg> for CommitMode {
    fn from(arg: CommitModeArg) -> Self {
        match arg {
            CommitModeArg::Immediate => CommitMode::Immediate,
            CommitModeArg::Batch => CommitMode::Batch,
            CommitModeArg::Adaptive => CommitMode::Adaptive,
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "utrace",
    about = "Report which functions of a user-space program run, via eBPF uprobes",
    after_help = "\
EXAMPLES:
    sudo utrace --policy cookie-dedup -p ./myapp                Every process running ./myapp
    sudo utrace --policy cookie-all my-app                      Auto-detect PID and binary
    sudo utrace --policy name-lookup --pid 1234                 Explicit PID, auto-detect binary
    sudo utrace --policy cookie-dedup -p ./myapp --include '^myapp::' --report cov.json"
)]
pub struct Args {
    /// Process name to trace (auto-detects PID and binary)
    #[arg(value_name = "PROCESS")]
    pub process: Option<String>,

    /// Executable to trace (all processes running it unless --pid is given)
    #[arg(short = 'p', long, value_name = "FILE")]
    pub path: Option<String>,

    /// Only trace this process (binary auto-detected from /proc if --path is omitted)
    #[arg(long)]
    pub pid: Option<i32>,

    /// Capture policy
    #[arg(long, value_enum)]
    pub policy: PolicyArg,

    /// Ring buffer commit behaviour
    #[arg(long, value_enum, default_value_t)]
    pub commit_mode: CommitModeArg,

    /// Only trace functions whose demangled name matches the regex PATTERN (repeatable)
    #[arg(long, value_name = "PATTERN")]
    pub include: Vec<String>,

    /// Skip functions whose demangled name matches the regex PATTERN (repeatable)
    #[arg(long, value_name = "PATTERN")]
    pub exclude: Vec<String>,

    /// Compiled eBPF object (built by `cargo xtask build-ebpf`)
    #[arg(long, value_name = "FILE", default_value = "target/bpfel-unknown-none/release/utrace")]
    pub object: PathBuf,

    /// Write a JSON coverage report on exit
    #[arg(long, value_name = "FILE")]
    pub report: Option<PathBuf>,

    /// Show a live status line on stderr
    #[arg(long)]
    pub status: bool,

    /// Stop after N seconds (0 = unlimited)
    #[arg(long, default_value = "0")]
    pub duration: u64,

    /// Debug logging (including per-event kernel diagnostics)
    #[arg(short, long, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Suppress non-essential output, including acknowledged function names
    #[arg(short, long)]
    pub quiet: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_is_required() {
        let err = Args::try_parse_from(["utrace", "-p", "/bin/true"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn test_defaults() {
        let args = Args::try_parse_from(["utrace", "--policy", "cookie-dedup", "-p", "/bin/true"])
            .unwrap();
        assert_eq!(Policy::from(args.policy), Policy::CookieDedup);
        assert_eq!(CommitMode::from(args.commit_mode), CommitMode::Immediate);
        assert_eq!(args.duration, 0);
        assert!(args.include.is_empty());
    }

    #[test]
    fn test_repeatable_filters() {
        let args = Args::try_parse_from([
            "utrace", "--policy", "name-lookup", "--pid", "1", "--include", "a", "--include", "b",
            "--exclude", "c", "--commit-mode", "batch",
        ])
        .unwrap();
        assert_eq!(args.include, ["a", "b"]);
        assert_eq!(args.exclude, ["c"]);
        assert_eq!(CommitMode::from(args.commit_mode), CommitMode::Batch);
    }

    #[test]
    fn test_verbose_conflicts_with_quiet() {
        assert!(Args::try_parse_from(["utrace", "--policy", "cookie-all", "-v", "-q"]).is_err());
    }
}
