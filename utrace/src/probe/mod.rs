//! Kernel-facing side of a trace
//!
//! - Loading the eBPF object and attaching the policy's program
//! - Cookie-carrying uprobe links
//! - Reading the outcome counters
//! - Decoding and displaying drained events

pub mod cookie_link;
pub mod diagnostics;
pub mod ebpf_setup;
pub mod event_display;
pub mod event_processor;

pub use diagnostics::{print_outcome_diagnostics, read_outcome_counts};
pub use ebpf_setup::{
    attach, build_name_table, configure, init_ebpf_logger, load_ebpf_object, raise_rlimits,
    write_name_table, Attachment,
};
pub use event_display::{display_acknowledged, display_status, display_summary};
pub use event_processor::{EventProcessor, Processed, RecordSource, DRAIN_BATCH};
