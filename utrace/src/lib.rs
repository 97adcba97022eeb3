//! # utrace - Function-Call Capture with eBPF Uprobes
//!
//! utrace reports which functions of a user-space program actually run. It
//! attaches a uprobe to the entry of every selected function; each hit goes
//! through a small capture pipeline in the kernel and, unless dropped, lands
//! in a ring buffer that this crate drains.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                   Traced Program (unmodified)                   │
//! └───────────────────────┬─────────────────────────────────────────┘
//!                         │ function entry
//!                         ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                   Uprobe Program (Kernel)                       │
//! │  resolve identity → [dedup] → reserve → write → commit          │
//! │  FUNC_NAMES / SEEN / CONFIG / OUTCOMES maps                     │
//! └───────────────────────┬─────────────────────────────────────────┘
//!                         │ EVENTS ring buffer
//!                         ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      utrace (This Crate)                        │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐         │
//! │  │ Symbolization│──▶│    Probe     │──▶│    Event     │         │
//! │  │ (ELF, maps)  │   │ (load/attach)│   │  Processor   │         │
//! │  └──────────────┘   └──────────────┘   └──────┬───────┘         │
//! │                                               ▼                 │
//! │                                        ┌──────────────┐         │
//! │                                        │    Export    │         │
//! │                                        │ (coverage)   │         │
//! │                                        └──────────────┘         │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Capture Policies
//!
//! | Policy | Identity | Reports |
//! |---|---|---|
//! | `name-lookup` | instruction pointer → 64-byte name | every call |
//! | `cookie-dedup` | 64-bit attach cookie | first call per function |
//! | `cookie-all` | 64-bit attach cookie | every call |
//!
//! There is no default; the CLI requires `--policy`.
//!
//! ## Module Structure
//!
//! - [`symbolization`]: ELF symbol discovery, file offsets, `/proc/<pid>/maps` relocation
//! - [`probe`]: eBPF loading, attachment, outcome counters, event decoding and display
//! - [`pipeline`]: host implementations of the capture pipeline stages
//! - [`export`]: JSON coverage report
//! - [`cli`]: Command-line argument parsing
//! - [`domain`]: Core domain types (Pid, Cookie) and errors
//!
//! ## Typical Usage
//!
//! ```bash
//! # Which functions of ./server run at all?
//! sudo utrace --policy cookie-dedup -p ./server --report coverage.json
//!
//! # Every call into the app's own code in one process
//! sudo utrace --policy name-lookup --pid 1234 --include server::
//! ```

pub mod cli;
pub mod domain;
pub mod export;
pub mod pipeline;
pub mod preflight;
pub mod probe;
pub mod process_lookup;
pub mod symbolization;
