//! Userspace stages for the capture pipeline
//!
//! The kernel runs `utrace_common::pipeline::Pipeline` against BPF maps. The
//! types here implement the same stage traits on the host so the pipeline's
//! concurrency properties can be exercised with real threads, and so the name
//! table is built and capacity-checked once before it is written to the kernel.
//!
//! - [`HostRingBuf`] - byte-bounded multi-producer buffer with reserve/commit
//! - [`HostSeenSet`] - sharded set with atomic test-and-set
//! - [`NameTable`] - instruction pointer → name, capped at `FUNC_NAMES_MAX_ENTRIES`
//! - [`Recorder`] - diagnostics sink that counts and logs each decision

pub mod recorder;
pub mod ring_buffer;
pub mod seen_set;
pub mod table;

pub use recorder::{OutcomeCounts, Recorder};
pub use ring_buffer::{HostRecord, HostRingBuf, HostSlot};
pub use seen_set::HostSeenSet;
pub use table::{NameTable, TableFull};

use utrace_common::pipeline::Interception;

/// A synthetic interception: the probe fired at `ip` with `cookie` bound
#[derive(Debug, Clone, Copy, Default)]
pub struct HostHit {
    pub ip: u64,
    pub cookie: u64,
}

impl HostHit {
    #[must_use]
    pub fn at(ip: u64) -> Self {
        Self { ip, cookie: 0 }
    }

    #[must_use]
    pub fn cookie(cookie: u64) -> Self {
        Self { ip: 0, cookie }
    }
}

impl Interception for HostHit {
    fn instruction_pointer(&self) -> u64 {
        self.ip
    }

    fn attach_cookie(&self) -> u64 {
        self.cookie
    }
}
