//! # Shared Data Structures (eBPF ↔ Userspace)
//!
//! Wire records, declared capacities and policy switches shared between the
//! uprobe programs in `utrace-ebpf` and the userspace tracer. All records use
//! `#[repr(C)]` so the kernel and userspace agree on their layout.
//!
//! ## Identity Schemes
//!
//! 1. **Name lookup** - the probe's instruction pointer is looked up in the
//!    `FUNC_NAMES` table and the 64-byte name is published
//! 2. **Cookie** - the 64-bit cookie bound to the probe at attach time is
//!    published, optionally deduplicated through the `SEEN` set
//!
//! ## Key Types
//!
//! - [`FuncName`] - Fixed-capacity, zero-padded function name record
//! - [`CookieEvent`] - 8-byte cookie record
//! - [`Policy`] - Which identity scheme and dedup rule a deployment uses
//! - [`CommitMode`] - Ring buffer wakeup behaviour on commit
//! - [`pipeline`] - The capture pipeline itself, generic over its seams

#![cfg_attr(not(test), no_std)]

pub mod pipeline;

use core::fmt;

// ============================================================================
// Map Names
// ============================================================================

/// Ring buffer carrying committed event records to userspace
pub const EVENTS_MAP: &str = "EVENTS";

/// Instruction pointer → [`FuncName`] table (name lookup policy)
pub const FUNC_NAMES_MAP: &str = "FUNC_NAMES";

/// Runtime configuration written by userspace
pub const CONFIG_MAP: &str = "CONFIG";

/// Per-CPU decision counters, indexed by [`Outcome`]
pub const OUTCOMES_MAP: &str = "OUTCOMES";

// ============================================================================
// Declared Capacities
// ============================================================================

/// Maximum length of a function name record, in bytes
pub const FUNC_NAME_LEN: usize = 64;

/// Capacity of the instruction pointer → name table
pub const FUNC_NAMES_MAX_ENTRIES: u32 = 16384;

/// Capacity of the seen set
pub const SEEN_MAX_ENTRIES: u32 = 40960;

/// Ring buffer size for the name lookup policy (16 MB)
pub const NAME_EVENTS_BYTE_SIZE: u32 = 1 << 24;

/// Ring buffer size for the cookie policies (256 MB)
pub const COOKIE_EVENTS_BYTE_SIZE: u32 = 1 << 28;

/// Size of the header the kernel prepends to every ring buffer sample
/// (`BPF_RINGBUF_HDR_SZ`)
pub const RINGBUF_HEADER_SIZE: usize = 8;

/// Bytes a record of `len` bytes occupies in the ring buffer: header plus
/// payload rounded up to 8 bytes.
#[must_use]
pub const fn ringbuf_slot_size(len: usize) -> usize {
    RINGBUF_HEADER_SIZE + ((len + 7) & !7)
}

// ============================================================================
// Kernel Flags
// ============================================================================

/// `BPF_NOEXIST`: map update fails if the key is already present.
/// Used as the atomic test-and-set of the seen set.
pub const BPF_NOEXIST: u64 = 1;

/// `BPF_RB_NO_WAKEUP`: commit without notifying the consumer
pub const BPF_RB_NO_WAKEUP: u64 = 1;

/// `BPF_RB_FORCE_WAKEUP`: commit and always notify the consumer
pub const BPF_RB_FORCE_WAKEUP: u64 = 2;

/// `CONFIG` key holding the ring buffer commit flags
pub const CONFIG_COMMIT_FLAGS: u32 = 0;

// ============================================================================
// Event Records
// ============================================================================

/// Which function a probe hit resolved to
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Identity<'a> {
    /// Name from the lookup table
    Name(&'a FuncName),
    /// Cookie bound at attach time
    Cookie(u64),
}

impl fmt::Display for Identity<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identity::Name(name) => match name.as_str() {
                Some(s) => f.write_str(s),
                None => {
                    for b in name.as_bytes() {
                        write!(f, "{b:02x}")?;
                    }
                    Ok(())
                }
            },
            Identity::Cookie(cookie) => write!(f, "cookie:{cookie}"),
        }
    }
}

/// A fixed-size payload published through the ring buffer
///
/// `encode`/`decode` define the wire format; the kernel writes the `#[repr(C)]`
/// value directly, which is byte-identical on little-endian targets.
pub trait EventRecord: Copy + 'static {
    /// Bytes one record occupies on the wire
    const WIRE_SIZE: usize;

    fn identity(&self) -> Identity<'_>;

    /// Write the record into `out`, which is at least [`Self::WIRE_SIZE`] long.
    fn encode(&self, out: &mut [u8]);

    /// Read a record back; `None` if `bytes` is shorter than a record.
    fn decode(bytes: &[u8]) -> Option<Self>;
}

/// Function name record, zero-padded to [`FUNC_NAME_LEN`] bytes
///
/// Names longer than the capacity are truncated and carry no NUL terminator.
/// Copies always move the whole array so no uninitialized bytes ever reach
/// the consumer.
#[repr(C)]
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FuncName {
    pub name: [u8; FUNC_NAME_LEN],
}

impl FuncName {
    #[must_use]
    pub const fn zeroed() -> Self {
        Self { name: [0u8; FUNC_NAME_LEN] }
    }

    /// Build a record from raw bytes, truncating to the capacity.
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut record = Self::zeroed();
        let len = bytes.len().min(FUNC_NAME_LEN);
        record.name[..len].copy_from_slice(&bytes[..len]);
        record
    }

    #[must_use]
    pub fn new(name: &str) -> Self {
        Self::from_bytes(name.as_bytes())
    }

    /// Logical length: bytes before the first NUL.
    #[must_use]
    pub fn len(&self) -> usize {
        self.name.iter().position(|&b| b == 0).unwrap_or(FUNC_NAME_LEN)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.name[0] == 0
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.name[..self.len()]
    }

    /// The name as UTF-8, if truncation did not split a character.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        core::str::from_utf8(self.as_bytes()).ok()
    }
}

impl Default for FuncName {
    fn default() -> Self {
        Self::zeroed()
    }
}

impl fmt::Debug for FuncName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FuncName({})", Identity::Name(self))
    }
}

impl EventRecord for FuncName {
    const WIRE_SIZE: usize = FUNC_NAME_LEN;

    fn identity(&self) -> Identity<'_> {
        Identity::Name(self)
    }

    fn encode(&self, out: &mut [u8]) {
        out[..FUNC_NAME_LEN].copy_from_slice(&self.name);
    }

    fn decode(bytes: &[u8]) -> Option<Self> {
        let name = bytes.get(..FUNC_NAME_LEN)?;
        let mut record = Self::zeroed();
        record.name.copy_from_slice(name);
        Some(record)
    }
}

/// Cookie record (8 bytes, little-endian on the wire)
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct CookieEvent {
    pub cookie: u64,
}

impl EventRecord for CookieEvent {
    const WIRE_SIZE: usize = 8;

    fn identity(&self) -> Identity<'_> {
        Identity::Cookie(self.cookie)
    }

    fn encode(&self, out: &mut [u8]) {
        out[..8].copy_from_slice(&self.cookie.to_le_bytes());
    }

    fn decode(bytes: &[u8]) -> Option<Self> {
        let raw: [u8; 8] = bytes.get(..8)?.try_into().ok()?;
        Some(Self { cookie: u64::from_le_bytes(raw) })
    }
}

// ============================================================================
// Deployment Switches
// ============================================================================

/// Capture policy: identity scheme plus dedup rule
///
/// There is deliberately no `Default`: a deployment must pick one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Policy {
    /// Instruction pointer → name lookup, one event per call
    NameLookup,
    /// Cookie identity, at most one event per cookie
    CookieDedup,
    /// Cookie identity, one event per call
    CookieAll,
}

impl Policy {
    /// Name of the uprobe program implementing this policy
    #[must_use]
    pub const fn program_name(self) -> &'static str {
        match self {
            Policy::NameLookup => "utrace_name_lookup",
            Policy::CookieDedup => "utrace_cookie_dedup",
            Policy::CookieAll => "utrace_cookie_all",
        }
    }

    #[must_use]
    pub const fn uses_cookies(self) -> bool {
        !matches!(self, Policy::NameLookup)
    }

    /// Ring buffer capacity declared for this policy
    #[must_use]
    pub const fn events_byte_size(self) -> u32 {
        match self {
            Policy::NameLookup => NAME_EVENTS_BYTE_SIZE,
            Policy::CookieDedup | Policy::CookieAll => COOKIE_EVENTS_BYTE_SIZE,
        }
    }

    /// Wire size of one record under this policy
    #[must_use]
    pub const fn record_size(self) -> usize {
        match self {
            Policy::NameLookup => FuncName::WIRE_SIZE,
            Policy::CookieDedup | Policy::CookieAll => CookieEvent::WIRE_SIZE,
        }
    }
}

/// How a commit notifies the consumer
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum CommitMode {
    /// Wake the consumer on every commit
    #[default]
    Immediate,
    /// Never wake the consumer; it drains on its own schedule
    Batch,
    /// Kernel default: wake only if the consumer has caught up
    Adaptive,
}

impl CommitMode {
    /// Flags passed to `bpf_ringbuf_submit`
    #[must_use]
    pub const fn flags(self) -> u64 {
        match self {
            CommitMode::Immediate => BPF_RB_FORCE_WAKEUP,
            CommitMode::Batch => BPF_RB_NO_WAKEUP,
            CommitMode::Adaptive => 0,
        }
    }
}

/// Terminal state of one interception, also the `OUTCOMES` index
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Committed = 0,
    UnknownIdentity = 1,
    DuplicateSuppressed = 2,
    BufferFull = 3,
}

/// Number of [`Outcome`] variants (`OUTCOMES` max entries)
pub const OUTCOME_COUNT: u32 = 4;

impl Outcome {
    pub const ALL: [Outcome; OUTCOME_COUNT as usize] = [
        Outcome::Committed,
        Outcome::UnknownIdentity,
        Outcome::DuplicateSuppressed,
        Outcome::BufferFull,
    ];

    #[must_use]
    pub const fn index(self) -> u32 {
        self as u32
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Outcome::Committed => "committed",
            Outcome::UnknownIdentity => "unknown identity",
            Outcome::DuplicateSuppressed => "duplicate suppressed",
            Outcome::BufferFull => "buffer full",
        }
    }
}

#[cfg(feature = "user")]
use aya::Pod;

// Required to read and write these records through aya maps
#[cfg(feature = "user")]
#[allow(unsafe_code)]
unsafe impl Pod for FuncName {}

#[cfg(feature = "user")]
#[allow(unsafe_code)]
unsafe impl Pod for CookieEvent {}
