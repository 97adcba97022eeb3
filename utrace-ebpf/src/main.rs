//! # eBPF Kernel-Side Capture
//!
//! Uprobe programs that run the capture pipeline from `utrace_common::pipeline`
//! on every entry into a traced function.
//!
//! ## Programs (one per capture policy)
//!
//! - `utrace_name_lookup` - instruction pointer → name via `FUNC_NAMES`, every call
//! - `utrace_cookie_dedup` - attach cookie, first call per cookie only (`SEEN`)
//! - `utrace_cookie_all` - attach cookie, every call
//!
//! ## Maps (Shared with Userspace)
//!
//! - `EVENTS` - Ring buffer, 16MB or 256MB depending on policy (sized at load)
//! - `FUNC_NAMES` - Instruction pointer → 64-byte name
//! - `SEEN` - Cookie → presence marker
//! - `CONFIG` - Runtime configuration (commit flags)
//! - `OUTCOMES` - Per-CPU decision counters
//!
//! ## Build
//!
//! ```bash
//! cargo xtask build-ebpf --release
//! ```

#![no_std]
#![no_main]
#![allow(unused_unsafe)]

use aya_ebpf::{
    helpers::bpf_get_attach_cookie,
    macros::{map, uprobe},
    maps::{ring_buf::RingBufEntry, HashMap, PerCpuArray, RingBuf},
    programs::ProbeContext,
    EbpfContext,
};
use aya_log_ebpf::{debug, info, warn};
use utrace_common::{
    pipeline::{
        CookieResolver, Dedup, Diagnostics, EventBuffer, IdentityTable, Interception, Mark,
        Pipeline, ReportAll, ReservedSlot, Resolver, SeenSet, SeenTracker, TableResolver,
    },
    EventRecord, FuncName, Identity, Outcome, BPF_NOEXIST, BPF_RB_FORCE_WAKEUP,
    CONFIG_COMMIT_FLAGS, FUNC_NAMES_MAX_ENTRIES, NAME_EVENTS_BYTE_SIZE, OUTCOME_COUNT,
    SEEN_MAX_ENTRIES,
};

/// `-EEXIST` from a `BPF_NOEXIST` insert on a present key
const EEXIST: i64 = -17;

// ============================================================================
// eBPF Maps
// ============================================================================

/// Event stream to userspace
///
/// Declared at the name lookup size; userspace overrides the size per policy
/// with `EbpfLoader::set_max_entries` before loading.
#[map]
static EVENTS: RingBuf = RingBuf::with_byte_size(NAME_EVENTS_BYTE_SIZE, 0);

/// Map: Instruction pointer → function name
///
/// Written once by userspace before the probe is attached; read-only here.
#[map]
static FUNC_NAMES: HashMap<u64, FuncName> = HashMap::with_max_entries(FUNC_NAMES_MAX_ENTRIES, 0);

/// Map: Cookie → presence marker
///
/// Entries are never evicted while the program is attached.
#[map]
static SEEN: HashMap<u64, u8> = HashMap::with_max_entries(SEEN_MAX_ENTRIES, 0);

/// Map: Config key → Config value
///
/// - **Key 0**: ring buffer commit flags (default: `BPF_RB_FORCE_WAKEUP`)
#[map]
static CONFIG: HashMap<u32, u64> = HashMap::with_max_entries(16, 0);

/// Decision counters indexed by `Outcome`; userspace sums across CPUs
#[map]
static OUTCOMES: PerCpuArray<u64> = PerCpuArray::with_max_entries(OUTCOME_COUNT, 0);

// ============================================================================
// Pipeline Stages Backed by Maps
// ============================================================================

struct Probe<'a>(&'a ProbeContext);

impl Interception for Probe<'_> {
    fn instruction_pointer(&self) -> u64 {
        // x86_64: the kernel rewinds rip to the probed address before the handler runs
        unsafe { (*self.0.regs).rip }
    }

    fn attach_cookie(&self) -> u64 {
        unsafe { bpf_get_attach_cookie(self.0.as_ptr()) }
    }
}

struct FuncNames;

impl IdentityTable for FuncNames {
    fn lookup(&self, ip: u64) -> Option<FuncName> {
        unsafe { FUNC_NAMES.get(&ip).copied() }
    }
}

struct Seen;

impl SeenSet for Seen {
    fn mark(&self, cookie: u64) -> Mark {
        match unsafe { SEEN.insert(&cookie, &1u8, BPF_NOEXIST) } {
            Ok(()) => Mark::New,
            Err(EEXIST) => Mark::AlreadySeen,
            // -E2BIG: set is full
            Err(_) => Mark::Untracked,
        }
    }

    fn unmark(&self, cookie: u64) {
        let _ = unsafe { SEEN.remove(&cookie) };
    }
}

struct Events;

struct Slot<T: 'static>(RingBufEntry<T>);

impl<T: EventRecord> ReservedSlot<T> for Slot<T> {
    fn write(&mut self, record: &T) {
        // Whole-value write: every byte of the slot is initialized
        self.0.write(*record);
    }

    fn commit(self, flags: u64) {
        self.0.submit(flags);
    }
}

impl EventBuffer for Events {
    type Slot<T: EventRecord> = Slot<T>;

    fn try_reserve<T: EventRecord>(&self) -> Option<Slot<T>> {
        EVENTS.reserve::<T>(0).map(Slot)
    }
}

/// aya-log trace line plus a per-CPU counter for each decision
struct ProbeLog<'a>(&'a ProbeContext);

fn count(outcome: Outcome) {
    if let Some(counter) = OUTCOMES.get_ptr_mut(outcome.index()) {
        unsafe { *counter += 1 };
    }
}

fn name_str(name: &FuncName) -> &str {
    name.as_str().unwrap_or("<non-utf8>")
}

impl Diagnostics for ProbeLog<'_> {
    fn unknown_identity(&self, ip: u64) {
        count(Outcome::UnknownIdentity);
        debug!(self.0, "no function at ip {:x}, dropped", ip);
    }

    fn duplicate_suppressed(&self, identity: Identity<'_>) {
        count(Outcome::DuplicateSuppressed);
        // Only cookie policies deduplicate
        if let Identity::Cookie(cookie) = identity {
            debug!(self.0, "cookie {} already reported, skipping", cookie);
        }
    }

    fn buffer_full(&self, identity: Identity<'_>) {
        count(Outcome::BufferFull);
        match identity {
            Identity::Name(name) => warn!(self.0, "ring buffer full, dropped {}", name_str(name)),
            Identity::Cookie(cookie) => warn!(self.0, "ring buffer full, dropped cookie {}", cookie),
        }
    }

    fn committed(&self, identity: Identity<'_>) {
        count(Outcome::Committed);
        match identity {
            Identity::Name(name) => info!(self.0, "committed {}", name_str(name)),
            Identity::Cookie(cookie) => info!(self.0, "committed cookie {}", cookie),
        }
    }
}

fn commit_flags() -> u64 {
    unsafe { CONFIG.get(&CONFIG_COMMIT_FLAGS).copied() }.unwrap_or(BPF_RB_FORCE_WAKEUP)
}

/// Run one interception. Every outcome returns 0: the traced function never
/// sees the pipeline.
fn capture<'a, R, D>(ctx: &'a ProbeContext, resolver: R, dedup: D) -> u32
where
    R: Resolver<Probe<'a>>,
    D: Dedup<R::Record>,
{
    let pipeline = Pipeline {
        resolver,
        dedup,
        buffer: Events,
        diagnostics: ProbeLog(ctx),
    };
    let _ = pipeline.capture(&Probe(ctx), commit_flags());
    0
}

// ============================================================================
// eBPF Program Hooks
// ============================================================================

/// Policy: name lookup, every call reported
#[uprobe]
pub fn utrace_name_lookup(ctx: ProbeContext) -> u32 {
    capture(&ctx, TableResolver(&FuncNames), ReportAll)
}

/// Policy: cookie identity, first call per cookie reported
#[uprobe]
pub fn utrace_cookie_dedup(ctx: ProbeContext) -> u32 {
    capture(&ctx, CookieResolver, SeenTracker(&Seen))
}

/// Policy: cookie identity, every call reported
#[uprobe]
pub fn utrace_cookie_all(ctx: ProbeContext) -> u32 {
    capture(&ctx, CookieResolver, ReportAll)
}

#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    unsafe { core::hint::unreachable_unchecked() }
}
