use anyhow::{Context, Result};
use aya::maps::PerCpuArray;
use aya::Ebpf;
use utrace_common::{Outcome, OUTCOMES_MAP};

use crate::pipeline::OutcomeCounts;

/// Sum the per-CPU `OUTCOMES` counters
///
/// # Errors
/// Returns an error if the map is missing or can't be read
pub fn read_outcome_counts(bpf: &Ebpf) -> Result<OutcomeCounts> {
    let array: PerCpuArray<_, u64> =
        PerCpuArray::try_from(bpf.map(OUTCOMES_MAP).context("OUTCOMES map not found")?)?;

    let mut counts = OutcomeCounts::default();
    for outcome in Outcome::ALL {
        let per_cpu = array.get(&outcome.index(), 0)?;
        counts.add(outcome, per_cpu.iter().sum());
    }
    Ok(counts)
}

/// Print the kernel-side decision counters
///
/// - How many interceptions committed an event
/// - How many missed the name table
/// - How many were suppressed as duplicates
/// - How many were lost to a full ring buffer
///
/// # Errors
/// Returns an error if the counters can't be read
pub fn print_outcome_diagnostics(bpf: &Ebpf) -> Result<()> {
    let counts = read_outcome_counts(bpf)?;
    eprintln!("probe outcomes ({} interceptions):", counts.total());
    for outcome in Outcome::ALL {
        eprintln!("   - {}: {}", outcome.label(), counts.get(outcome));
    }
    if counts.get(Outcome::BufferFull) > 0 {
        eprintln!("warning: events were lost; try --policy cookie-dedup or --commit-mode batch");
    }
    Ok(())
}
