//! # utrace - Main Entry Point
//!
//! Resolve the target, discover its functions, load and attach the policy's
//! uprobe program, then drain events until Ctrl+C, `--duration`, or the traced
//! process exits.

// Rates lose precision for display
#![allow(clippy::too_many_lines, clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]

use anyhow::{Context, Result};
use aya::maps::RingBuf;
use clap::Parser;
use log::{info, warn};
use std::time::{Duration, Instant};
use utrace_common::{CommitMode, Outcome, Policy, EVENTS_MAP};

use utrace::cli::Args;
use utrace::domain::Pid;
use utrace::export::{write_report, CoverageReport};
use utrace::preflight::{check_process_exists, run_preflight_checks};
use utrace::probe::{
    attach, build_name_table, configure, display_acknowledged, display_status, display_summary,
    init_ebpf_logger, load_ebpf_object, print_outcome_diagnostics, raise_rlimits,
    read_outcome_counts, write_name_table, EventProcessor, DRAIN_BATCH,
};
use utrace::process_lookup::{find_process_by_name, resolve_exe_path};
use utrace::symbolization::{discover_functions, SymbolFilter};

// Exit codes
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_USAGE: i32 = 2;
const EXIT_NOPERM: i32 = 77;

fn main() {
    let args = Args::parse();

    let default_filter = if args.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    std::process::exit(match run(args) {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            let code = exit_code_for(&e);
            eprintln!("error: {e:#}");
            code
        }
    });
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    let msg = format!("{err:#}").to_lowercase();
    if msg.contains("permission denied") || msg.contains("requires root") {
        EXIT_NOPERM
    } else if msg.contains("missing required argument") || msg.contains("cannot use process") {
        EXIT_USAGE
    } else {
        EXIT_ERROR
    }
}

/// Resolve the traced binary and optional PID from CLI arguments.
///
/// - `utrace my-app` - find process by name, binary from /proc
/// - `utrace --pid 1234` - explicit PID, binary from /proc
/// - `utrace -p ./app [--pid 1234]` - explicit binary, optionally one process
fn resolve_target(args: &Args) -> Result<(Option<Pid>, String)> {
    if let Some(ref name) = args.process {
        if args.pid.is_some() || args.path.is_some() {
            anyhow::bail!(
                "Cannot use PROCESS argument with --pid or --path.\n\n\
                 Use either:\n  \
                 utrace --policy <POLICY> my-app          (auto-detect)\n  \
                 utrace --policy <POLICY> --pid 1234      (explicit PID)"
            );
        }
        let info = find_process_by_name(name)?;
        return Ok((Some(info.pid), info.exe_path.to_string_lossy().into_owned()));
    }

    let pid = args.pid.map(Pid);
    if let Some(ref path) = args.path {
        // /proc/<pid>/maps lists canonical paths
        let target = std::fs::canonicalize(path)
            .with_context(|| format!("Failed to resolve path: {path}"))?
            .to_string_lossy()
            .into_owned();
        return Ok((pid, target));
    }

    if let Some(pid) = pid {
        return Ok((Some(pid), resolve_exe_path(pid)?.to_string_lossy().into_owned()));
    }

    anyhow::bail!(
        "Missing required argument: PROCESS, --path or --pid\n\n\
         Usage:\n  \
         utrace --policy <POLICY> -p ./app        Trace every process running ./app\n  \
         utrace --policy <POLICY> --pid 1234      Trace one process\n\n\
         Run 'utrace --help' for more options"
    )
}

#[tokio::main]
async fn run(args: Args) -> Result<()> {
    let quiet = args.quiet;
    let policy = Policy::from(args.policy);
    let commit_mode = CommitMode::from(args.commit_mode);

    let (pid, target_path) = resolve_target(&args)?;

    run_preflight_checks(&target_path, &args.object, quiet)?;
    if let Some(pid) = pid {
        check_process_exists(pid)?;
    }

    // ── Attach-time setup ───────────────────────────────────────────────
    let filter = SymbolFilter::new(&args.include, &args.exclude)?;
    let image = discover_functions(&target_path, &filter)?;
    let name_table = match policy {
        Policy::NameLookup => Some(build_name_table(&image, pid)?),
        Policy::CookieDedup | Policy::CookieAll => None,
    };

    raise_rlimits();
    let mut bpf = load_ebpf_object(&args.object, policy)?;
    init_ebpf_logger(&mut bpf);
    configure(&mut bpf, commit_mode)?;
    if let Some(ref table) = name_table {
        write_name_table(&mut bpf, table)?;
    }

    let attachment = attach(&mut bpf, &image, policy, pid)?;

    if !quiet {
        eprintln!("utrace v{}", env!("CARGO_PKG_VERSION"));
        eprintln!("target: {target_path}");
        if let Some(pid) = pid {
            eprintln!("pid: {}", pid.as_raw());
        }
        eprintln!("policy: {} ({commit_mode:?} commit)", policy.program_name());
        eprintln!("probes: {} attached, {} failed", attachment.attached, attachment.failed);
    }

    let mut ring_buf = RingBuf::try_from(bpf.take_map(EVENTS_MAP).context("EVENTS map not found")?)?;
    let mut processor = EventProcessor::new(policy, &image);
    let on_ack = |name: &str| {
        if !quiet {
            display_acknowledged(name);
        }
    };

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let started = Instant::now();
    let duration_limit =
        if args.duration > 0 { Some(Duration::from_secs(args.duration)) } else { None };

    let mut status_timer = Instant::now();
    let mut events_at_last_status = 0u64;
    let mut exit_reason = "interrupted";

    loop {
        if let Some(limit) = duration_limit {
            if started.elapsed() >= limit {
                exit_reason = "duration limit reached";
                break;
            }
        }

        if let Some(pid) = pid {
            if !pid.is_alive() {
                exit_reason = "process exited";
                break;
            }
        }

        // Batch commits never wake us, so drain on every tick
        let drained = processor.drain(&mut ring_buf, DRAIN_BATCH, on_ack);

        if args.status && status_timer.elapsed() >= Duration::from_secs(1) {
            let rate = (processor.event_count - events_at_last_status) as f64
                / status_timer.elapsed().as_secs_f64();
            let lost = read_outcome_counts(&bpf).map_or(0, |c| c.get(Outcome::BufferFull));
            display_status(processor.coverage(), rate as u64, lost);
            events_at_last_status = processor.event_count;
            status_timer = Instant::now();
        }

        // A full batch means a backlog: yield for signals but don't sleep
        let pause = if drained == DRAIN_BATCH { Duration::ZERO } else { Duration::from_millis(100) };
        tokio::select! {
            () = tokio::time::sleep(pause) => {}
            _ = &mut ctrl_c => {
                break;
            }
        }
    }

    // Records committed after the last tick
    drop(attachment);
    processor.drain(&mut ring_buf, DRAIN_BATCH, on_ack);

    let counts = match read_outcome_counts(&bpf) {
        Ok(counts) => Some(counts),
        Err(e) => {
            warn!("Failed to read outcome counters: {e}");
            None
        }
    };

    if !quiet {
        display_summary(exit_reason, started.elapsed(), &processor, counts.as_ref());
        if let Err(e) = print_outcome_diagnostics(&bpf) {
            warn!("{e}");
        }
    }

    if let Some(ref path) = args.report {
        let traced = image.functions.iter().map(|f| f.name.clone()).collect();
        let report = CoverageReport::new(&target_path, traced, processor.acked_names());
        write_report(&report, path)?;
        info!("Coverage report: {}", path.display());
        if !quiet {
            eprintln!("saved: {}", path.display());
        }
    }

    Ok(())
}
