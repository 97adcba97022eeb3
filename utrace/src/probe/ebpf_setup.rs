//! # eBPF Object Loading and Probe Attachment
//!
//! ## Functions
//!
//! - [`raise_rlimits()`] - Lift `RLIMIT_MEMLOCK` and `RLIMIT_NOFILE` before loading
//! - [`load_ebpf_object()`] - Load the compiled object, sizing `EVENTS` for the policy
//! - [`configure()`] - Write runtime tunables to `CONFIG`
//! - [`build_name_table()`] / [`write_name_table()`] - Fill `FUNC_NAMES`
//! - [`attach()`] - Attach the policy's program to every traced function
//!
//! ## Attachment
//!
//! - **Name lookup**: aya `UProbe::attach` per function at its file offset
//! - **Cookie policies**: perf-event uprobe + BPF link per function, carrying
//!   the function's cookie (see [`super::cookie_link`])

#![allow(unsafe_code)] // setrlimit

use anyhow::{Context, Result};
use aya::{maps::HashMap, programs::UProbe, Ebpf, EbpfLoader};
use aya_log::EbpfLogger;
use log::{debug, info, warn};
use std::ffi::CString;
use std::os::fd::AsFd;
use std::path::Path;
use utrace_common::{
    CommitMode, FuncName, Policy, CONFIG_COMMIT_FLAGS, CONFIG_MAP, EVENTS_MAP,
    FUNC_NAMES_MAX_ENTRIES, FUNC_NAMES_MAP,
};

use super::cookie_link::{attach_with_cookie, CookieLink};
use crate::domain::{Pid, TraceError};
use crate::pipeline::NameTable;
use crate::symbolization::{read_exec_mappings, runtime_address, BinaryImage};

/// Raise the locked-memory and open-file limits
///
/// Ring buffers up to 256MB count against `RLIMIT_MEMLOCK` on older kernels,
/// and every attached probe holds file descriptors.
pub fn raise_rlimits() {
    let unlimited = libc::rlimit { rlim_cur: libc::RLIM_INFINITY, rlim_max: libc::RLIM_INFINITY };
    if unsafe { libc::setrlimit(libc::RLIMIT_MEMLOCK, &unlimited) } != 0 {
        warn!("Failed to increase RLIMIT_MEMLOCK");
    }

    let mut nofile = libc::rlimit { rlim_cur: 0, rlim_max: 0 };
    if unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &mut nofile) } == 0 {
        nofile.rlim_cur = nofile.rlim_max;
        if unsafe { libc::setrlimit(libc::RLIMIT_NOFILE, &nofile) } != 0 {
            warn!("Failed to increase RLIMIT_NOFILE");
        }
    }
}

/// Load the eBPF object built by `cargo xtask build-ebpf`
///
/// # Errors
/// Returns an error if the object can't be read or the kernel rejects it
pub fn load_ebpf_object(path: &Path, policy: Policy) -> Result<Ebpf, TraceError> {
    info!(
        "Loading {} (EVENTS: {} MB)",
        path.display(),
        policy.events_byte_size() / (1024 * 1024)
    );
    EbpfLoader::new()
        .set_max_entries(EVENTS_MAP, policy.events_byte_size())
        .load_file(path)
        .map_err(|e| TraceError::EbpfLoadFailed {
            path: path.display().to_string(),
            error: e.to_string(),
        })
}

/// Initialize eBPF logger
pub fn init_ebpf_logger(bpf: &mut Ebpf) {
    if let Err(e) = EbpfLogger::init(bpf) {
        warn!("Failed to initialize eBPF logger: {e}");
    }
}

/// Write runtime configuration to the `CONFIG` map
///
/// # Errors
/// Returns an error if the map is missing or the update fails
pub fn configure(bpf: &mut Ebpf, mode: CommitMode) -> Result<()> {
    let mut config: HashMap<_, u32, u64> =
        HashMap::try_from(bpf.map_mut(CONFIG_MAP).context("CONFIG map not found")?)?;
    config.insert(CONFIG_COMMIT_FLAGS, mode.flags(), 0)?;
    info!("✓ Commit mode: {mode:?} (flags {})", mode.flags());
    Ok(())
}

/// Key every traced function by the instruction pointer its probe will report
///
/// With a PID, file offsets are relocated through that process's executable
/// mappings. Without one, only non-PIE binaries have a fixed address.
///
/// # Errors
/// Fails for a PIE binary without a PID, when the mappings can't be read, or
/// when the functions exceed `FUNC_NAMES_MAX_ENTRIES`
pub fn build_name_table(image: &BinaryImage, pid: Option<Pid>) -> Result<NameTable, TraceError> {
    if image.functions.len() > FUNC_NAMES_MAX_ENTRIES as usize {
        return Err(TraceError::TooManyFunctions {
            count: image.functions.len(),
            capacity: FUNC_NAMES_MAX_ENTRIES,
        });
    }

    let mappings = match pid {
        Some(pid) => Some(read_exec_mappings(pid, &image.path)?),
        None if image.is_pie => return Err(TraceError::PieNeedsPid(image.path.clone())),
        None => None,
    };

    let mut table = NameTable::default();
    let mut unmapped = 0usize;
    for func in &image.functions {
        let ip = match &mappings {
            Some(mappings) => {
                let Some(ip) = runtime_address(mappings, func.file_offset) else {
                    unmapped += 1;
                    continue;
                };
                ip
            }
            None => func.address,
        };
        table.insert(ip, &func.name).map_err(|full| TraceError::TooManyFunctions {
            count: image.functions.len(),
            capacity: u32::try_from(full.capacity).unwrap_or(u32::MAX),
        })?;
    }

    if unmapped > 0 {
        warn!("{unmapped} functions are outside the executable mappings and will not resolve");
    }
    Ok(table)
}

/// Copy a name table into the kernel `FUNC_NAMES` map
///
/// # Errors
/// Returns an error if the map is missing or an update fails
pub fn write_name_table(bpf: &mut Ebpf, table: &NameTable) -> Result<()> {
    let mut map: HashMap<_, u64, FuncName> =
        HashMap::try_from(bpf.map_mut(FUNC_NAMES_MAP).context("FUNC_NAMES map not found")?)?;
    for (ip, name) in table.iter() {
        map.insert(ip, *name, 0)?;
    }
    info!("✓ Registered {} function names", table.len());
    Ok(())
}

/// Probes attached for one trace; dropping it detaches the cookie probes
/// (name lookup links are owned by the `Ebpf` instance).
#[derive(Debug)]
pub struct Attachment {
    pub attached: usize,
    pub failed: usize,
    _links: Vec<CookieLink>,
}

fn load_uprobe<'a>(bpf: &'a mut Ebpf, policy: Policy) -> Result<&'a mut UProbe> {
    let name = policy.program_name();
    let program: &mut UProbe = bpf
        .program_mut(name)
        .with_context(|| format!("{name} program not found"))?
        .try_into()?;
    program.load()?;
    Ok(program)
}

/// Attach the policy's program to every function of `image`
///
/// Individual failures are warnings; attaching nothing is an error.
///
/// # Errors
/// Returns an error if the program can't be loaded or no probe attaches
pub fn attach(bpf: &mut Ebpf, image: &BinaryImage, policy: Policy, pid: Option<Pid>) -> Result<Attachment> {
    let program = load_uprobe(bpf, policy)?;
    let target = CString::new(image.path.as_str()).context("target path contains NUL")?;

    let mut links = Vec::new();
    let mut failed = 0usize;
    for func in &image.functions {
        let result = if policy.uses_cookies() {
            let prog_fd = program.fd()?.as_fd();
            attach_with_cookie(prog_fd, &target, func.file_offset, pid, func.cookie.0)
                .map(|link| links.push(link))
                .map_err(|e| e.to_string())
        } else {
            program
                .attach(None, func.file_offset, &image.path, pid.map(Pid::as_raw))
                .map(|_| ())
                .map_err(|e| e.to_string())
        };

        match result {
            Ok(()) => debug!("Attached {} at +0x{:x} ({})", func.name, func.file_offset, func.cookie),
            Err(error) => {
                failed += 1;
                let err = TraceError::ProbeAttachFailed {
                    probe: func.name.clone(),
                    binary: image.path.clone(),
                    error,
                };
                warn!("⚠️  {err}");
            }
        }
    }

    let attached = image.functions.len() - failed;
    if attached == 0 {
        return Err(TraceError::NothingAttached(image.path.clone()).into());
    }
    info!("✓ Attached {} to {attached} functions ({failed} failed)", policy.program_name());

    Ok(Attachment { attached, failed, _links: links })
}
