//! Uprobe attachment carrying a BPF cookie
//!
//! `UProbe::attach` has no cookie parameter, so cookie policies attach the
//! same way libbpf does: open a uprobe perf event on the `uprobe` PMU, then
//! bind the loaded program to it with `BPF_LINK_CREATE`, passing the cookie
//! in `link_create.perf_event.bpf_cookie` (Linux 5.15+). The program then reads it
//! back with `bpf_get_attach_cookie`.

#![allow(unsafe_code)] // perf_event_open(2) and bpf(2) have no safe wrapper

use std::ffi::CStr;
use std::fs;
use std::io;
use std::os::fd::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd};

use crate::domain::Pid;

const UPROBE_PMU_TYPE: &str = "/sys/bus/event_source/devices/uprobe/type";

const PERF_FLAG_FD_CLOEXEC: libc::c_ulong = 8;
/// `sizeof(struct perf_event_attr)` as of `PERF_ATTR_SIZE_VER5`
const PERF_ATTR_SIZE_VER5: u32 = 112;

const BPF_LINK_CREATE: libc::c_int = 28;
/// `enum bpf_attach_type`: `BPF_PERF_EVENT`
const BPF_PERF_EVENT: u32 = 41;

/// `struct perf_event_attr`, `PERF_ATTR_SIZE_VER5` layout
#[repr(C)]
#[derive(Default)]
struct PerfEventAttr {
    type_: u32,
    size: u32,
    config: u64,
    sample_period: u64,
    sample_type: u64,
    read_format: u64,
    flags: u64,
    wakeup_events: u32,
    bp_type: u32,
    /// `uprobe_path`
    config1: u64,
    /// `probe_offset`
    config2: u64,
    branch_sample_type: u64,
    sample_regs_user: u64,
    sample_stack_user: u32,
    clockid: i32,
    sample_regs_intr: u64,
    aux_watermark: u32,
    sample_max_stack: u16,
    reserved_2: u16,
}

/// `union bpf_attr`, `link_create` member for perf event targets
#[repr(C)]
struct LinkCreateAttr {
    prog_fd: u32,
    target_fd: u32,
    attach_type: u32,
    flags: u32,
    bpf_cookie: u64,
}

/// An attached probe. Dropping it detaches.
#[derive(Debug)]
pub struct CookieLink {
    // Declaration order: the link goes before the event it hangs off
    _link: OwnedFd,
    _event: OwnedFd,
}

fn uprobe_pmu_type() -> io::Result<u32> {
    let raw = fs::read_to_string(UPROBE_PMU_TYPE)?;
    raw.trim().parse().map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

fn perf_event_open_uprobe(target: &CStr, file_offset: u64, pid: Option<Pid>) -> io::Result<OwnedFd> {
    let attr = PerfEventAttr {
        type_: uprobe_pmu_type()?,
        size: PERF_ATTR_SIZE_VER5,
        config1: target.as_ptr() as u64,
        config2: file_offset,
        ..PerfEventAttr::default()
    };
    // One event for every process on cpu 0, or one process on any cpu
    let (pid, cpu) = match pid {
        Some(pid) => (pid.as_raw(), -1),
        None => (-1, 0),
    };

    let fd = unsafe {
        libc::syscall(
            libc::SYS_perf_event_open,
            std::ptr::from_ref(&attr),
            pid,
            cpu,
            -1,
            PERF_FLAG_FD_CLOEXEC,
        )
    };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    let fd = i32::try_from(fd).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

#[allow(clippy::cast_sign_loss)] // valid fds are non-negative
fn link_create(prog: BorrowedFd<'_>, event: &OwnedFd, cookie: u64) -> io::Result<OwnedFd> {
    let attr = LinkCreateAttr {
        prog_fd: prog.as_raw_fd() as u32,
        target_fd: event.as_raw_fd() as u32,
        attach_type: BPF_PERF_EVENT,
        flags: 0,
        bpf_cookie: cookie,
    };

    let fd = unsafe {
        libc::syscall(
            libc::SYS_bpf,
            BPF_LINK_CREATE,
            std::ptr::from_ref(&attr),
            std::mem::size_of::<LinkCreateAttr>(),
        )
    };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    let fd = i32::try_from(fd).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

/// Attach the loaded uprobe program `prog` at `file_offset` of `target`,
/// binding `cookie` to this attachment point.
///
/// # Errors
/// Returns the OS error of whichever syscall failed.
pub fn attach_with_cookie(
    prog: BorrowedFd<'_>,
    target: &CStr,
    file_offset: u64,
    pid: Option<Pid>,
    cookie: u64,
) -> io::Result<CookieLink> {
    let event = perf_event_open_uprobe(target, file_offset, pid)?;
    let link = link_create(prog, &event, cookie)?;
    Ok(CookieLink { _link: link, _event: event })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_perf_event_attr_size() {
        assert_eq!(std::mem::size_of::<PerfEventAttr>(), PERF_ATTR_SIZE_VER5 as usize);
    }

    #[test]
    fn test_link_create_cookie_offset() {
        assert_eq!(std::mem::size_of::<LinkCreateAttr>(), 24);
        assert_eq!(std::mem::offset_of!(LinkCreateAttr, bpf_cookie), 16);
    }
}
