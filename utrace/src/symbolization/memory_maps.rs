//! Executable mappings from /proc/pid/maps
//!
//! Used to turn a function's file offset into the instruction pointer a
//! uprobe reports inside one running, possibly ASLR-relocated, process.

use log::{debug, info};
use std::fs;

use crate::domain::{Pid, TraceError};

/// One `r-xp` mapping of the target binary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecMapping {
    pub start: u64,
    pub end: u64,
    /// File offset mapped at `start`
    pub offset: u64,
}

impl ExecMapping {
    /// Check if a file offset is backed by this mapping
    #[must_use]
    pub fn covers(&self, file_offset: u64) -> bool {
        file_offset >= self.offset && file_offset - self.offset < self.end - self.start
    }
}

/// Parse one maps line: "start-end perms offset dev inode pathname"
fn parse_line(line: &str) -> Option<(ExecMapping, &str, &str)> {
    let mut fields = line.split_whitespace();
    let (start, end) = fields.next()?.split_once('-')?;
    let perms = fields.next()?;
    let offset = fields.next()?;
    let pathname = fields.nth(2)?;

    let mapping = ExecMapping {
        start: u64::from_str_radix(start, 16).ok()?,
        end: u64::from_str_radix(end, 16).ok()?,
        offset: u64::from_str_radix(offset, 16).ok()?,
    };
    Some((mapping, perms, pathname))
}

/// Executable mappings of `binary_path` in the contents of a maps file
#[must_use]
pub fn parse_exec_mappings(maps: &str, binary_path: &str) -> Vec<ExecMapping> {
    maps.lines()
        .filter_map(parse_line)
        .filter(|(_, perms, pathname)| perms.contains('x') && *pathname == binary_path)
        .map(|(mapping, _, _)| mapping)
        .collect()
}

/// Read the executable mappings of `binary_path` in process `pid`
///
/// # Errors
/// Returns an error if /proc/pid/maps cannot be read or the binary has no
/// executable mapping in the process
pub fn read_exec_mappings(pid: Pid, binary_path: &str) -> Result<Vec<ExecMapping>, TraceError> {
    let maps_path = format!("/proc/{}/maps", pid.as_raw());
    let maps = fs::read_to_string(&maps_path).map_err(|e| {
        debug!("{maps_path}: {e}");
        TraceError::MemoryMapsParseFailed(pid)
    })?;

    let mappings = parse_exec_mappings(&maps, binary_path);
    if mappings.is_empty() {
        return Err(TraceError::NoMemoryRangeFound { pid, binary: binary_path.to_string() });
    }

    for m in &mappings {
        info!("Executable mapping: 0x{:x} - 0x{:x} (file offset 0x{:x})", m.start, m.end, m.offset);
    }
    Ok(mappings)
}

/// Runtime address of `file_offset`, if some mapping covers it
#[must_use]
pub fn runtime_address(mappings: &[ExecMapping], file_offset: u64) -> Option<u64> {
    mappings
        .iter()
        .find(|m| m.covers(file_offset))
        .map(|m| m.start + (file_offset - m.offset))
}
