//! Pre-flight checks for utrace
//!
//! Validates the environment before any eBPF object is loaded, so failures
//! come with an actionable message instead of a verifier or syscall error.

#![allow(unsafe_code)] // geteuid() requires unsafe

use anyhow::{bail, Context, Result};
use object::{Object, ObjectSection};
use std::path::Path;

use crate::domain::Pid;

/// Ring buffer maps need 5.8; cookies on perf-event uprobe links need 5.15
const MIN_KERNEL_VERSION: (u32, u32) = (5, 15);

/// Run all pre-flight checks for tracing `target_path`
///
/// # Errors
/// Returns the first failed check
pub fn run_preflight_checks(target_path: &str, object_path: &Path, quiet: bool) -> Result<()> {
    check_privileges()?;
    check_kernel_version()?;
    check_target(target_path)?;
    check_object(object_path)?;
    check_symbol_table(target_path, quiet)?;
    Ok(())
}

fn check_privileges() -> Result<()> {
    if unsafe { libc::geteuid() } == 0 {
        return Ok(());
    }
    bail!(
        "Permission denied: utrace requires root privileges to load eBPF programs \
         and attach uprobes.\n\n\
         Run with: sudo utrace ..."
    );
}

/// "Linux version 6.1.0-arch1-1 ..." → (6, 1)
fn parse_kernel_release(proc_version: &str) -> Option<(u32, u32)> {
    let release = proc_version.split_whitespace().nth(2)?;
    let mut parts = release.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor: String = parts.next()?.chars().take_while(char::is_ascii_digit).collect();
    Some((major, minor.parse().ok()?))
}

fn check_kernel_version() -> Result<()> {
    let proc_version = std::fs::read_to_string("/proc/version")
        .context("Failed to read kernel version from /proc/version")?;

    // Unparseable versions are let through; loading will fail loudly if unsupported
    let Some((major, minor)) = parse_kernel_release(&proc_version) else {
        return Ok(());
    };

    if (major, minor) < MIN_KERNEL_VERSION {
        bail!(
            "Kernel version {major}.{minor} is too old.\n\n\
             utrace requires Linux {}.{} or newer (ring buffer maps and uprobe cookies).",
            MIN_KERNEL_VERSION.0,
            MIN_KERNEL_VERSION.1,
        );
    }
    Ok(())
}

fn check_target(target_path: &str) -> Result<()> {
    let path = Path::new(target_path);
    if !path.exists() {
        bail!("Binary not found: {target_path}\n\nMake sure the path is correct and the binary exists.");
    }
    if !path.is_file() {
        bail!("Not a file: {target_path}\n\n--path must point to an executable file, not a directory.");
    }
    Ok(())
}

fn check_object(object_path: &Path) -> Result<()> {
    if !object_path.is_file() {
        bail!(
            "eBPF object not found: {}\n\n\
             Build it with: cargo xtask build-ebpf --release\n\
             or point --object at a compiled object.",
            object_path.display()
        );
    }
    Ok(())
}

/// Warn when only dynamic symbols are available
fn check_symbol_table(target_path: &str, quiet: bool) -> Result<()> {
    let data = std::fs::read(target_path)
        .with_context(|| format!("Failed to read binary: {target_path}"))?;

    // Symbol discovery reports unparseable files with more detail
    let Ok(obj) = object::File::parse(&*data) else {
        return Ok(());
    };

    let has_symtab = obj.section_by_name(".symtab").is_some_and(|s| s.size() > 0);
    if !has_symtab && !quiet {
        eprintln!("warning: binary stripped, only exported (.dynsym) functions can be traced");
    }
    Ok(())
}

/// Check that the target process exists
///
/// # Errors
/// Returns an error if `/proc/<pid>` is missing
pub fn check_process_exists(pid: Pid) -> Result<()> {
    if !pid.is_alive() {
        bail!(
            "Process {} not found.\n\n\
             Is the process still running? Check with: ps -p {}",
            pid.as_raw(),
            pid.as_raw()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_kernel_release() {
        assert_eq!(parse_kernel_release("Linux version 5.15.0-generic (gcc) #1"), Some((5, 15)));
        assert_eq!(parse_kernel_release("Linux version 6.1.0-arch1-1 (x)"), Some((6, 1)));
        assert_eq!(parse_kernel_release("Linux version 6.8-rc1 (x)"), Some((6, 8)));
        assert_eq!(parse_kernel_release("garbage"), None);
    }

    #[test]
    fn test_minimum_version_ordering() {
        assert!((5, 14) < MIN_KERNEL_VERSION);
        assert!((5, 15) >= MIN_KERNEL_VERSION);
        assert!((6, 0) >= MIN_KERNEL_VERSION);
    }

    #[test]
    fn test_binary_not_found() {
        let err = check_target("/nonexistent/path/to/binary").unwrap_err().to_string();
        assert!(err.contains("Binary not found"));
    }

    #[test]
    fn test_directory_is_not_a_target() {
        let dir = tempfile::tempdir().unwrap();
        let err = check_target(dir.path().to_str().unwrap()).unwrap_err().to_string();
        assert!(err.contains("Not a file"));
    }

    #[test]
    fn test_missing_object_mentions_xtask() {
        let err = check_object(Path::new("/nonexistent/utrace.o")).unwrap_err().to_string();
        assert!(err.contains("cargo xtask build-ebpf"));
    }

    #[test]
    fn test_process_not_found() {
        let err = check_process_exists(Pid(999_999_999)).unwrap_err().to_string();
        assert!(err.contains("not found"));
    }
}
