//! Find a running process by name and the binary it executes

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::domain::Pid;

#[derive(Debug)]
pub struct ProcessInfo {
    pub pid: Pid,
    pub exe_path: PathBuf,
    pub comm: String,
}

/// Find the single process whose `comm` or executable basename matches `name`
///
/// # Errors
/// No match, or more than one match
pub fn find_process_by_name(name: &str) -> Result<ProcessInfo> {
    let own_pid = std::process::id();
    let mut found: Vec<ProcessInfo> = fs::read_dir("/proc")
        .context("Failed to read /proc")?
        .flatten()
        .filter_map(|entry| entry.file_name().to_str()?.parse::<i32>().ok())
        .filter(|&pid| u32::try_from(pid).ok() != Some(own_pid))
        .filter_map(|pid| {
            // Kernel threads have no exe link
            let exe_path = fs::read_link(format!("/proc/{pid}/exe")).ok()?;
            let stat = fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
            let comm = comm_from_stat(&stat)?.to_string();
            matches_name(&comm, &exe_path, name).then_some(ProcessInfo { pid: Pid(pid), exe_path, comm })
        })
        .collect();

    match found.len() {
        0 => bail!("No process matching '{name}' found.\nCheck running processes with: ps aux | grep {name}"),
        1 => Ok(found.remove(0)),
        _ => {
            let listing: Vec<String> =
                found.iter().map(|p| format!("  {} ({})", p.pid.as_raw(), p.comm)).collect();
            bail!(
                "Multiple processes match '{name}':\n{}\n\nSpecify one with: utrace --pid <PID>",
                listing.join("\n")
            )
        }
    }
}

/// Binary of a running process, from `/proc/<pid>/exe`
///
/// # Errors
/// Returns an error if the link can't be read
pub fn resolve_exe_path(pid: Pid) -> Result<PathBuf> {
    let link = format!("/proc/{}/exe", pid.as_raw());
    fs::read_link(&link).with_context(|| format!("Cannot read {link}"))
}

/// "pid (comm) state ..." → comm; comm may itself contain parentheses
fn comm_from_stat(stat: &str) -> Option<&str> {
    let open = stat.find('(')?;
    let close = stat.rfind(')')?;
    (open < close).then(|| &stat[open + 1..close])
}

/// Exact match on comm or exe basename first, then substring
fn matches_name(comm: &str, exe_path: &Path, pattern: &str) -> bool {
    let exe_name = exe_path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    let wanted = Path::new(pattern).file_name().and_then(|n| n.to_str()).unwrap_or(pattern);

    comm == wanted || exe_name == wanted || comm.contains(pattern) || exe_name.contains(pattern)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_comm_from_stat() {
        assert_eq!(comm_from_stat("1234 (my-app) S 1 1234"), Some("my-app"));
        assert_eq!(comm_from_stat("1234 (a (b) c) S 1"), Some("a (b) c"));
        assert_eq!(comm_from_stat("no parens"), None);
        assert_eq!(comm_from_stat("1 )( S"), None);
    }

    #[test]
    fn test_matches_name() {
        let exe = Path::new("/usr/local/bin/server");
        assert!(matches_name("server", exe, "server"));
        assert!(matches_name("tokio-rt", exe, "/opt/build/server"));
        assert!(matches_name("server", exe, "serv"));
        assert!(!matches_name("server", exe, "client"));
    }

    #[test]
    fn test_no_such_process() {
        let err = find_process_by_name("utrace-no-such-process-3f9a").unwrap_err().to_string();
        assert!(err.contains("No process matching"));
    }
}
