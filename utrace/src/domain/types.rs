//! Newtype wrappers for process and probe identifiers

use std::fmt;

/// Process ID of a traced process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pid(pub i32);

impl Pid {
    #[must_use]
    pub fn as_raw(self) -> i32 {
        self.0
    }

    /// Whether `/proc/<pid>` still exists
    #[must_use]
    pub fn is_alive(self) -> bool {
        std::path::Path::new(&format!("/proc/{}", self.0)).exists()
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PID:{}", self.0)
    }
}

/// Cookie bound to one traced function's probe; the function's index in
/// address order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Cookie(pub u64);

impl fmt::Display for Cookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cookie:{}", self.0)
    }
}
