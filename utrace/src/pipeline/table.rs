//! Instruction pointer → name table
//!
//! Built once at attach time, then either written to the kernel `FUNC_NAMES`
//! map or used directly as the host pipeline's lookup table. Insertion past
//! `FUNC_NAMES_MAX_ENTRIES` is refused, matching the kernel map.

use std::collections::HashMap;
use thiserror::Error;
use utrace_common::pipeline::IdentityTable;
use utrace_common::{FuncName, FUNC_NAMES_MAX_ENTRIES};

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("name table is full ({capacity} entries)")]
pub struct TableFull {
    pub capacity: usize,
}

#[derive(Debug, Clone)]
pub struct NameTable {
    entries: HashMap<u64, FuncName>,
    capacity: usize,
}

impl NameTable {
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self { entries: HashMap::new(), capacity }
    }

    /// Add or replace the name at `ip`.
    ///
    /// # Errors
    /// [`TableFull`] when `ip` is new and the table is at capacity.
    pub fn insert(&mut self, ip: u64, name: &str) -> Result<(), TableFull> {
        if self.entries.len() >= self.capacity && !self.entries.contains_key(&ip) {
            return Err(TableFull { capacity: self.capacity });
        }
        self.entries.insert(ip, FuncName::new(name));
        Ok(())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u64, &FuncName)> {
        self.entries.iter().map(|(ip, name)| (*ip, name))
    }
}

impl Default for NameTable {
    fn default() -> Self {
        Self::with_capacity(FUNC_NAMES_MAX_ENTRIES as usize)
    }
}

impl IdentityTable for NameTable {
    fn lookup(&self, ip: u64) -> Option<FuncName> {
        self.entries.get(&ip).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_hit_and_miss() {
        let mut table = NameTable::default();
        table.insert(0x1000, "foo").unwrap();
        assert_eq!(table.lookup(0x1000), Some(FuncName::new("foo")));
        assert_eq!(table.lookup(0x2000), None);
    }

    #[test]
    fn test_capacity_is_enforced() {
        let mut table = NameTable::with_capacity(1);
        table.insert(0x1000, "foo").unwrap();
        assert_eq!(table.insert(0x2000, "bar"), Err(TableFull { capacity: 1 }));
        // Overwriting an existing key is still allowed
        table.insert(0x1000, "baz").unwrap();
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_long_names_truncate() {
        let mut table = NameTable::default();
        let long = "n".repeat(200);
        table.insert(1, &long).unwrap();
        assert_eq!(table.lookup(1).unwrap().len(), 64);
    }
}
