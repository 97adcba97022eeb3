//! ELF symbol table enumeration
//!
//! Collects every defined function symbol of the target, demangles it, applies
//! the `--include`/`--exclude` regex filters and assigns cookies in address order.

use log::{debug, info};
use object::{Object, ObjectKind, ObjectSection, ObjectSymbol, SectionKind, SymbolKind};
use regex::Regex;
use rustc_demangle::demangle;
use std::collections::BTreeMap;
use std::fs;

use crate::domain::{Cookie, TraceError};

/// One function selected for tracing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TracedFunction {
    /// Demangled name, as printed and reported
    pub name: String,
    /// Raw symbol name from the symbol table
    pub symbol: String,
    /// Symbol value (link-time virtual address)
    pub address: u64,
    /// Offset of the function's first instruction in the file
    pub file_offset: u64,
    /// Index in address order
    pub cookie: Cookie,
}

/// The target binary and the functions selected for tracing
#[derive(Debug)]
pub struct BinaryImage {
    pub path: String,
    /// `ET_DYN`: load address is randomized per process
    pub is_pie: bool,
    pub functions: Vec<TracedFunction>,
}

impl BinaryImage {
    /// Function bound to `cookie`, if any
    #[must_use]
    pub fn by_cookie(&self, cookie: u64) -> Option<&TracedFunction> {
        usize::try_from(cookie).ok().and_then(|i| self.functions.get(i))
    }
}

/// Regex filters over demangled names
///
/// A name is kept when it matches any include pattern (or none are given) and
/// no exclude pattern. Patterns are unanchored unless they say otherwise.
#[derive(Debug, Default, Clone)]
pub struct SymbolFilter {
    include: Vec<Regex>,
    exclude: Vec<Regex>,
}

fn compile(patterns: &[String]) -> Result<Vec<Regex>, TraceError> {
    patterns
        .iter()
        .map(|p| {
            Regex::new(p).map_err(|e| TraceError::InvalidPattern { pattern: p.clone(), reason: e.to_string() })
        })
        .collect()
}

impl SymbolFilter {
    /// # Errors
    /// Returns [`TraceError::InvalidPattern`] for the first pattern that isn't a valid regex
    pub fn new(include: &[String], exclude: &[String]) -> Result<Self, TraceError> {
        Ok(Self { include: compile(include)?, exclude: compile(exclude)? })
    }

    #[must_use]
    pub fn matches(&self, name: &str) -> bool {
        let included = self.include.is_empty() || self.include.iter().any(|r| r.is_match(name));
        included && !self.exclude.iter().any(|r| r.is_match(name))
    }
}

#[derive(Debug, Clone, Copy)]
struct ExecSection {
    address: u64,
    size: u64,
    offset: u64,
}

fn file_offset(sections: &[ExecSection], address: u64) -> Option<u64> {
    sections
        .iter()
        .find(|s| address >= s.address && address < s.address + s.size)
        .map(|s| address - s.address + s.offset)
}

/// Enumerate the functions of `path` that pass `filter`
///
/// Uses `.symtab`, falling back to `.dynsym` for stripped binaries. Aliases
/// sharing an address collapse to the first symbol seen.
///
/// # Errors
/// Fails if the file can't be read or parsed, has no function symbols, nothing
/// passes the filter, or a symbol lies outside every executable section.
pub fn discover_functions(path: &str, filter: &SymbolFilter) -> Result<BinaryImage, TraceError> {
    let data = fs::read(path)?;
    let obj = object::File::parse(&*data).map_err(|e| TraceError::ElfParseFailed {
        binary: path.to_string(),
        reason: e.to_string(),
    })?;

    let sections: Vec<ExecSection> = obj
        .sections()
        .filter(|s| s.kind() == SectionKind::Text)
        .filter_map(|s| {
            let (offset, _) = s.file_range()?;
            Some(ExecSection { address: s.address(), size: s.size(), offset })
        })
        .collect();

    let mut symbols: Vec<_> = obj.symbols().collect();
    if symbols.is_empty() {
        debug!("{path}: no .symtab, using .dynsym");
        symbols = obj.dynamic_symbols().collect();
    }

    let mut seen_any = false;
    let mut by_address: BTreeMap<u64, (String, String)> = BTreeMap::new();
    for sym in &symbols {
        if sym.kind() != SymbolKind::Text || !sym.is_definition() || sym.address() == 0 {
            continue;
        }
        let Ok(raw) = sym.name() else {
            continue;
        };
        if raw.is_empty() {
            continue;
        }
        seen_any = true;

        let name = format!("{:#}", demangle(raw));
        if filter.matches(&name) {
            by_address.entry(sym.address()).or_insert_with(|| (name, raw.to_string()));
        }
    }

    if !seen_any {
        return Err(TraceError::NoSymbols(path.to_string()));
    }
    if by_address.is_empty() {
        return Err(TraceError::NoFunctionsMatched(path.to_string()));
    }

    let functions = by_address
        .into_iter()
        .enumerate()
        .map(|(index, (address, (name, symbol)))| {
            let file_offset = file_offset(&sections, address)
                .ok_or_else(|| TraceError::OffsetUnresolved { symbol: symbol.clone(), address })?;
            Ok(TracedFunction { name, symbol, address, file_offset, cookie: Cookie(index as u64) })
        })
        .collect::<Result<Vec<_>, TraceError>>()?;

    let is_pie = obj.kind() == ObjectKind::Dynamic;
    info!("Found {} traceable functions in {path} (PIE: {is_pie})", functions.len());

    Ok(BinaryImage { path: path.to_string(), is_pie, functions })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_include_and_exclude() {
        let filter = SymbolFilter::new(&["app::".to_string()], &["::tests".to_string()]).unwrap();
        assert!(filter.matches("app::run"));
        assert!(!filter.matches("std::io::print"));
        assert!(!filter.matches("app::tests::helper"));
    }

    #[test]
    fn test_anchored_patterns() {
        let exclude = SymbolFilter::new(&[], &["^runtime.".to_string()]).unwrap();
        assert!(!exclude.matches("runtime.sched"));
        assert!(exclude.matches("main.runtime_stats"));

        let include = SymbolFilter::new(&["^main.fooFunction$".to_string()], &[]).unwrap();
        assert!(include.matches("main.fooFunction"));
        assert!(!include.matches("main.fooFunctionHelper"));
        assert!(!include.matches("pkg.main.fooFunction"));
    }

    #[test]
    fn test_invalid_pattern_is_rejected() {
        let err = SymbolFilter::new(&[], &["app::(unclosed".to_string()]).unwrap_err();
        match err {
            TraceError::InvalidPattern { pattern, .. } => assert_eq!(pattern, "app::(unclosed"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        assert!(SymbolFilter::default().matches("anything"));
    }

    #[test]
    fn test_file_offset_within_section() {
        let sections = [ExecSection { address: 0x401000, size: 0x2000, offset: 0x1000 }];
        assert_eq!(file_offset(&sections, 0x401000), Some(0x1000));
        assert_eq!(file_offset(&sections, 0x401234), Some(0x1234));
        assert_eq!(file_offset(&sections, 0x403000), None);
        assert_eq!(file_offset(&sections, 0x400fff), None);
    }

    #[test]
    fn test_discover_on_own_test_binary() {
        let exe = std::env::current_exe().unwrap();
        let filter = SymbolFilter::new(&["test_discover_on_own_test_binary".to_string()], &[]).unwrap();
        let image = discover_functions(exe.to_str().unwrap(), &filter).unwrap();

        assert!(!image.functions.is_empty());
        assert!(image.functions.iter().all(|f| f.name.contains("test_discover_on_own_test_binary")));
        for (i, f) in image.functions.iter().enumerate() {
            assert_eq!(f.cookie, Cookie(i as u64));
            assert_eq!(image.by_cookie(i as u64), Some(f));
        }
    }

    #[test]
    fn test_no_match_is_an_error() {
        let exe = std::env::current_exe().unwrap();
        let filter = SymbolFilter::new(&["no function is called this 8c1e".to_string()], &[]).unwrap();
        let err = discover_functions(exe.to_str().unwrap(), &filter).unwrap_err();
        assert!(matches!(err, TraceError::NoFunctionsMatched(_)));
    }

    #[test]
    fn test_not_an_elf() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), b"not an elf").unwrap();
        let err = discover_functions(file.path().to_str().unwrap(), &SymbolFilter::default())
            .unwrap_err();
        assert!(matches!(err, TraceError::ElfParseFailed { .. }));
    }
}
