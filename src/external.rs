//! Component E: adapts an external (debugger-supplied) line iterator into
//! the same [`SymEntry`] shape STABS and COFF produce, for images that
//! carry no `.stab` section at all.
//!
//! Grounded on the original's `ConvertDbgHelp`/`DbgHelpAddLineNumber`,
//! which drives `SymEnumLines` and, on the first callback with a
//! directory separator, probes the host filesystem to discover how much
//! of the recorded path is a build-time prefix that doesn't exist on this
//! machine. The debugger handle and `SymFromAddr` lookup live outside this
//! crate's scope; this module hosts everything else: the trait shape, the
//! chop heuristic, and the conversion that turns callbacks into sorted
//! rows.

use crate::error;
use crate::strings::StringBlob;
use crate::SymEntry;

/// One `(address, file, line)` callback from the external iterator.
#[derive(Debug, Clone)]
pub struct LineRecord {
    pub address: u32,
    pub module_base: u32,
    pub file_name: String,
    pub line: u32,
}

/// The external debug-info iterator's interface. A production binary has
/// no concrete implementation to link against — the debugger handle and
/// callback machinery live outside this crate's scope — but the trait
/// lets the rest of the pipeline (chop heuristic, row shape,
/// merge-readiness) be built and tested against a fake.
pub trait LineProvider {
    /// Delivers one call per `(address, line)` pair in the module.
    fn for_each_line(&mut self, sink: &mut dyn FnMut(LineRecord)) -> error::Result<()>;
    /// Resolves the function containing `address`, if any.
    fn symbol_from_address(&self, address: u32) -> Option<String>;
}

/// Probes the host filesystem to find how much of a recorded source path
/// is a build-time prefix absent on this machine, so only the portion
/// that exists relative to `source_path` is kept.
///
/// The chop is computed once, from the first path that contains a
/// separator, and frozen for the rest of the run: source layouts are
/// assumed uniform within a single module. If no candidate suffix opens
/// (including when probing is disabled), the chop falls back to the full
/// directory portion of that first path, so every other file is at least
/// consistently rooted.
pub struct SourcePathChopper<'a> {
    source_path: &'a str,
    probe: bool,
    chop: Option<String>,
}

impl<'a> SourcePathChopper<'a> {
    pub fn new(source_path: &'a str, probe: bool) -> Self {
        SourcePathChopper { source_path, probe, chop: None }
    }

    pub fn strip<'b>(&mut self, file_name: &'b str) -> &'b str {
        if self.chop.is_none() {
            if let Some(computed) = self.compute(file_name) {
                self.chop = Some(computed);
            }
        }
        match &self.chop {
            Some(chop) => file_name.strip_prefix(chop.as_str()).unwrap_or(file_name),
            None => file_name,
        }
    }

    fn compute(&self, file_name: &str) -> Option<String> {
        let last_sep = file_name.rfind(['/', '\\'])?;
        let bytes = file_name.as_bytes();

        if self.probe {
            let mut i = last_sep as isize - 1;
            while i >= 0 {
                if bytes[i as usize] == b'/' || bytes[i as usize] == b'\\' {
                    let suffix = &file_name[i as usize + 1..];
                    let candidate = format!("{}/{}", self.source_path, suffix);
                    if std::fs::File::open(&candidate).is_ok() {
                        return Some(file_name[..i as usize + 1].to_string());
                    }
                }
                i -= 1;
            }
        }

        Some(file_name[..=last_sep].to_string())
    }
}

/// Drives `provider`, converting every delivered line into a [`SymEntry`]
/// row. Callbacks whose address resolves to no function are dropped,
/// the one tolerated silent failure besides the ELF short-circuit.
pub fn convert(
    provider: &mut dyn LineProvider,
    source_path: &str,
    probe_filesystem: bool,
    strings: &mut StringBlob,
) -> error::Result<Vec<SymEntry>> {
    let mut raw = Vec::new();
    provider.for_each_line(&mut |record| raw.push(record))?;

    let mut chopper = SourcePathChopper::new(source_path, probe_filesystem);
    let mut rows = Vec::with_capacity(raw.len());
    for record in raw {
        let Some(func_name) = provider.symbol_from_address(record.address) else {
            continue;
        };
        let tail = chopper.strip(&record.file_name).to_string();
        let file_off = strings.intern(&tail);
        let func_off = strings.intern(&func_name);
        rows.push(SymEntry {
            address: record.address.wrapping_sub(record.module_base),
            file_off,
            func_off,
            line: record.line,
        });
    }

    rows.sort_by(crate::compare_sym_entry);
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeProvider {
        records: Vec<LineRecord>,
        symbols: Vec<(u32, &'static str)>,
    }

    impl LineProvider for FakeProvider {
        fn for_each_line(&mut self, sink: &mut dyn FnMut(LineRecord)) -> error::Result<()> {
            for record in self.records.drain(..) {
                sink(record);
            }
            Ok(())
        }

        fn symbol_from_address(&self, address: u32) -> Option<String> {
            self.symbols
                .iter()
                .find(|(a, _)| *a == address)
                .map(|(_, name)| name.to_string())
        }
    }

    #[test]
    fn chop_strips_the_frozen_prefix() {
        let mut chopper = SourcePathChopper::new("/src", false);
        assert_eq!(chopper.strip("/build/tree/kernel/main.c"), "kernel/main.c");
        // The chop, once computed, is frozen even for unrelated paths.
        assert_eq!(chopper.strip("/other/tree/foo.c"), "/other/tree/foo.c");
    }

    #[test]
    fn relative_path_with_no_separator_is_unchanged() {
        let mut chopper = SourcePathChopper::new("/src", false);
        assert_eq!(chopper.strip("main.c"), "main.c");
    }

    #[test]
    fn unresolved_address_drops_the_callback() {
        let mut provider = FakeProvider {
            records: vec![LineRecord {
                address: 0x401000,
                module_base: 0x400000,
                file_name: "/build/tree/main.c".to_string(),
                line: 42,
            }],
            symbols: vec![],
        };
        let mut strings = StringBlob::new();
        let rows = convert(&mut provider, "/src", false, &mut strings).unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn resolved_line_becomes_a_module_relative_row() {
        let mut provider = FakeProvider {
            records: vec![LineRecord {
                address: 0x401010,
                module_base: 0x400000,
                file_name: "/build/tree/kernel/main.c".to_string(),
                line: 42,
            }],
            symbols: vec![(0x401010, "KiMain")],
        };
        let mut strings = StringBlob::new();
        let rows = convert(&mut provider, "/src", false, &mut strings).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].address, 0x1010);
        assert_eq!(rows[0].line, 42);
        assert_eq!(strings.get(rows[0].file_off), "kernel/main.c");
        assert_eq!(strings.get(rows[0].func_off), "KiMain");
    }
}
