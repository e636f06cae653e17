//! Component I: lays out the `.rossym` section itself — a 16-byte header
//! followed by the sorted entry array and the string blob, verbatim.
//!
//! Grounded on the original's final assembly step in `main`, which writes
//! the header words, then the entries, then the string table, in that
//! order and with no padding between them.

use crate::error;
use crate::strings::StringBlob;
use crate::{SymEntry, SIZEOF_SYM_ENTRY};
use scroll::{Pread, Pwrite};

const SIZEOF_HEADER: usize = 16;

#[repr(C)]
#[derive(Debug, Copy, Clone, Default, scroll::Pread, scroll::Pwrite, scroll::SizeWith)]
struct RosSymHeader {
    symbols_off: u32,
    symbols_len: u32,
    strings_off: u32,
    strings_len: u32,
}

/// Serializes `entries` (already sorted per [`crate::compare_sym_entry`])
/// and `strings` into the on-disk `.rossym` layout: a fixed header, then
/// the entry array, then the string blob, with no padding between them.
pub fn serialize(entries: &[SymEntry], strings: &StringBlob) -> error::Result<Vec<u8>> {
    let symbols_len = (entries.len() * SIZEOF_SYM_ENTRY) as u32;
    let symbols_off = SIZEOF_HEADER as u32;
    let strings_off = symbols_off + symbols_len;
    let strings_len = strings.len() as u32;

    let header = RosSymHeader { symbols_off, symbols_len, strings_off, strings_len };

    let mut out = vec![0u8; (strings_off + strings_len) as usize];
    out.pwrite_with(header, 0, scroll::LE)?;

    let mut offset = symbols_off as usize;
    for entry in entries {
        out.pwrite_with(*entry, offset, scroll::LE)?;
        offset += SIZEOF_SYM_ENTRY;
    }

    out[strings_off as usize..].copy_from_slice(strings.as_bytes());
    Ok(out)
}

/// A parsed `.rossym` section, borrowed from the bytes that back it.
/// Entries are address-sorted, so lookup is a binary search.
pub struct RosSym<'a> {
    entries: &'a [u8],
    strings: &'a [u8],
}

impl<'a> RosSym<'a> {
    pub fn parse(bytes: &'a [u8]) -> error::Result<Self> {
        let header: RosSymHeader = bytes.pread_with(0, scroll::LE)?;
        let symbols_end = header.symbols_off as usize + header.symbols_len as usize;
        let strings_end = header.strings_off as usize + header.strings_len as usize;
        let entries = bytes
            .get(header.symbols_off as usize..symbols_end)
            .ok_or_else(|| error::Error::Malformed("rossym symbol table runs past the section".to_string()))?;
        let strings = bytes
            .get(header.strings_off as usize..strings_end)
            .ok_or_else(|| error::Error::Malformed("rossym string blob runs past the section".to_string()))?;
        Ok(RosSym { entries, strings })
    }

    pub fn len(&self) -> usize {
        self.entries.len() / SIZEOF_SYM_ENTRY
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry(&self, index: usize) -> error::Result<SymEntry> {
        Ok(self.entries.pread_with(index * SIZEOF_SYM_ENTRY, scroll::LE)?)
    }

    pub fn string(&self, offset: u32) -> &'a str {
        let start = offset as usize;
        let end = self.strings[start..]
            .iter()
            .position(|&b| b == 0)
            .map(|p| start + p)
            .unwrap_or(self.strings.len());
        std::str::from_utf8(&self.strings[start..end]).unwrap_or("")
    }

    /// Binary search by address; returns the first matching row (the one
    /// with `line == 0`, per §3 invariant 2's tie-break) if several rows
    /// share an address.
    pub fn lookup(&self, address: u32) -> error::Result<Option<SymEntry>> {
        let count = self.len();
        let mut lo = 0usize;
        let mut hi = count;
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let entry = self.entry(mid)?;
            if entry.address < address {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        if lo < count {
            let entry = self.entry(lo)?;
            if entry.address == address {
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_entries_and_strings() {
        let mut strings = StringBlob::new();
        let file_off = strings.intern("foo.c");
        let func_off = strings.intern("bar");
        let entries = vec![SymEntry { address: 0x1000, file_off, func_off, line: 10 }];

        let bytes = serialize(&entries, &strings).unwrap();
        let parsed = RosSym::parse(&bytes).unwrap();

        assert_eq!(parsed.len(), 1);
        let row = parsed.entry(0).unwrap();
        assert_eq!(row, entries[0]);
        assert_eq!(parsed.string(row.file_off), "foo.c");
        assert_eq!(parsed.string(row.func_off), "bar");
    }

    #[test]
    fn lookup_finds_an_exact_address_match() {
        let strings = StringBlob::new();
        let entries = vec![
            SymEntry { address: 0x1000, line: 1, ..Default::default() },
            SymEntry { address: 0x2000, line: 2, ..Default::default() },
            SymEntry { address: 0x3000, line: 3, ..Default::default() },
        ];
        let bytes = serialize(&entries, &strings).unwrap();
        let parsed = RosSym::parse(&bytes).unwrap();

        assert_eq!(parsed.lookup(0x2000).unwrap(), Some(entries[1]));
        assert_eq!(parsed.lookup(0x2500).unwrap(), None);
    }

    #[test]
    fn header_offsets_follow_the_fixed_layout() {
        let strings = StringBlob::new();
        let entries = vec![SymEntry::default(), SymEntry::default()];
        let bytes = serialize(&entries, &strings).unwrap();

        let header: RosSymHeader = bytes.pread_with(0, scroll::LE).unwrap();
        assert_eq!(header.symbols_off, 16);
        assert_eq!(header.symbols_len, 32);
        assert_eq!(header.strings_off, 48);
        assert_eq!(header.strings_len, 1);
    }

    #[test]
    fn empty_table_still_has_a_valid_header() {
        let strings = StringBlob::new();
        let bytes = serialize(&[], &strings).unwrap();
        let parsed = RosSym::parse(&bytes).unwrap();
        assert!(parsed.is_empty());
        assert_eq!(parsed.string(0), "");
    }
}
