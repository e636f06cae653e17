//! A byte-offset indexed string table, as used by COFF string tables and
//! `/NN`-style long section names.

use crate::error;
use core::fmt;
use scroll::{ctx, Pread};

pub struct Strtab<'a> {
    bytes: &'a [u8],
    delim: ctx::StrCtx,
}

impl<'a> Strtab<'a> {
    pub fn new(bytes: &'a [u8], delim: u8) -> Self {
        Strtab {
            bytes,
            delim: ctx::StrCtx::from(delim),
        }
    }

    pub fn parse(bytes: &'a [u8], offset: usize, len: usize, delim: u8) -> error::Result<Strtab<'a>> {
        let bytes: &'a [u8] = bytes.pread_with(offset, len)?;
        Ok(Strtab {
            bytes,
            delim: ctx::StrCtx::from(delim),
        })
    }

    /// Returns the NUL-terminated string starting at `idx`, or `None` if
    /// `idx` doesn't land on a valid string.
    pub fn get(&self, idx: usize) -> Option<&'a str> {
        self.bytes.pread_with::<&'a str>(idx, self.delim).ok()
    }
}

impl<'a> fmt::Debug for Strtab<'a> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Strtab {{ delim: {:?}, bytes: {} }}", self.delim, self.bytes.len())
    }
}

impl<'a> Default for Strtab<'a> {
    fn default() -> Strtab<'a> {
        Strtab {
            bytes: &[],
            delim: ctx::StrCtx::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_reads_nul_terminated_entries() {
        let bytes = b"\0printf\0memmove\0busta\0";
        let strtab = Strtab::new(bytes, 0x0);
        assert_eq!(strtab.get(0), Some(""));
        assert_eq!(strtab.get(1), Some("printf"));
        assert_eq!(strtab.get(8), Some("memmove"));
        assert_eq!(strtab.get(16), Some("busta"));
    }

    #[test]
    fn get_out_of_range_is_none() {
        let bytes = b"abc\0";
        let strtab = Strtab::new(bytes, 0x0);
        assert_eq!(strtab.get(100), None);
    }

    #[test]
    fn parse_slices_a_sub_range() {
        let bytes = b"garbage\0\0foo\0bar\0trailing garbage";
        let strtab = Strtab::parse(bytes, 8, 8, 0).unwrap();
        assert_eq!(strtab.get(0), Some(""));
        assert_eq!(strtab.get(1), Some("foo"));
        assert_eq!(strtab.get(5), Some("bar"));
    }
}
