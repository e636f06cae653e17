//! STABS decoder: walks the fixed-size `.stab` record array, cross-referenced
//! against `.stabstr`, and emits one [`SymEntry`] row per source-open,
//! function-start, or line-number event.
//!
//! Grounded on the original's STABS walk, which threads `last_function_address`
//! across records and writes through a `Current`/`Current[-1]` pair into the
//! output array. Re-architected per the redesign notes as an explicit
//! `current_row` helper operating on a push-only `Vec`, with no negative
//! indexing.

use crate::error;
use crate::strings::StringBlob;
use crate::strtab::Strtab;
use crate::SymEntry;
use scroll::Pread;

const SIZEOF_STAB_RECORD: usize = 12;

const N_BINCL: u8 = 0x82;
const N_SLINE: u8 = 0x44;
const N_SO: u8 = 0x64;
const N_SOL: u8 = 0x84;
const N_FUN: u8 = 0x24;

const MAX_NAME_LEN: usize = 255;

#[derive(Debug, Copy, Clone, Default, Pread)]
struct StabRecord {
    n_strx: u32,
    n_type: u8,
    n_other: u8,
    n_desc: u16,
    n_value: u32,
}

/// Returns the row at `address`, reusing the last row if it already has that
/// address, or pushing a new one carrying forward `file_off`/`func_off` from
/// the last row per `carry_file`/`carry_function`.
fn current_row(
    rows: &mut Vec<SymEntry>,
    address: u32,
    carry_file: bool,
    carry_function: bool,
) -> &mut SymEntry {
    let reuse = matches!(rows.last(), Some(last) if last.address == address);
    if !reuse {
        let (file_off, func_off) = match rows.last() {
            Some(last) => (
                if carry_file { last.file_off } else { 0 },
                if carry_function { last.func_off } else { 0 },
            ),
            None => (0, 0),
        };
        rows.push(SymEntry { address, file_off, func_off, line: 0 });
    }
    rows.last_mut().expect("just pushed or confirmed non-empty")
}

/// Decodes `stab` (a `.stab` section's raw bytes) against `stabstr`,
/// interning every file and function name into `strings`, and returns the
/// rows in the sort order of [`crate::compare_sym_entry`].
pub fn convert(
    stab: &[u8],
    stabstr: &Strtab<'_>,
    image_base: u32,
    strings: &mut StringBlob,
) -> error::Result<Vec<SymEntry>> {
    let mut rows: Vec<SymEntry> = Vec::new();
    let mut last_function_address: u32 = 0;

    let count = stab.len() / SIZEOF_STAB_RECORD;
    for i in 0..count {
        let record: StabRecord = stab.pread_with(i * SIZEOF_STAB_RECORD, scroll::LE)?;
        let address = if last_function_address == 0 {
            record.n_value.wrapping_sub(image_base)
        } else {
            last_function_address + record.n_value
        };

        match record.n_type {
            N_SO | N_SOL | N_BINCL => {
                if record.n_value < image_base {
                    continue;
                }
                let name = match stabstr.get(record.n_strx as usize) {
                    Some(name) => name,
                    None => continue,
                };
                if name.is_empty() || name.ends_with('/') || name.ends_with('\\') {
                    continue;
                }
                let file_off = strings.intern(name);
                current_row(&mut rows, address, false, true).file_off = file_off;
            }
            N_FUN => {
                if record.n_desc != 0 && record.n_value >= image_base {
                    let full = stabstr.get(record.n_strx as usize).unwrap_or("");
                    let name = full.split(':').next().unwrap_or(full);
                    if name.len() > MAX_NAME_LEN {
                        return Err(error::Error::NameTooLong(name.len()));
                    }
                    let func_off = strings.intern(name);
                    last_function_address = address;
                    let row = current_row(&mut rows, address, true, false);
                    row.func_off = func_off;
                    row.line = 0;
                } else {
                    last_function_address = 0;
                }
            }
            N_SLINE => {
                current_row(&mut rows, address, true, true).line = record.n_desc as u32;
            }
            _ => {}
        }
    }

    rows.sort_by(crate::compare_sym_entry);
    Ok(rows)
}
