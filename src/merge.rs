//! Component F: superimposes COFF function-name coverage onto STABS'
//! line/file coverage into a single sorted, deduplicated table.
//!
//! Grounded on the original's `MergeStabsAndCoffs`: a single pass over the
//! (sorted) STABS rows, folding same-address duplicates together and
//! patching in a COFF name wherever STABS left a gap a COFF symbol covers.
//! COFF rows are tracked with a `consumed` bitset rather than zeroed in
//! place, since Rust has no clean way to mutate a row out from under a
//! shared slice mid-walk.

use crate::SymEntry;

/// Merges `stab_rows` (already sorted by [`crate::compare_sym_entry`]) with
/// `coff_rows` (also sorted), producing a single sorted, deduplicated
/// table. COFF rows not consumed while walking `stab_rows` are appended
/// afterward if they still carry a function name.
pub fn merge(stab_rows: &[SymEntry], coff_rows: &[SymEntry]) -> Vec<SymEntry> {
    let mut out = Vec::with_capacity(stab_rows.len() + coff_rows.len());
    let mut consumed = vec![false; coff_rows.len()];

    let mut coff_idx: usize = 0;
    let mut stab_function_start_address: u32 = 0;
    let mut stab_function_string_offset: u32 = 0;

    let mut i = 0;
    while i < stab_rows.len() {
        let mut current = stab_rows[i];
        let mut j = i + 1;
        while j < stab_rows.len() && stab_rows[j].address == current.address {
            if stab_rows[j].file_off != 0 && current.file_off == 0 {
                current.file_off = stab_rows[j].file_off;
            }
            if stab_rows[j].func_off != 0 && current.func_off == 0 {
                current.func_off = stab_rows[j].func_off;
            }
            if stab_rows[j].line != 0 && current.line == 0 {
                current.line = stab_rows[j].line;
            }
            j += 1;
        }
        i = j;

        if !coff_rows.is_empty() {
            while coff_idx + 1 < coff_rows.len() && coff_rows[coff_idx + 1].address <= current.address {
                coff_idx += 1;
            }

            let candidate = coff_rows[coff_idx];
            if candidate.address < current.address
                && stab_function_start_address < candidate.address
                && candidate.func_off != 0
                && !consumed[coff_idx]
            {
                current.func_off = candidate.func_off;
                consumed[coff_idx] = true;
            }
        }

        if stab_function_string_offset != current.func_off {
            stab_function_start_address = current.address;
        }
        stab_function_string_offset = current.func_off;

        out.push(current);
    }

    for (idx, row) in coff_rows.iter().enumerate() {
        if !consumed[idx] && row.address != 0 && row.func_off != 0 {
            out.push(*row);
        }
    }

    out.sort_by(crate::compare_sym_entry);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(address: u32, file_off: u32, func_off: u32, line: u32) -> SymEntry {
        SymEntry { address, file_off, func_off, line }
    }

    #[test]
    fn stab_row_alone_passes_through() {
        let stab = vec![row(0x1000, 7, 3, 10)];
        let merged = merge(&stab, &[]);
        assert_eq!(merged, vec![row(0x1000, 7, 3, 10)]);
    }

    #[test]
    fn coff_name_fills_a_gap_stabs_never_covered() {
        // Scenario 3: STABS covers 0x1000, COFF covers an assembly routine at 0x2000.
        let stab = vec![row(0x1000, 7, 3, 10)];
        let coff = vec![row(0x2000, 0, 9, 0)];
        let merged = merge(&stab, &coff);
        assert_eq!(merged, vec![row(0x1000, 7, 3, 10), row(0x2000, 0, 9, 0)]);
    }

    #[test]
    fn coff_only_image_yields_every_external_symbol() {
        // Scenario 4: no STABS at all, two COFF externals.
        let coff = vec![row(0x1000, 0, 1, 0), row(0x1008, 0, 2, 0)];
        let merged = merge(&[], &coff);
        assert_eq!(merged, coff);
    }

    #[test]
    fn coff_row_preceding_a_later_stab_row_overrides_its_name() {
        // An assembly-only COFF symbol at 0x1008, sandwiched between two
        // STABS function starts, is consumed into the *next* stab row
        // rather than appended separately, since its address precedes
        // that row's address and follows the last function start.
        let stab = vec![row(0x1000, 1, 5, 0), row(0x1010, 1, 7, 0)];
        let coff = vec![row(0x1008, 0, 9, 0)];
        let merged = merge(&stab, &coff);
        assert_eq!(merged, vec![row(0x1000, 1, 5, 0), row(0x1010, 1, 9, 0)]);
    }

    #[test]
    fn duplicate_addresses_fold_first_non_zero_field_wins() {
        let stab = vec![row(0x1000, 0, 0, 0), row(0x1000, 5, 0, 7), row(0x1000, 9, 3, 7)];
        let merged = merge(&stab, &[]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0], row(0x1000, 5, 3, 7));
    }
}
