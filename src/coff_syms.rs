//! COFF decoder: walks the legacy COFF symbol table for function and
//! external symbols and emits one line==0 [`SymEntry`] per record.
//!
//! Grounded on the original's `ConvertCoffs`, which covers hand-written
//! assembly routines that never get STABS directives: every exported or
//! function-typed symbol becomes a row F can use to patch STABS' gaps.

use crate::error;
use crate::pe::section_table::SectionTable;
use crate::pe::symbol::{Symbol, SymbolTable, IMAGE_SYM_CLASS_EXTERNAL, IMAGE_SYM_DTYPE_FUNCTION};
use crate::strings::StringBlob;
use crate::strtab::Strtab;
use crate::SymEntry;

const MAX_NAME_LEN: usize = 255;

/// stdcall demangling: drop everything from the last `@` onward, then a
/// single leading `_` or `@`.
fn demangle_stdcall(name: &str) -> &str {
    let name = match name.rfind('@') {
        Some(pos) => &name[..pos],
        None => name,
    };
    name.strip_prefix('_').or_else(|| name.strip_prefix('@')).unwrap_or(name)
}

/// Decodes `symbols` against `strtab` and the section table, interning
/// every (demangled) function name into `strings`.
pub fn convert(
    symbols: &SymbolTable<'_>,
    strtab: Option<&Strtab<'_>>,
    sections: &[SectionTable],
    strings: &mut StringBlob,
) -> error::Result<Vec<SymEntry>> {
    let mut rows = Vec::new();

    for (_, _inline_name, symbol) in symbols.iter() {
        let is_function = symbol.derived_type() == IMAGE_SYM_DTYPE_FUNCTION;
        let is_external = symbol.storage_class == IMAGE_SYM_CLASS_EXTERNAL;
        if !is_function && !is_external {
            continue;
        }

        let mut address = symbol.value;
        if symbol.section_number > 0 {
            let index = symbol.section_number as usize - 1;
            let section = sections.get(index).ok_or_else(|| {
                error::Error::Malformed(format!(
                    "invalid COFF section number {} (only {} sections present)",
                    symbol.section_number,
                    sections.len()
                ))
            })?;
            address += section.virtual_address;
        }

        let inline_len = symbol.name.iter().position(|&b| b == 0).unwrap_or(8);
        let raw_name: &str = if symbol.name[0] != 0 {
            std::str::from_utf8(&symbol.name[..inline_len]).map_err(|_| {
                error::Error::Malformed("non-UTF8 inline COFF symbol name".to_string())
            })?
        } else {
            symbol_raw_name_from_strtab(&symbol, strtab)
        };

        if raw_name.len() > MAX_NAME_LEN {
            return Err(error::Error::NameTooLong(raw_name.len()));
        }
        let func_off = strings.intern(demangle_stdcall(raw_name));

        rows.push(SymEntry { address, file_off: 0, func_off, line: 0 });
    }

    rows.sort_by(crate::compare_sym_entry);
    Ok(rows)
}

fn symbol_raw_name_from_strtab<'a>(symbol: &Symbol, strtab: Option<&Strtab<'a>>) -> &'a str {
    let offset = symbol.name_offset().unwrap_or(0);
    strtab.and_then(|t| t.get(offset as usize)).unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pe::symbol::COFF_SYMBOL_SIZE;

    fn symbol_record(
        name: &[u8; 8],
        value: u32,
        section_number: i16,
        typ: u16,
        storage_class: u8,
    ) -> [u8; COFF_SYMBOL_SIZE] {
        let mut bytes = [0u8; COFF_SYMBOL_SIZE];
        bytes[0..8].copy_from_slice(name);
        bytes[8..12].copy_from_slice(&value.to_le_bytes());
        bytes[12..14].copy_from_slice(&section_number.to_le_bytes());
        bytes[14..16].copy_from_slice(&typ.to_le_bytes());
        bytes[16] = storage_class;
        bytes[17] = 0;
        bytes
    }

    fn section(virtual_address: u32) -> SectionTable {
        SectionTable { virtual_address, ..Default::default() }
    }

    #[test]
    fn inline_function_symbol_is_demangled_and_sectioned() {
        let mut name = [0u8; 8];
        name[..8].copy_from_slice(b"_asm_fn\0".as_slice()[..8].try_into().unwrap());
        let record = symbol_record(&name, 0x4, 1, 0x20, 0);
        let table = SymbolTable::parse(&record, 0, 1).unwrap();
        let sections = vec![section(0x2000)];
        let mut strings = StringBlob::new();

        let rows = convert(&table, None, &sections, &mut strings).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].address, 0x2004);
        assert_eq!(rows[0].line, 0);
        assert_eq!(strings.get(rows[0].func_off), "asm_fn");
    }

    #[test]
    fn external_symbols_via_string_table_are_demangled() {
        let record = symbol_record(&[0, 0, 0, 0, 0, 0, 0, 0], 0x1000, 0, 0, IMAGE_SYM_CLASS_EXTERNAL);
        let mut record = record;
        record[8..12].copy_from_slice(&0x1000u32.to_le_bytes());
        record[4..8].copy_from_slice(&1u32.to_le_bytes()); // strtab offset
        let table = SymbolTable::parse(&record, 0, 1).unwrap();

        let strtab_bytes = b"\0_DllMain@12\0";
        let strtab = Strtab::new(strtab_bytes, 0);
        let mut strings = StringBlob::new();

        let rows = convert(&table, Some(&strtab), &[], &mut strings).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].address, 0x1000);
        assert_eq!(strings.get(rows[0].func_off), "DllMain");
    }

    #[test]
    fn non_function_non_external_symbols_are_skipped() {
        let record = symbol_record(&[0, 0, 0, 0, 0, 0, 0, 0], 0x1000, 0, 0, 3);
        let table = SymbolTable::parse(&record, 0, 1).unwrap();
        let mut strings = StringBlob::new();
        let rows = convert(&table, None, &[], &mut strings).unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn invalid_section_number_is_malformed() {
        let record = symbol_record(&[0, 0, 0, 0, 0, 0, 0, 0], 0x1000, 5, 0x20, 0);
        let table = SymbolTable::parse(&record, 0, 1).unwrap();
        let mut strings = StringBlob::new();
        assert!(matches!(
            convert(&table, None, &[], &mut strings),
            Err(error::Error::Malformed(_))
        ));
    }
}
