//! Component B: ties the header, section table, and COFF symbol/string
//! tables together into a single parsed view of the input, and classifies
//! each section as kept or dropped for the output writer.
//!
//! Grounded on the original's `main`, which locates `.stab`/`.stabstr` and
//! the COFF symbol table by walking the section array once (`GetStabInfo`,
//! `GetCoffInfo`) before any decoding begins.

use crate::error;
use crate::pe::data_directories::DataDirectory;
use crate::pe::header::{Header, SIZEOF_COFF_HEADER};
use crate::pe::section_table::SectionTable;
use crate::pe::symbol::SymbolTable;
use crate::strtab::Strtab;

/// `\x7fELF`: the tool passes ELF objects through untouched (§4.B).
const ELF_MAGIC: &[u8; 4] = b"\x7fELF";

pub fn is_elf(bytes: &[u8]) -> bool {
    bytes.len() >= 4 && &bytes[0..4] == ELF_MAGIC
}

/// A fully parsed PE32 image: headers, section table, the debug payloads
/// component B locates, and which sections the writer must drop.
pub struct ParsedImage<'a> {
    pub header: Header,
    pub sections: Vec<SectionTable>,
    pub section_names: Vec<String>,
    pub image_base: u32,
    pub stab: Option<&'a [u8]>,
    pub stabstr: Option<Strtab<'a>>,
    pub coff_symbols: Option<SymbolTable<'a>>,
    pub coff_strings: Option<Strtab<'a>>,
    /// Parallel to `sections`: `true` for `.stab`, `.stabstr`, and any
    /// `.debug_*` section, which the writer strips from the output.
    pub dropped: Vec<bool>,
    pub base_reloc: Option<DataDirectory>,
    pub relocation_section_index: Option<usize>,
}

fn slice_section<'a>(image: &'a [u8], section: &SectionTable) -> error::Result<&'a [u8]> {
    let start = section.pointer_to_raw_data as usize;
    let end = start + section.size_of_raw_data as usize;
    image.get(start..end).ok_or_else(|| {
        error::Error::Malformed(format!(
            "section raw data [{:#x}, {:#x}) runs past the end of the file",
            start, end
        ))
    })
}

fn section_extent(section: &SectionTable) -> u32 {
    section.virtual_size.max(section.size_of_raw_data)
}

impl<'a> ParsedImage<'a> {
    pub fn parse(image: &'a [u8]) -> error::Result<Self> {
        let header = Header::parse(image)?;
        let optional_header = header
            .optional_header
            .ok_or_else(|| error::Error::Malformed("image has no optional header".to_string()))?;

        let mut offset = header.dos_header.pe_pointer as usize
            + 4
            + SIZEOF_COFF_HEADER
            + header.coff_header.size_of_optional_header as usize;
        let sections = header.coff_header.sections(image, &mut offset)?;
        let coff_strings = header.coff_header.strings(image)?;
        let coff_symbols = header.coff_header.symbols(image)?;
        let base_reloc = optional_header.data_directories.base_relocation_table();

        let mut section_names = Vec::with_capacity(sections.len());
        let mut dropped = Vec::with_capacity(sections.len());
        let mut stab = None;
        let mut stabstr = None;
        let mut relocation_section_index = None;

        for (i, section) in sections.iter().enumerate() {
            let name = section.name(coff_strings.as_ref())?;

            if name == ".stab" {
                stab = Some(slice_section(image, section)?);
            }
            if name == ".stabstr" {
                stabstr = Some(Strtab::new(slice_section(image, section)?, 0));
            }
            if let Some(reloc) = base_reloc {
                if reloc.virtual_address >= section.virtual_address
                    && reloc.virtual_address < section.virtual_address + section_extent(section)
                {
                    relocation_section_index = Some(i);
                }
            }

            dropped.push(name == ".stab" || name == ".stabstr" || name.starts_with(".debug_"));
            section_names.push(name);
        }

        Ok(ParsedImage {
            header,
            sections,
            section_names,
            image_base: optional_header.image_base,
            stab,
            stabstr,
            coff_symbols,
            coff_strings,
            dropped,
            base_reloc,
            relocation_section_index,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_elf_magic() {
        assert!(is_elf(b"\x7fELF\x01\x02"));
        assert!(!is_elf(b"MZ\x90\x00"));
        assert!(!is_elf(b"\x7fEL"));
    }
}
