//! Surgical output writer: strips debug sections and the COFF symbol table,
//! patches the relocation section in place with a deduplicated blob, and
//! optionally appends a `.rossym` section — all while leaving every
//! surviving section at its original on-disk offset.
//!
//! Grounded on the original's `CreateOutputFile`, which never relays out
//! the image: it trusts that a linker places debug-only sections
//! (`.stab`, `.stabstr`, `.debug_*`) last, so the file can be truncated
//! right after the last surviving section's raw data and rebuilt from
//! there, rather than recomputing every section's placement.

use crate::error;
use crate::pe::header::Header;
use crate::pe::section_table::{
    SectionTable, IMAGE_SCN_LNK_REMOVE, IMAGE_SCN_MEM_DISCARDABLE, IMAGE_SCN_MEM_READ,
    IMAGE_SCN_TYPE_NOLOAD, SIZEOF_SECTION_TABLE,
};
use crate::pe::symbol::SymbolTable;
use crate::pe::utils::align_to;
use log::{debug, trace};
use scroll::{Pread, Pwrite};

/// COFF characteristic bits the original clears unconditionally in the
/// output, even though it just stripped the very information they describe.
const IMAGE_FILE_LINE_NUMS_STRIPPED: u16 = 0x0004;
const IMAGE_FILE_LOCAL_SYMS_STRIPPED: u16 = 0x0008;
const IMAGE_FILE_DEBUG_STRIPPED: u16 = 0x0200;

const OPT_HEADER_SIZE_OF_IMAGE_OFFSET: usize = 56;
const OPT_HEADER_CHECK_SUM_OFFSET: usize = 64;

pub struct OutputSpec<'a> {
    pub image: &'a [u8],
    pub header: &'a Header,
    pub sections: &'a [SectionTable],
    /// Same length as `sections`; `true` marks a section to strip (`.stab`,
    /// `.stabstr`, any `.debug_*` section).
    pub dropped: &'a [bool],
    pub relocation_section_index: Option<usize>,
    pub compacted_relocations: Option<&'a [u8]>,
    pub rossym_section: Option<&'a [u8]>,
}

pub fn write(spec: OutputSpec<'_>) -> error::Result<Vec<u8>> {
    let OutputSpec {
        image,
        header,
        sections,
        dropped,
        relocation_section_index,
        compacted_relocations,
        rossym_section,
    } = spec;

    let optional_header = header
        .optional_header
        .ok_or_else(|| error::Error::Malformed("image has no optional header".to_string()))?;

    let section_table_offset = header.dos_header.pe_pointer as usize
        + 4
        + crate::pe::header::SIZEOF_COFF_HEADER
        + header.coff_header.size_of_optional_header as usize;
    let opt_header_offset =
        header.dos_header.pe_pointer as usize + 4 + crate::pe::header::SIZEOF_COFF_HEADER;

    let kept_indices: Vec<usize> = (0..sections.len()).filter(|&i| !dropped[i]).collect();
    let new_section_count = kept_indices.len() + rossym_section.is_some() as usize;

    let header_capacity = section_table_offset + sections.len() * SIZEOF_SECTION_TABLE;
    if section_table_offset + new_section_count * SIZEOF_SECTION_TABLE > header_capacity {
        return Err(error::Error::Malformed(
            "not enough header padding to grow the section table".to_string(),
        ));
    }

    // `cutoff` assumes every dropped section is laid out after every
    // surviving one, so the surviving sections' raw data forms a single
    // contiguous, already-correct prefix of the file.
    let mut cutoff: u32 = optional_header.size_of_headers;
    for &i in &kept_indices {
        let end = sections[i].pointer_to_raw_data + sections[i].size_of_raw_data;
        cutoff = cutoff.max(end);
    }
    for (i, §ion) in sections.iter().enumerate() {
        if dropped[i] && section.size_of_raw_data > 0 && section.pointer_to_raw_data < cutoff {
            return Err(error::Error::Malformed(format!(
                "dropped section {} is not laid out after the surviving sections",
                i
            )));
        }
    }
    let cutoff = cutoff as usize;
    if cutoff > image.len() {
        return Err(error::Error::Malformed(
            "surviving section data runs past the end of the input file".to_string(),
        ));
    }

    let mut out = image[..cutoff].to_vec();

    // The relocation section's bytes live within `out`; overwrite them in
    // place and shrink the recorded size. Its reserved span never grows
    // back to its old extent, and nothing after it moves.
    let mut patched_sections: Vec<SectionTable> =
        kept_indices.iter().map(|&i| sections[i]).collect();
    if let (Some(reloc_index), Some(compacted)) = (relocation_section_index, compacted_relocations)
    {
        let pos_in_kept = kept_indices
            .iter()
            .position(|&i| i == reloc_index)
            .ok_or_else(|| {
                error::Error::Malformed("relocation section was unexpectedly dropped".to_string())
            })?;
        let section = &mut patched_sections[pos_in_kept];
        let start = section.pointer_to_raw_data as usize;
        let old_len = section.size_of_raw_data as usize;
        if start + old_len > out.len() || compacted.len() > old_len {
            return Err(error::Error::Malformed(
                "compacted relocation blob does not fit in its section's reserved span".to_string(),
            ));
        }
        out[start..start + compacted.len()].copy_from_slice(compacted);
        out[start + compacted.len()..start + old_len].fill(0);
        section.size_of_raw_data = compacted.len() as u32;
        debug!("relocation section shrunk from {} to {} bytes", old_len, compacted.len());
    }

    // The COFF string table is preserved byte-for-byte at a new, unreferenced
    // tail position even though the symbol table pointer below is zeroed:
    // the original treats COFF debugging info as deprecated for images, but
    // keeps the string table bytes around rather than discarding them.
    if header.coff_header.pointer_to_symbol_table != 0 {
        let symtab_start = header.coff_header.pointer_to_symbol_table as usize;
        let symtab_len = SymbolTable::size(header.coff_header.number_of_symbol_table as usize);
        let strtab_start = symtab_start + symtab_len;
        if let Ok(declared_len) = image.pread_with::<u32>(strtab_start, scroll::LE) {
            let end = (strtab_start + declared_len as usize).min(image.len());
            if end > strtab_start {
                trace!("preserving COFF string table verbatim ({} bytes)", end - strtab_start);
                out.extend_from_slice(&image[strtab_start..end]);
            }
        }
    }

    let mut new_sections = patched_sections;
    let mut size_of_image = optional_header.size_of_image;
    if let Some(rossym) = rossym_section {
        let file_alignment = optional_header.file_alignment.max(1);
        let section_alignment = optional_header.section_alignment.max(1);
        let raw_offset = align_to(out.len() as u32, file_alignment);
        out.resize(raw_offset as usize, 0);
        out.extend_from_slice(rossym);
        let padded_len = align_to(rossym.len() as u32, file_alignment);
        out.resize(raw_offset as usize + padded_len as usize, 0);

        let virtual_end = new_sections
            .iter()
            .map(|s| s.virtual_address + s.virtual_size.max(s.size_of_raw_data))
            .max()
            .unwrap_or(optional_header.size_of_headers);
        let virtual_address = align_to(virtual_end, section_alignment);

        let mut raw_name = [0u8; 8];
        raw_name[..7].copy_from_slice(b".rossym");
        new_sections.push(SectionTable {
            raw_name,
            virtual_size: rossym.len() as u32,
            virtual_address,
            size_of_raw_data: padded_len,
            pointer_to_raw_data: raw_offset,
            pointer_to_relocations: 0,
            pointer_to_linenumbers: 0,
            number_of_relocations: 0,
            number_of_linenumbers: 0,
            characteristics: IMAGE_SCN_MEM_READ
                | IMAGE_SCN_MEM_DISCARDABLE
                | IMAGE_SCN_LNK_REMOVE
                | IMAGE_SCN_TYPE_NOLOAD,
        });
        size_of_image = align_to(virtual_address + rossym.len() as u32, section_alignment);
        debug!("appended .rossym section at file offset {:#x}, rva {:#x}", raw_offset, virtual_address);
    }

    // Patch the COFF header: section count, stripped COFF symbol/string
    // table pointers, and the "stripped" characteristic bits, which the
    // original clears even though stripping just happened.
    let coff_offset = opt_header_offset - crate::pe::header::SIZEOF_COFF_HEADER;
    out[coff_offset + 2..coff_offset + 4].copy_from_slice(&(new_sections.len() as u16).to_le_bytes());
    out[coff_offset + 8..coff_offset + 12].copy_from_slice(&0u32.to_le_bytes()); // pointer_to_symbol_table
    out[coff_offset + 12..coff_offset + 16].copy_from_slice(&0u32.to_le_bytes()); // number_of_symbol_table
    let characteristics = header.coff_header.characteristics
        & !(IMAGE_FILE_LINE_NUMS_STRIPPED | IMAGE_FILE_LOCAL_SYMS_STRIPPED | IMAGE_FILE_DEBUG_STRIPPED);
    out[coff_offset + 18..coff_offset + 20].copy_from_slice(&characteristics.to_le_bytes());

    // Rewrite the section table in place; any unused capacity left over
    // from dropped sections is zeroed.
    out[section_table_offset..section_table_offset + sections.len() * SIZEOF_SECTION_TABLE].fill(0);
    let mut offset = section_table_offset;
    for section in &new_sections {
        out.pwrite_with(*section, offset, scroll::LE)?;
        offset += SIZEOF_SECTION_TABLE;
    }

    out[opt_header_offset + OPT_HEADER_SIZE_OF_IMAGE_OFFSET
        ..opt_header_offset + OPT_HEADER_SIZE_OF_IMAGE_OFFSET + 4]
        .copy_from_slice(&size_of_image.to_le_bytes());

    out[opt_header_offset + OPT_HEADER_CHECK_SUM_OFFSET
        ..opt_header_offset + OPT_HEADER_CHECK_SUM_OFFSET + 4]
        .copy_from_slice(&0u32.to_le_bytes());
    let checksum = classic_pe_checksum(&out);
    out[opt_header_offset + OPT_HEADER_CHECK_SUM_OFFSET
        ..opt_header_offset + OPT_HEADER_CHECK_SUM_OFFSET + 4]
        .copy_from_slice(&checksum.to_le_bytes());

    debug!("wrote {} bytes, {} surviving sections", out.len(), new_sections.len());
    Ok(out)
}

/// The classic `CheckSumMappedFile` algorithm: a 16-bit one's-complement
/// running sum over every word of the file, folded down and then summed
/// with the file's own length.
fn classic_pe_checksum(buffer: &[u8]) -> u32 {
    let mut sum: u32 = 0;
    let mut chunks = buffer.chunks_exact(2);
    for chunk in &mut chunks {
        sum += u16::from_le_bytes([chunk[0], chunk[1]]) as u32;
        if sum > 0xFFFF {
            sum = (sum & 0xFFFF) + (sum >> 16);
        }
    }
    if let [last] = chunks.remainder() {
        sum += *last as u32;
        if sum > 0xFFFF {
            sum = (sum & 0xFFFF) + (sum >> 16);
        }
    }
    sum = (sum & 0xFFFF) + (sum >> 16);
    sum += sum >> 16;
    sum &= 0xFFFF;
    sum + buffer.len() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_of_all_zero_buffer_is_its_length() {
        let buffer = vec![0u8; 64];
        assert_eq!(classic_pe_checksum(&buffer), 64);
    }

    #[test]
    fn checksum_changes_with_content() {
        let a = vec![0u8; 64];
        let mut b = vec![0u8; 64];
        b[10] = 0xff;
        assert_ne!(classic_pe_checksum(&a), classic_pe_checksum(&b));
    }
}
