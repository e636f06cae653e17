//! Base relocation block deduplication.
//!
//! Grounded on the original's `ProcessRelocations`: the base relocation
//! directory is a sequence of variable-length blocks, each covering one 4K
//! page and carrying a `(virtual_address, size_of_block)` header. Blocks
//! whose target page isn't covered by any section are dropped, and any
//! block that is a byte-for-byte duplicate of a block already kept is
//! dropped too — linkers sometimes emit the same page's fixups twice.

use crate::error;
use crate::pe::data_directories::DataDirectory;
use crate::pe::section_table::SectionTable;
use crate::pe::utils::section_for_rva;
use log::{debug, trace};
use scroll::Pread;

#[repr(C)]
#[derive(Debug, Copy, Clone, Default, Pread)]
struct BlockHeader {
    virtual_address: u32,
    size_of_block: u32,
}

const SIZEOF_BLOCK_HEADER: usize = 8;

/// Concatenates every base relocation block covered by `base_reloc`, in
/// file order, dropping blocks that target no known section and blocks
/// that byte-for-byte duplicate one already kept.
pub fn compact(
    image: &[u8],
    base_reloc: DataDirectory,
    reloc_section: &SectionTable,
    sections: &[SectionTable],
) -> error::Result<Vec<u8>> {
    let start = reloc_section.pointer_to_raw_data as usize
        + (base_reloc.virtual_address - reloc_section.virtual_address) as usize;
    let end = start + base_reloc.size as usize;
    if end > image.len() {
        return Err(error::Error::Malformed(
            "base relocation directory runs past the end of the file".to_string(),
        ));
    }

    let mut accepted: Vec<&[u8]> = Vec::new();
    let mut cursor = start;
    while cursor < end {
        let header: BlockHeader = image.pread_with(cursor, scroll::LE).map_err(|_| {
            error::Error::Malformed(format!("truncated base relocation block at offset {:#x}", cursor))
        })?;
        if header.size_of_block == 0 {
            break;
        }
        let block_len = header.size_of_block as usize;
        if block_len < SIZEOF_BLOCK_HEADER || cursor + block_len > end {
            return Err(error::Error::Malformed(format!(
                "base relocation block at offset {:#x} has an invalid size {}",
                cursor, block_len
            )));
        }
        let block = &image[cursor..cursor + block_len];

        if section_for_rva(header.virtual_address, sections).is_none() {
            trace!("dropping relocation block for rva {:#x}: no covering section", header.virtual_address);
        } else if accepted.iter().any(|&kept| kept == block) {
            trace!("dropping duplicate relocation block for rva {:#x}", header.virtual_address);
        } else {
            accepted.push(block);
        }

        cursor += block_len;
    }

    debug!("kept {} of the relocation blocks found", accepted.len());
    Ok(accepted.concat())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn section(virtual_address: u32, virtual_size: u32, pointer_to_raw_data: u32) -> SectionTable {
        SectionTable {
            virtual_address,
            virtual_size,
            size_of_raw_data: virtual_size,
            pointer_to_raw_data,
            ..Default::default()
        }
    }

    fn block(virtual_address: u32, entries: &[u16]) -> Vec<u8> {
        let mut bytes = vec![0u8; SIZEOF_BLOCK_HEADER + entries.len() * 2];
        bytes[0..4].copy_from_slice(&virtual_address.to_le_bytes());
        bytes[4..8].copy_from_slice(&(bytes.len() as u32).to_le_bytes());
        for (i, entry) in entries.iter().enumerate() {
            let offset = SIZEOF_BLOCK_HEADER + i * 2;
            bytes[offset..offset + 2].copy_from_slice(&entry.to_le_bytes());
        }
        bytes
    }

    #[test]
    fn duplicate_blocks_are_dropped() {
        let reloc_section = section(0x3000, 0x200, 0xc00);
        let text_section = section(0x1000, 0x1000, 0x400);
        let sections = vec![text_section, reloc_section];

        let b1 = block(0x1000, &[0x3004, 0x3010]);
        let mut image = vec![0u8; 0xc00];
        image.extend_from_slice(&b1);
        image.extend_from_slice(&b1); // exact duplicate
        image.extend_from_slice(&[0u8; 4]); // terminator (size_of_block = 0)

        let base_reloc = DataDirectory { virtual_address: 0x3000, size: (b1.len() * 2 + 4) as u32 };
        let out = compact(&image, base_reloc, &sections[1], &sections).unwrap();
        assert_eq!(out, b1);
    }

    #[test]
    fn blocks_with_no_covering_section_are_dropped() {
        let reloc_section = section(0x3000, 0x200, 0xc00);
        let sections = vec![reloc_section];

        let b1 = block(0x9000, &[0x1]);
        let mut image = vec![0u8; 0xc00];
        image.extend_from_slice(&b1);

        let base_reloc = DataDirectory { virtual_address: 0x3000, size: b1.len() as u32 };
        let out = compact(&image, base_reloc, &sections[0], &sections).unwrap();
        assert!(out.is_empty());
    }
}
