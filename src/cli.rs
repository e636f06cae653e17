//! Argument parsing and top-level pipeline orchestration.
//!
//! Argv handling stays out of `main`: a small `cli` module owns it, so the
//! orchestration itself — parsing, decoding, merging, writing — lives here
//! rather than in the bin target.

use crate::coff_syms;
use crate::error;
use crate::image::{self, ParsedImage};
use crate::merge;
use crate::pe::reloc;
use crate::pe::writer::{self, OutputSpec};
use crate::rossym;
use crate::stabs;
use crate::strings::StringBlob;
use std::path::PathBuf;

/// Parsed `rsym [-s <sources>] <input> <output>` invocation.
#[derive(Debug, Clone)]
pub struct Options {
    pub sources: Option<String>,
    pub input: PathBuf,
    pub output: PathBuf,
}

impl Options {
    pub fn parse<I: IntoIterator<Item = String>>(args: I) -> error::Result<Self> {
        let mut positional = Vec::new();
        let mut sources = None;

        let mut iter = args.into_iter();
        while let Some(arg) = iter.next() {
            if arg == "-s" {
                let value = iter.next().ok_or_else(|| {
                    error::Error::InvalidArgs("-s requires a source directory argument".to_string())
                })?;
                sources = Some(value);
            } else {
                positional.push(arg);
            }
        }

        if positional.len() != 2 {
            return Err(error::Error::InvalidArgs(
                "usage: rsym [-s <sources>] <input> <output>".to_string(),
            ));
        }
        let mut positional = positional.into_iter();
        let input = PathBuf::from(positional.next().expect("len checked above"));
        let output = PathBuf::from(positional.next().expect("len checked above"));

        Ok(Options { sources, input, output })
    }
}

/// What `run` did, so the binary entry point can choose the right exit code
/// and log line.
#[derive(Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The output file was written.
    Written,
    /// The input began with the ELF magic; nothing was read further and no
    /// output was produced (§4.B, §7's `IgnoreElf`).
    IgnoredElf,
}

/// Runs the full pipeline: parse, decode STABS and COFF, merge, compact
/// relocations, serialize `.rossym`, and write the output image.
pub fn run(options: &Options) -> error::Result<Outcome> {
    let input = std::fs::read(&options.input)?;

    if image::is_elf(&input) {
        log::info!("{}: ELF input, passing through untouched", options.input.display());
        return Ok(Outcome::IgnoredElf);
    }

    let parsed = ParsedImage::parse(&input)?;
    let mut strings = StringBlob::new();

    let stab_rows = match (parsed.stab, parsed.stabstr.as_ref()) {
        (Some(stab), Some(stabstr)) => {
            let rows = stabs::convert(stab, stabstr, parsed.image_base, &mut strings)?;
            log::debug!("decoded {} STABS rows", rows.len());
            rows
        }
        _ => Vec::new(),
    };

    let coff_rows = match parsed.coff_symbols.as_ref() {
        Some(symbols) => {
            let rows = coff_syms::convert(
                symbols,
                parsed.coff_strings.as_ref(),
                &parsed.sections,
                &mut strings,
            )?;
            log::debug!("decoded {} COFF rows", rows.len());
            rows
        }
        None => Vec::new(),
    };

    let merged = merge::merge(&stab_rows, &coff_rows);
    log::info!("{} merged symbol rows", merged.len());

    let rossym_bytes = if merged.is_empty() {
        None
    } else {
        Some(rossym::serialize(&merged, &strings)?)
    };

    let compacted_relocations = match (parsed.base_reloc, parsed.relocation_section_index) {
        (Some(base_reloc), Some(section_index)) => {
            let section = &parsed.sections[section_index];
            let compacted = reloc::compact(&input, base_reloc, section, &parsed.sections)?;
            log::debug!("compacted relocation blob to {} bytes", compacted.len());
            Some(compacted)
        }
        _ => None,
    };

    let output = writer::write(OutputSpec {
        image: &input,
        header: &parsed.header,
        sections: &parsed.sections,
        dropped: &parsed.dropped,
        relocation_section_index: parsed.relocation_section_index,
        compacted_relocations: compacted_relocations.as_deref(),
        rossym_section: rossym_bytes.as_deref(),
    })?;

    std::fs::write(&options.output, output)?;
    log::info!("wrote {}", options.output.display());
    Ok(Outcome::Written)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_input_and_output_without_sources() {
        let options = Options::parse(["in.exe".to_string(), "out.exe".to_string()]).unwrap();
        assert_eq!(options.sources, None);
        assert_eq!(options.input, PathBuf::from("in.exe"));
        assert_eq!(options.output, PathBuf::from("out.exe"));
    }

    #[test]
    fn parses_sources_flag_in_any_position() {
        let options = Options::parse(
            ["-s".to_string(), "/src".to_string(), "in.exe".to_string(), "out.exe".to_string()],
        )
        .unwrap();
        assert_eq!(options.sources.as_deref(), Some("/src"));
    }

    #[test]
    fn missing_positional_arguments_is_invalid() {
        assert!(matches!(
            Options::parse(["in.exe".to_string()]),
            Err(error::Error::InvalidArgs(_))
        ));
    }

    #[test]
    fn dangling_sources_flag_is_invalid() {
        assert!(matches!(
            Options::parse(["-s".to_string()]),
            Err(error::Error::InvalidArgs(_))
        ));
    }
}
