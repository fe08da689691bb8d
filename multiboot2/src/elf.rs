//! The ELF section header table of the kernel image, as passed by the bootloader.

use super::{read_u32, read_u64, ParseError, TagType};

/// Size of an `Elf64_Shdr`.
const SECTION_HEADER_SIZE: usize = 64;

const SHT_PROGBITS: u32 = 1;
const SHT_NOBITS: u32 = 8;

bitflags! {
    pub struct ElfSectionFlags: u64 {
        const WRITABLE = 0x1;
        /// The section occupies memory at run time.
        const ALLOCATED = 0x2;
        const EXECUTABLE = 0x4;
    }
}

#[derive(Debug, Copy, Clone)]
pub struct ElfSectionsTag<'a> {
    num: usize,
    entry_size: usize,
    string_table_index: u32,
    headers: &'a [u8],
}

impl<'a> ElfSectionsTag<'a> {
    pub(crate) fn parse(body: &'a [u8]) -> Result<ElfSectionsTag<'a>, ParseError> {
        let tag_type = TagType::ELF_SECTIONS.0;
        if body.len() < 12 {
            return Err(ParseError::TruncatedTag { tag_type, size: body.len() + 8 });
        }
        let num = read_u32(body, 0) as usize;
        let entry_size = read_u32(body, 4) as usize;
        if entry_size < SECTION_HEADER_SIZE {
            return Err(ParseError::InvalidEntrySize { tag_type, entry_size });
        }
        let headers = &body[12..];
        if num.checked_mul(entry_size).map_or(true, |len| len > headers.len()) {
            return Err(ParseError::TruncatedTag { tag_type, size: body.len() + 8 });
        }
        Ok(ElfSectionsTag {
            num,
            entry_size,
            string_table_index: read_u32(body, 8),
            headers,
        })
    }

    pub fn string_table_index(&self) -> u32 {
        self.string_table_index
    }

    pub fn sections(&self) -> impl Iterator<Item = ElfSection> + 'a {
        let headers: &'a [u8] = self.headers;
        headers
            .chunks_exact(self.entry_size)
            .take(self.num)
            .map(|raw| ElfSection {
                section_type: read_u32(raw, 4),
                flags: ElfSectionFlags::from_bits_truncate(read_u64(raw, 8)),
                addr: read_u64(raw, 16),
                size: read_u64(raw, 32),
            })
    }
}

/// What an allocated section holds, as far as the kernel cares.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SectionKind {
    Code,
    Data,
    ReadOnly,
    Bss,
    Other,
}

impl SectionKind {
    pub fn name(&self) -> &'static str {
        match *self {
            SectionKind::Code => "code",
            SectionKind::Data => "data",
            SectionKind::ReadOnly => "read-only",
            SectionKind::Bss => "bss",
            SectionKind::Other => "other",
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct ElfSection {
    pub section_type: u32,
    pub flags: ElfSectionFlags,
    pub addr: u64,
    pub size: u64,
}

impl ElfSection {
    /// Whether the section occupies memory in the loaded image.
    pub fn is_allocated(&self) -> bool {
        self.flags.contains(ElfSectionFlags::ALLOCATED) && self.size > 0
    }

    pub fn kind(&self) -> SectionKind {
        match self.section_type {
            SHT_PROGBITS if self.flags.contains(ElfSectionFlags::EXECUTABLE) => SectionKind::Code,
            SHT_PROGBITS if self.flags.contains(ElfSectionFlags::WRITABLE) => SectionKind::Data,
            SHT_PROGBITS => SectionKind::ReadOnly,
            SHT_NOBITS => SectionKind::Bss,
            _ => SectionKind::Other,
        }
    }

    pub fn end_addr(&self) -> u64 {
        self.addr.saturating_add(self.size)
    }
}
