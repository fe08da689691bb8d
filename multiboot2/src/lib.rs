#![cfg_attr(not(test), no_std)]
//! Parser for the Multiboot2 information structures provided by the bootloader.
//!
//! The information blob is a header (`total_size`, `reserved`) followed by a sequence
//! of tags. Each tag starts with a 4 byte type and a 4 byte size (including the tag
//! header) and is padded to the next multiple of 8 bytes. A tag of type 0 and size 8
//! terminates the sequence.
//!
//! Every read is checked against the declared total size, so a bogus blob produces a
//! `ParseError` instead of reading past its end.

#[macro_use]
extern crate bitflags;

use core::convert::TryInto;
use core::fmt;
use core::str;

use amd64::{Alignable, PhysAddr, PhysAddrRange};

pub mod elf;
pub mod memmap;

pub use self::elf::{ElfSection, ElfSectionFlags, ElfSectionsTag, SectionKind};
pub use self::memmap::{EntryType, MemoryMapEntry, MemoryMapTag};

/// Size of the fixed information header and of every tag header.
const HEADER_SIZE: usize = 8;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ParseError {
    /// The blob is not 8 byte aligned.
    Misaligned(usize),
    /// The declared total size is smaller than the fixed header or exceeds the provided bytes.
    InvalidTotalSize(usize),
    /// A tag declares a size smaller than its own header.
    TagTooSmall { offset: usize, size: usize },
    /// A tag extends past the declared total size.
    TagOverrun { offset: usize, size: usize },
    /// The tag stream ended without an end tag.
    MissingEndTag,
    /// A tag is too short for the fixed fields of its type.
    TruncatedTag { tag_type: u32, size: usize },
    /// The declared entry size of a table tag is too small for an entry.
    InvalidEntrySize { tag_type: u32, entry_size: usize },
    /// A string tag does not contain valid UTF-8.
    InvalidUtf8 { tag_type: u32 },
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            ParseError::Misaligned(addr) => write!(f, "boot information at {:#x} is not 8 byte aligned", addr),
            ParseError::InvalidTotalSize(size) => write!(f, "invalid total size {}", size),
            ParseError::TagTooSmall { offset, size } => write!(f, "tag at offset {} has invalid size {}", offset, size),
            ParseError::TagOverrun { offset, size } => write!(f, "tag at offset {} of size {} extends past the end", offset, size),
            ParseError::MissingEndTag => write!(f, "missing end tag"),
            ParseError::TruncatedTag { tag_type, size } => write!(f, "tag type {} truncated to {} bytes", tag_type, size),
            ParseError::InvalidEntrySize { tag_type, entry_size } => write!(f, "tag type {} has invalid entry size {}", tag_type, entry_size),
            ParseError::InvalidUtf8 { tag_type } => write!(f, "tag type {} contains invalid UTF-8", tag_type),
        }
    }
}

/// Root of Multiboot2 info data.
#[derive(Debug, Copy, Clone)]
pub struct Multiboot2Info<'a> {
    bytes: &'a [u8],
}

impl<'a> Multiboot2Info<'a> {
    /// Interpret `bytes` as boot information. `bytes` may be longer than the declared total size.
    pub fn from_bytes(bytes: &'a [u8]) -> Result<Multiboot2Info<'a>, ParseError> {
        if bytes.len() < HEADER_SIZE {
            return Err(ParseError::InvalidTotalSize(bytes.len()));
        }
        let total_size = read_u32(bytes, 0) as usize;
        if total_size < HEADER_SIZE || total_size > bytes.len() {
            return Err(ParseError::InvalidTotalSize(total_size));
        }
        Ok(Multiboot2Info { bytes: &bytes[..total_size] })
    }

    /// Interpret the blob the bootloader left at `addr`.
    ///
    /// The memory must be mapped and stay valid and unmodified for `'a`.
    pub unsafe fn from_addr(addr: *const u8) -> Result<Multiboot2Info<'a>, ParseError> {
        if !(addr as usize).is_aligned(8) {
            return Err(ParseError::Misaligned(addr as usize));
        }
        let total_size = (addr as *const u32).read() as usize;
        Self::from_bytes(core::slice::from_raw_parts(addr, total_size))
    }

    pub fn total_size(&self) -> usize {
        self.bytes.len()
    }

    /// The physical range occupied by the blob, given the physical address it was found at.
    pub fn physical_range(&self, base: PhysAddr) -> PhysAddrRange {
        PhysAddrRange::new(base, self.total_size())
    }

    pub fn tags(&self) -> TagIter<'a> {
        TagIter {
            bytes: self.bytes,
            offset: HEADER_SIZE,
            done: false,
        }
    }

    /// The first memory map tag. Parse errors are treated as absence.
    pub fn memory_map(&self) -> Option<MemoryMapTag<'a>> {
        self.tags().filter_map(Result::ok).find_map(|t| match t {
            Tag::MemoryMap(m) => Some(m),
            _ => None,
        })
    }

    pub fn elf_sections(&self) -> Option<ElfSectionsTag<'a>> {
        self.tags().filter_map(Result::ok).find_map(|t| match t {
            Tag::ElfSections(e) => Some(e),
            _ => None,
        })
    }

    pub fn command_line(&self) -> Option<&'a str> {
        self.tags().filter_map(Result::ok).find_map(|t| match t {
            Tag::CommandLine(s) => Some(s),
            _ => None,
        })
    }
}

#[derive(Eq, PartialEq, Copy, Clone, Debug)]
pub struct TagType(pub u32);

impl TagType {
    pub const END: TagType = TagType(0);
    pub const BOOT_CMD_LINE: TagType = TagType(1);
    pub const BOOT_LOADER_NAME: TagType = TagType(2);
    pub const BASIC_MEMINFO: TagType = TagType(4);
    pub const MEMORY_MAP: TagType = TagType(6);
    pub const ELF_SECTIONS: TagType = TagType(9);
}

/// Lower and upper memory as reported by the BIOS, in KiB.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct BasicMemInfo {
    pub mem_lower: u32,
    pub mem_upper: u32,
}

/// A decoded tag. Tags this parser has no use for are returned as `Other`.
#[derive(Debug, Copy, Clone)]
pub enum Tag<'a> {
    CommandLine(&'a str),
    BootLoaderName(&'a str),
    BasicMemInfo(BasicMemInfo),
    MemoryMap(MemoryMapTag<'a>),
    ElfSections(ElfSectionsTag<'a>),
    Other { tag_type: u32, size: usize },
}

impl<'a> Tag<'a> {
    fn parse(tag_type: u32, body: &'a [u8]) -> Result<Tag<'a>, ParseError> {
        let size = body.len() + HEADER_SIZE;
        match TagType(tag_type) {
            TagType::BOOT_CMD_LINE => parse_str(tag_type, body).map(Tag::CommandLine),
            TagType::BOOT_LOADER_NAME => parse_str(tag_type, body).map(Tag::BootLoaderName),
            TagType::BASIC_MEMINFO => {
                if body.len() < 8 {
                    return Err(ParseError::TruncatedTag { tag_type, size });
                }
                Ok(Tag::BasicMemInfo(BasicMemInfo {
                    mem_lower: read_u32(body, 0),
                    mem_upper: read_u32(body, 4),
                }))
            }
            TagType::MEMORY_MAP => MemoryMapTag::parse(body).map(Tag::MemoryMap),
            TagType::ELF_SECTIONS => ElfSectionsTag::parse(body).map(Tag::ElfSections),
            _ => Ok(Tag::Other { tag_type, size }),
        }
    }
}

/// Null terminated UTF-8 string filling the rest of the tag.
fn parse_str(tag_type: u32, body: &[u8]) -> Result<&str, ParseError> {
    let len = body.iter().position(|&b| b == 0).unwrap_or(body.len());
    str::from_utf8(&body[..len]).map_err(|_| ParseError::InvalidUtf8 { tag_type })
}

/// An iterator over the tags in the multiboot structure.
/// Construct using `Multiboot2Info::tags`.
///
/// After the first error the iterator is exhausted.
pub struct TagIter<'a> {
    bytes: &'a [u8],
    offset: usize,
    done: bool,
}

impl<'a> TagIter<'a> {
    fn fail(&mut self, err: ParseError) -> Option<Result<Tag<'a>, ParseError>> {
        self.done = true;
        Some(Err(err))
    }
}

impl<'a> Iterator for TagIter<'a> {
    type Item = Result<Tag<'a>, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let offset = self.offset;
        if offset + HEADER_SIZE > self.bytes.len() {
            return self.fail(ParseError::MissingEndTag);
        }
        let tag_type = read_u32(self.bytes, offset);
        let size = read_u32(self.bytes, offset + 4) as usize;
        // boot loaders disagree on whether the end tag has size 8 or 0
        if TagType(tag_type) == TagType::END {
            self.done = true;
            return None;
        }
        if size < HEADER_SIZE {
            return self.fail(ParseError::TagTooSmall { offset, size });
        }
        if size > self.bytes.len() - offset {
            return self.fail(ParseError::TagOverrun { offset, size });
        }
        // the padding of the last tag may be cut off by the total size
        self.offset = core::cmp::min(offset + size.align_up(8), self.bytes.len());
        match Tag::parse(tag_type, &self.bytes[offset + HEADER_SIZE..offset + size]) {
            Ok(tag) => Some(Ok(tag)),
            Err(err) => self.fail(err),
        }
    }
}

impl<'a> core::iter::FusedIterator for TagIter<'a> {}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap_or([0; 4]))
}

fn read_u64(bytes: &[u8], offset: usize) -> u64 {
    u64::from_le_bytes(bytes[offset..offset + 8].try_into().unwrap_or([0; 8]))
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use std::vec::Vec;

    /// Assembles a boot information blob tag by tag.
    pub struct Builder {
        bytes: Vec<u8>,
    }

    impl Builder {
        pub fn new() -> Builder {
            Builder { bytes: vec![0; 8] }
        }

        /// Append a tag whose size field is exactly `8 + body.len()`.
        pub fn tag(mut self, tag_type: u32, body: &[u8]) -> Builder {
            self.raw_tag(tag_type, (8 + body.len()) as u32, body);
            self
        }

        pub fn raw_tag(&mut self, tag_type: u32, size: u32, body: &[u8]) {
            self.bytes.extend_from_slice(&tag_type.to_le_bytes());
            self.bytes.extend_from_slice(&size.to_le_bytes());
            self.bytes.extend_from_slice(body);
            while self.bytes.len() % 8 != 0 {
                self.bytes.push(0);
            }
        }

        pub fn finish(mut self) -> Vec<u8> {
            self.raw_tag(0, 8, &[]);
            self.finish_raw()
        }

        pub fn finish_raw(mut self) -> Vec<u8> {
            let total = self.bytes.len() as u32;
            self.bytes[0..4].copy_from_slice(&total.to_le_bytes());
            self.bytes
        }
    }

    #[test]
    fn informational_tags() {
        let mut meminfo = Vec::new();
        meminfo.extend_from_slice(&639u32.to_le_bytes());
        meminfo.extend_from_slice(&130_048u32.to_le_bytes());
        let blob = Builder::new()
            .tag(1, b"memmap loglevel=debug\0")
            .tag(2, b"GRUB 2.06\0")
            .tag(4, &meminfo)
            .tag(21, &[0; 4])
            .finish();
        let info = Multiboot2Info::from_bytes(&blob).unwrap();
        let tags: Vec<_> = info.tags().collect::<Result<_, _>>().unwrap();
        assert_eq!(tags.len(), 4);
        assert!(matches!(tags[0], Tag::CommandLine("memmap loglevel=debug")));
        assert!(matches!(tags[1], Tag::BootLoaderName("GRUB 2.06")));
        assert!(matches!(tags[2], Tag::BasicMemInfo(BasicMemInfo { mem_lower: 639, mem_upper: 130_048 })));
        assert!(matches!(tags[3], Tag::Other { tag_type: 21, size: 12 }));
        assert_eq!(info.command_line(), Some("memmap loglevel=debug"));
    }

    #[test]
    fn tag_smaller_than_header_is_rejected() {
        let mut b = Builder::new();
        b.raw_tag(1, 4, &[0; 8]);
        let blob = b.finish();
        let info = Multiboot2Info::from_bytes(&blob).unwrap();
        let mut tags = info.tags();
        assert_eq!(tags.next().unwrap().unwrap_err(), ParseError::TagTooSmall { offset: 8, size: 4 });
        assert!(tags.next().is_none(), "iteration stops after an error");
    }

    #[test]
    fn end_tag_of_size_zero() {
        let mut b = Builder::new().tag(2, b"GRUB\0");
        b.raw_tag(0, 0, &[]);
        let blob = b.finish_raw();
        let info = Multiboot2Info::from_bytes(&blob).unwrap();
        let tags: Vec<_> = info.tags().collect();
        assert_eq!(tags.len(), 1, "the end tag terminates without an error");
        assert!(matches!(tags[0], Ok(Tag::BootLoaderName("GRUB"))));
    }

    #[test]
    fn tag_past_total_size_is_rejected() {
        let mut b = Builder::new();
        b.raw_tag(1, 4096, b"abc\0\0\0\0\0");
        let blob = b.finish_raw();
        let info = Multiboot2Info::from_bytes(&blob).unwrap();
        assert_eq!(info.tags().next().unwrap().unwrap_err(), ParseError::TagOverrun { offset: 8, size: 4096 });
    }

    #[test]
    fn missing_end_tag() {
        let blob = Builder::new().tag(2, b"x\0").finish_raw();
        let info = Multiboot2Info::from_bytes(&blob).unwrap();
        let tags: Vec<_> = info.tags().collect();
        assert_eq!(tags.len(), 2);
        assert_eq!(tags[1].unwrap_err(), ParseError::MissingEndTag);
    }

    #[test]
    fn total_size_checked() {
        let mut blob = Builder::new().finish();
        assert!(Multiboot2Info::from_bytes(&blob).is_ok());
        blob[0] = 200;
        assert_eq!(Multiboot2Info::from_bytes(&blob).unwrap_err(), ParseError::InvalidTotalSize(200));
        assert_eq!(Multiboot2Info::from_bytes(&blob[..4]).unwrap_err(), ParseError::InvalidTotalSize(4));
    }

    #[test]
    fn invalid_utf8() {
        let blob = Builder::new().tag(2, &[0xFF, 0xFE, 0]).finish();
        let info = Multiboot2Info::from_bytes(&blob).unwrap();
        assert_eq!(info.tags().next().unwrap().unwrap_err(), ParseError::InvalidUtf8 { tag_type: 2 });
    }
}
