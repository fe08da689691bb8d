//! Parser for the Multiboot2 memory map.

use core::fmt;

use super::{read_u32, read_u64, ParseError, TagType};

/// Size of the fields of an entry the parser reads. Later versions may add more.
const MIN_ENTRY_SIZE: usize = 24;

#[derive(Debug, Copy, Clone)]
pub struct MemoryMapTag<'a> {
    entry_size: usize,
    entry_version: u32,
    entries: &'a [u8],
}

impl<'a> MemoryMapTag<'a> {
    pub(crate) fn parse(body: &'a [u8]) -> Result<MemoryMapTag<'a>, ParseError> {
        let tag_type = TagType::MEMORY_MAP.0;
        if body.len() < 8 {
            return Err(ParseError::TruncatedTag { tag_type, size: body.len() + 8 });
        }
        let entry_size = read_u32(body, 0) as usize;
        if entry_size < MIN_ENTRY_SIZE {
            return Err(ParseError::InvalidEntrySize { tag_type, entry_size });
        }
        Ok(MemoryMapTag {
            entry_size,
            entry_version: read_u32(body, 4),
            entries: &body[8..],
        })
    }

    pub fn entry_version(&self) -> u32 {
        self.entry_version
    }

    pub fn entries(&self) -> Entries<'a> {
        Entries {
            chunks: self.entries.chunks_exact(self.entry_size),
        }
    }
}

/// An iterator over the entries of a multiboot2 memory map.
pub struct Entries<'a> {
    chunks: core::slice::ChunksExact<'a, u8>,
}

impl<'a> Iterator for Entries<'a> {
    type Item = MemoryMapEntry;

    fn next(&mut self) -> Option<Self::Item> {
        self.chunks.next().map(|raw| MemoryMapEntry {
            base_addr: read_u64(raw, 0),
            length: read_u64(raw, 8),
            entry_type: EntryType(read_u32(raw, 16)),
        })
    }
}

/// The type of an entry in the memory map.
#[derive(PartialEq, Eq, Copy, Clone)]
pub struct EntryType(pub u32);

impl EntryType {
    pub const AVAILABLE: EntryType = EntryType(1);
    pub const RESERVED: EntryType = EntryType(2);
    pub const ACPI_RECLAIMABLE: EntryType = EntryType(3);
    pub const NVS: EntryType = EntryType(4);
    pub const DEFECTIVE: EntryType = EntryType(5);

    pub fn name(&self) -> &'static str {
        match *self {
            EntryType::AVAILABLE => "Available",
            EntryType::RESERVED => "Reserved",
            EntryType::ACPI_RECLAIMABLE => "ACPI Reclaimable",
            EntryType::NVS => "NVS",
            EntryType::DEFECTIVE => "Bad RAM",
            _ => "Unknown",
        }
    }
}

impl fmt::Debug for EntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntryType({} ~ {})", self.0, self.name())
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct MemoryMapEntry {
    pub base_addr: u64,
    pub length: u64,
    pub entry_type: EntryType,
}

impl MemoryMapEntry {
    /// Return whether the memory range described by this entry is available to the OS.
    pub fn is_available(&self) -> bool {
        self.entry_type == EntryType::AVAILABLE
    }

    /// Exclusive end address, saturating at the top of the address space.
    pub fn end_addr(&self) -> u64 {
        self.base_addr.saturating_add(self.length)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test::Builder;
    use crate::Multiboot2Info;
    use std::vec::Vec;

    fn mmap_body(entry_size: u32, entries: &[(u64, u64, u32)]) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&entry_size.to_le_bytes());
        body.extend_from_slice(&0u32.to_le_bytes());
        for &(base, len, ty) in entries {
            body.extend_from_slice(&base.to_le_bytes());
            body.extend_from_slice(&len.to_le_bytes());
            body.extend_from_slice(&ty.to_le_bytes());
            body.extend_from_slice(&0u32.to_le_bytes());
            body.resize(body.len() + entry_size as usize - 24, 0);
        }
        body
    }

    #[test]
    fn entries_are_decoded() {
        let blob = Builder::new()
            .tag(6, &mmap_body(24, &[(0, 0x9FC00, 1), (0xF0000, 0x10000, 2), (0x100000, 0x7EE0000, 1)]))
            .finish();
        let info = Multiboot2Info::from_bytes(&blob).unwrap();
        let mmap = info.memory_map().expect("memory map present");
        let entries: Vec<_> = mmap.entries().collect();
        assert_eq!(entries.len(), 3);
        assert!(entries[0].is_available());
        assert_eq!(entries[1].entry_type, EntryType::RESERVED);
        assert_eq!(entries[2].end_addr(), 0x7FE0000);
    }

    #[test]
    fn larger_entry_size_is_honored() {
        let blob = Builder::new()
            .tag(6, &mmap_body(32, &[(0x1000, 0x1000, 1), (0x5000, 0x2000, 3)]))
            .finish();
        let info = Multiboot2Info::from_bytes(&blob).unwrap();
        let entries: Vec<_> = info.memory_map().unwrap().entries().collect();
        assert_eq!(entries[1].base_addr, 0x5000);
        assert_eq!(entries[1].entry_type.name(), "ACPI Reclaimable");
    }

    #[test]
    fn too_small_entry_size_is_an_error() {
        let blob = Builder::new().tag(6, &mmap_body(16, &[])).finish();
        let info = Multiboot2Info::from_bytes(&blob).unwrap();
        let first = info.tags().next().expect("one item");
        assert_eq!(first.unwrap_err(), ParseError::InvalidEntrySize { tag_type: 6, entry_size: 16 });
        assert!(info.memory_map().is_none());
    }
}
