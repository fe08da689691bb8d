//! Turns the boot information into the normalized list of memory regions.

use core::fmt;

use amd64::{PhysAddr, PhysAddrRange};
use kmem::physical::regions::{MemoryRegions, RegionError, RegionType};
use multiboot2::elf::ElfSectionsTag;
use multiboot2::{BasicMemInfo, EntryType, Multiboot2Info, ParseError, Tag};

/// What the memory core needs to know from the bootloader.
pub struct BootMemory {
    pub regions: MemoryRegions,
    /// Smallest range covering all loaded sections of the kernel image.
    pub kernel_image: Option<PhysAddrRange>,
    pub mem_info: Option<BasicMemInfo>,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum BootMemoryError {
    Parse(ParseError),
    NoMemoryMap,
}

impl fmt::Display for BootMemoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            BootMemoryError::Parse(err) => write!(f, "malformed boot information: {}", err),
            BootMemoryError::NoMemoryMap => write!(f, "no memory map in boot information"),
        }
    }
}

fn region_type(entry_type: EntryType) -> RegionType {
    match entry_type {
        EntryType::AVAILABLE => RegionType::Available,
        EntryType::ACPI_RECLAIMABLE => RegionType::AcpiReclaimable,
        EntryType::NVS => RegionType::Nvs,
        EntryType::DEFECTIVE => RegionType::Defective,
        _ => RegionType::Reserved,
    }
}

/// Collect the available memory of `info` and carve out the kernel image and `extra_reserved`.
///
/// Reserved ranges are removed only after all tags were read, so their order in the
/// blob does not matter. A malformed tag aborts the whole parse.
pub fn read_boot_memory(info: &Multiboot2Info, extra_reserved: &[PhysAddrRange]) -> Result<BootMemory, BootMemoryError> {
    let mut regions = MemoryRegions::new();
    let mut have_memory_map = false;
    let mut sections: Option<ElfSectionsTag> = None;
    let mut mem_info = None;

    for tag in info.tags() {
        let tag = tag.map_err(|err| {
            error!("[boot] {}", err);
            BootMemoryError::Parse(err)
        })?;
        match tag {
            Tag::MemoryMap(mmap) => {
                have_memory_map = true;
                for entry in mmap.entries() {
                    let added = match region_type(entry.entry_type) {
                        RegionType::Available => regions.add_available(entry.base_addr, entry.length),
                        other => regions.add_unavailable(entry.base_addr, entry.length, other),
                    };
                    match added {
                        // the region table already warned, later unusable entries must still carve
                        Err(RegionError::Full) => {}
                        Ok(false) => debug!("[boot] nothing new in {:#x}+{:#x}", entry.base_addr, entry.length),
                        Ok(true) => {}
                    }
                }
            }
            Tag::ElfSections(elf) => sections = Some(elf),
            Tag::CommandLine(cmdline) => info!("[boot] command line: {:?}", cmdline),
            Tag::BootLoaderName(name) => info!("[boot] loaded by {:?}", name),
            Tag::BasicMemInfo(meminfo) => {
                info!("[boot] lower memory {} KiB, upper memory {} KiB", meminfo.mem_lower, meminfo.mem_upper);
                mem_info = Some(meminfo);
            }
            Tag::Other { tag_type, size } => debug!("[boot] skipping tag type {} of size {}", tag_type, size),
        }
    }
    if !have_memory_map {
        error!("[boot] no memory map");
        return Err(BootMemoryError::NoMemoryMap);
    }

    let mut kernel_image: Option<PhysAddrRange> = None;
    for section in sections.iter().flat_map(|elf| elf.sections()).filter(|s| s.is_allocated()) {
        let start = PhysAddr(section.addr as usize);
        let end = PhysAddr(section.end_addr() as usize);
        debug!("[boot] kernel {:<9} {:p} size {:#x}", section.kind().name(), start, section.size);
        let pages = regions.reserve(start, end);
        trace!("[boot] {} available pages taken by section", pages);
        kernel_image = Some(match kernel_image {
            None => PhysAddrRange::from_bounds(start, end),
            Some(r) => PhysAddrRange::from_bounds(core::cmp::min(r.start, start), core::cmp::max(r.end, end)),
        });
    }
    match kernel_image {
        Some(image) => info!("[boot] kernel image {:p} - {:p}", image.start, image.end),
        None => warn!("[boot] no kernel sections, image is not protected"),
    }
    for range in extra_reserved {
        regions.reserve(range.start, range.end);
    }

    Ok(BootMemory { regions, kernel_image, mem_info })
}
