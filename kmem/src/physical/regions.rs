//! The normalized list of physical memory regions.
//!
//! Available memory from the boot memory map enters the list aligned inwards to page
//! boundaries, and only where no earlier region covers it already. Unusable entries keep
//! their firmware type, are aligned outwards and take their pages away from available
//! regions. Afterwards, ranges that are in use (kernel image, boot information) are
//! carved out by shrinking, retyping or splitting the available regions they overlap.

use core::fmt;

use arrayvec::ArrayVec;

use amd64::{Alignable, CheckedAlign, PhysAddr};

use crate::PAGE_SIZE;

/// Maximum number of regions that are tracked.
pub const MAX_REGIONS: usize = 64;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RegionType {
    Available,
    /// Reserved by the firmware, or in use by the kernel.
    Reserved,
    AcpiReclaimable,
    Nvs,
    Defective,
}

impl RegionType {
    pub fn name(&self) -> &'static str {
        match *self {
            RegionType::Available => "Available",
            RegionType::Reserved => "Reserved",
            RegionType::AcpiReclaimable => "ACPI Reclaimable",
            RegionType::Nvs => "NVS",
            RegionType::Defective => "Bad RAM",
        }
    }
}

/// A page aligned, half-open range of physical memory.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct MemoryRegion {
    pub start: PhysAddr,
    pub end: PhysAddr,
    pub region_type: RegionType,
}

impl MemoryRegion {
    pub fn length(&self) -> usize {
        self.end - self.start
    }

    pub fn pages(&self) -> usize {
        self.length() / PAGE_SIZE
    }

    pub fn is_available(&self) -> bool {
        self.region_type == RegionType::Available
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RegionError {
    /// All `MAX_REGIONS` slots are in use.
    Full,
}

impl fmt::Display for RegionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            RegionError::Full => write!(f, "more than {} memory regions", MAX_REGIONS),
        }
    }
}

/// Totals over all regions, in bytes and pages.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct RegionStats {
    /// Available memory reported by the boot memory map, after alignment.
    pub total_bytes: usize,
    pub total_pages: usize,
    /// Pages still available after carving out reserved ranges.
    pub free_pages: usize,
    /// Pages taken away from available regions by `reserve`.
    pub reserved_pages: usize,
    pub region_count: usize,
}

pub struct MemoryRegions {
    regions: ArrayVec<MemoryRegion, MAX_REGIONS>,
    total_bytes: usize,
    reserved_pages: usize,
}

impl MemoryRegions {
    pub fn new() -> MemoryRegions {
        MemoryRegions {
            regions: ArrayVec::new(),
            total_bytes: 0,
            reserved_pages: 0,
        }
    }

    /// Add available memory from `base` of `length` bytes, rounded inwards to whole pages.
    /// Parts already covered by another region are skipped, so overlapping entries are
    /// counted once.
    ///
    /// Returns whether anything was added; ranges without a complete new page are dropped.
    pub fn add_available(&mut self, base: u64, length: u64) -> Result<bool, RegionError> {
        let start = match base.checked_align_up(PAGE_SIZE as u64) {
            Some(start) => PhysAddr(start as usize),
            None => return Ok(false),
        };
        let end = PhysAddr(base.saturating_add(length).align_down(PAGE_SIZE as u64) as usize);

        let mut added = false;
        let mut cursor = start;
        while cursor < end {
            // the lowest region still in the way
            let next = self.regions.iter()
                .filter(|r| r.start < end && r.end > cursor)
                .min_by_key(|r| r.start)
                .map(|r| (r.start, r.end));
            let (gap_end, resume) = match next {
                Some((r_start, r_end)) => (core::cmp::max(r_start, cursor), r_end),
                None => (end, end),
            };
            if cursor < gap_end {
                self.push(cursor, gap_end, RegionType::Available)?;
                self.total_bytes += gap_end - cursor;
                added = true;
            }
            cursor = resume;
        }
        Ok(added)
    }

    /// Record memory the firmware reports as unusable, rounded outwards to whole pages.
    /// Overlapping available pages are taken away even if the region itself cannot be
    /// recorded.
    pub fn add_unavailable(&mut self, base: u64, length: u64, region_type: RegionType) -> Result<bool, RegionError> {
        let start = PhysAddr(base.align_down(PAGE_SIZE as u64) as usize);
        let end = align_end(PhysAddr(base.saturating_add(length) as usize));
        if start >= end {
            return Ok(false);
        }
        let lost = self.carve(start, end, false);
        self.total_bytes -= lost * PAGE_SIZE;
        self.push(start, end, region_type)?;
        Ok(true)
    }

    fn push(&mut self, start: PhysAddr, end: PhysAddr, region_type: RegionType) -> Result<(), RegionError> {
        if self.regions.is_full() {
            warn!("[kmem] too many memory regions, ignoring {:#x}-{:#x}", start.0, end.0);
            return Err(RegionError::Full);
        }
        self.regions.push(MemoryRegion { start, end, region_type });
        Ok(())
    }

    /// Remove `[start, end)`, widened to whole pages, from all available regions.
    ///
    /// Returns the number of pages that were available before.
    pub fn reserve(&mut self, start: PhysAddr, end: PhysAddr) -> usize {
        let page_start = start.align_down(PAGE_SIZE);
        let page_end = align_end(end);
        if page_start >= page_end {
            return 0;
        }
        let reserved = self.carve(page_start, page_end, true);
        self.reserved_pages += reserved;
        reserved
    }

    /// Take the page range `[page_start, page_end)` out of the available regions. A region
    /// covered completely is retyped as reserved if `keep_covered`, dropped otherwise.
    /// Returns the number of available pages lost.
    fn carve(&mut self, page_start: PhysAddr, page_end: PhysAddr, keep_covered: bool) -> usize {
        let mut lost = 0;
        // splits append to the list, those parts are beyond the carved range anyway
        let count = self.regions.len();
        for i in 0..count {
            let region = self.regions[i];
            if !region.is_available() || page_start >= region.end || page_end <= region.start {
                continue;
            }
            let overlap_start = core::cmp::max(page_start, region.start);
            let overlap_end = core::cmp::min(page_end, region.end);
            lost += (overlap_end - overlap_start) / PAGE_SIZE;

            let full = self.regions.is_full();
            let r = &mut self.regions[i];
            if overlap_start == region.start && overlap_end == region.end {
                if keep_covered {
                    r.region_type = RegionType::Reserved;
                } else {
                    // emptied, removed below
                    r.end = r.start;
                }
            } else if overlap_start == region.start {
                r.start = overlap_end;
            } else if overlap_end == region.end {
                r.end = overlap_start;
            } else if !full {
                r.end = overlap_start;
                self.regions.push(MemoryRegion {
                    start: overlap_end,
                    end: region.end,
                    region_type: RegionType::Available,
                });
            } else {
                warn!("[kmem] no space for split region, marking {:#x}-{:#x} as reserved", region.start.0, region.end.0);
                r.region_type = RegionType::Reserved;
                // the parts outside of the carved range are lost as well
                lost += region.pages() - (overlap_end - overlap_start) / PAGE_SIZE;
            }
        }
        self.regions.retain(|r| r.start < r.end);
        lost
    }

    pub fn iter(&self) -> impl Iterator<Item = &MemoryRegion> {
        self.regions.iter()
    }

    pub fn available(&self) -> impl Iterator<Item = &MemoryRegion> {
        self.regions.iter().filter(|r| r.is_available())
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// Whether `addr` lies inside an available region.
    pub fn is_available(&self, addr: PhysAddr) -> bool {
        self.available().any(|r| addr >= r.start && addr < r.end)
    }

    pub fn stats(&self) -> RegionStats {
        RegionStats {
            total_bytes: self.total_bytes,
            total_pages: self.total_bytes / PAGE_SIZE,
            free_pages: self.available().map(|r| r.pages()).sum(),
            reserved_pages: self.reserved_pages,
            region_count: self.regions.len(),
        }
    }
}

/// Round an exclusive end address up to a page boundary, saturating at the last one.
fn align_end(end: PhysAddr) -> PhysAddr {
    match end.0.checked_align_up(PAGE_SIZE) {
        Some(end) => PhysAddr(end),
        None => PhysAddr(usize::max_value().align_down(PAGE_SIZE)),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::vec::Vec;

    fn bounds(regions: &MemoryRegions) -> Vec<(usize, usize, RegionType)> {
        regions.iter().map(|r| (r.start.0, r.end.0, r.region_type)).collect()
    }

    #[test]
    fn available_memory_aligned_inwards() {
        let mut regions = MemoryRegions::new();
        assert_eq!(regions.add_available(0x1001, 0x3000), Ok(true));
        assert_eq!(regions.add_available(0x9_0010, 0xFF0), Ok(false), "no complete page");
        assert_eq!(regions.add_available(0xFFFF_FFFF_FFFF_F001, 0x10), Ok(false));
        assert_eq!(bounds(&regions), vec![(0x2000, 0x4000, RegionType::Available)]);
        assert_eq!(regions.stats().total_pages, 2);
    }

    #[test]
    fn overlapping_available_entries_count_once() {
        let mut regions = MemoryRegions::new();
        regions.add_available(0x10_0000, 0x10_0000).unwrap();
        assert_eq!(regions.add_available(0x10_0000, 0x10_0000), Ok(false), "duplicate");
        assert_eq!(regions.add_available(0x18_0000, 0x10_0000), Ok(true));
        assert_eq!(regions.add_available(0x8_0000, 0x20_0000), Ok(true));
        assert_eq!(bounds(&regions), vec![
            (0x10_0000, 0x20_0000, RegionType::Available),
            (0x20_0000, 0x28_0000, RegionType::Available),
            (0x8_0000, 0x10_0000, RegionType::Available),
        ]);
        let stats = regions.stats();
        assert_eq!(stats.total_bytes, 0x20_0000, "stats = {:?}", stats);
        assert_eq!(stats.free_pages, 0x200);
    }

    #[test]
    fn unavailable_entries_keep_their_type() {
        let mut regions = MemoryRegions::new();
        regions.add_available(0, 0x9_FC00).unwrap();
        assert_eq!(regions.add_unavailable(0x9_FC00, 0x400, RegionType::Reserved), Ok(true));
        regions.add_available(0x10_0000, 0x10_0000).unwrap();
        // ACPI tables inside available memory win over it
        assert_eq!(regions.add_unavailable(0x1F_F800, 0x800, RegionType::AcpiReclaimable), Ok(true));
        assert_eq!(regions.add_unavailable(0x30_0000, 0x1000, RegionType::Defective), Ok(true));
        assert_eq!(regions.add_unavailable(0x40_0000, 0, RegionType::Nvs), Ok(false), "empty");
        // available memory behind a bad page stays excluded
        assert_eq!(regions.add_available(0x30_0000, 0x2000), Ok(true));

        assert_eq!(bounds(&regions), vec![
            (0, 0x9_F000, RegionType::Available),
            (0x9_F000, 0xA_0000, RegionType::Reserved),
            (0x10_0000, 0x1F_F000, RegionType::Available),
            (0x1F_F000, 0x20_0000, RegionType::AcpiReclaimable),
            (0x30_0000, 0x30_1000, RegionType::Defective),
            (0x30_1000, 0x30_2000, RegionType::Available),
        ]);
        assert!(!regions.is_available(PhysAddr(0x1F_F000)));
        let stats = regions.stats();
        assert_eq!(stats.total_pages, 0x9F + 0xFF + 1, "stats = {:?}", stats);
        assert_eq!(stats.reserved_pages, 0, "firmware regions are not kernel reservations");
        assert_eq!(RegionType::Defective.name(), "Bad RAM");
    }

    #[test]
    fn unavailable_entry_covering_a_region_replaces_it() {
        let mut regions = MemoryRegions::new();
        regions.add_available(0x1000, 0x1000).unwrap();
        regions.add_available(0x5000, 0x1000).unwrap();
        regions.add_unavailable(0x1000, 0x1000, RegionType::Nvs).unwrap();
        assert_eq!(bounds(&regions), vec![
            (0x5000, 0x6000, RegionType::Available),
            (0x1000, 0x2000, RegionType::Nvs),
        ]);
        assert_eq!(regions.stats().total_pages, 1);
    }

    #[test]
    fn reserve_exactly_covering_a_region_retypes_it() {
        let mut regions = MemoryRegions::new();
        regions.add_available(0x10_0000, 0x10_0000).unwrap();
        assert_eq!(regions.reserve(PhysAddr(0x10_0000), PhysAddr(0x20_0000)), 256);
        assert_eq!(bounds(&regions), vec![(0x10_0000, 0x20_0000, RegionType::Reserved)]);
        let stats = regions.stats();
        assert_eq!(stats.free_pages, 0, "stats = {:?}", stats);
        assert_eq!(stats.reserved_pages, 256, "stats = {:?}", stats);
        assert!(!regions.is_available(PhysAddr(0x10_0000)));
        assert!(!regions.is_available(PhysAddr(0x1F_FFFF)));
    }

    #[test]
    fn reserve_shrinks_start_and_end() {
        let mut regions = MemoryRegions::new();
        regions.add_available(0x10_0000, 0x10_0000).unwrap();
        regions.add_available(0x40_0000, 0x10_0000).unwrap();
        // unaligned range is widened to whole pages
        assert_eq!(regions.reserve(PhysAddr(0x10_0010), PhysAddr(0x10_2001)), 3);
        assert_eq!(regions.reserve(PhysAddr(0x4F_F000), PhysAddr(0x60_0000)), 1);
        assert_eq!(bounds(&regions), vec![
            (0x10_3000, 0x20_0000, RegionType::Available),
            (0x40_0000, 0x4F_F000, RegionType::Available),
        ]);
    }

    #[test]
    fn reserve_in_the_middle_splits() {
        let mut regions = MemoryRegions::new();
        regions.add_available(0x10_0000, 0x10_0000).unwrap();
        assert_eq!(regions.reserve(PhysAddr(0x14_0000), PhysAddr(0x15_0000)), 16);
        assert_eq!(bounds(&regions), vec![
            (0x10_0000, 0x14_0000, RegionType::Available),
            (0x15_0000, 0x20_0000, RegionType::Available),
        ]);
        assert_eq!(regions.stats().free_pages, 256 - 16);
    }

    #[test]
    fn reserve_spanning_several_regions() {
        let mut regions = MemoryRegions::new();
        regions.add_available(0x1000, 0x3000).unwrap();
        regions.add_available(0x5000, 0x3000).unwrap();
        assert_eq!(regions.reserve(PhysAddr(0x3000), PhysAddr(0x6000)), 2);
        assert_eq!(bounds(&regions), vec![
            (0x1000, 0x3000, RegionType::Available),
            (0x6000, 0x8000, RegionType::Available),
        ]);
    }

    #[test]
    fn overflowing_split_reserves_whole_region() {
        let mut regions = MemoryRegions::new();
        for i in 0..MAX_REGIONS as u64 {
            assert_eq!(regions.add_available(i * 0x10_0000, 0x4000), Ok(true));
        }
        assert_eq!(regions.add_available(0x1000_0000, 0x4000), Err(RegionError::Full));

        assert_eq!(regions.reserve(PhysAddr(0x1000), PhysAddr(0x2000)), 4);
        assert_eq!(regions.iter().next().map(|r| r.region_type), Some(RegionType::Reserved));
        assert_eq!(regions.len(), MAX_REGIONS);
    }

    #[test]
    fn reserved_regions_are_skipped() {
        let mut regions = MemoryRegions::new();
        regions.add_available(0x1000, 0x1000).unwrap();
        assert_eq!(regions.reserve(PhysAddr(0x1000), PhysAddr(0x2000)), 1);
        assert_eq!(regions.reserve(PhysAddr(0x1000), PhysAddr(0x2000)), 0, "already reserved");
        assert_eq!(regions.reserve(PhysAddr(0x3000), PhysAddr(0x3000)), 0, "empty range");
    }
}
