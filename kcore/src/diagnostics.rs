use kmem::physical::regions::MemoryRegions;
use multiboot2::{EntryType, Multiboot2Info};

const MIB: u64 = 1024 * 1024;

fn type_char(entry_type: EntryType) -> char {
    match entry_type {
        EntryType::AVAILABLE => 'A',
        EntryType::ACPI_RECLAIMABLE => 'C',
        EntryType::NVS => 'N',
        EntryType::DEFECTIVE => 'X',
        _ => 'R',
    }
}

/// Log the memory map exactly as the boot loader handed it over.
pub fn print_memory_map(info: &Multiboot2Info) {
    let mmap = match info.memory_map() {
        Some(mmap) => mmap,
        None => {
            info!("no memory map");
            return;
        }
    };
    info!("Memory map:");
    info!("{: ^6} {: ^23} {: ^16}", "Type", "Physical Address", "Length");
    let mut total_available = 0;
    for e in mmap.entries() {
        info!("{: ^6} {: ^#23x} {:016x} {}", type_char(e.entry_type), e.base_addr, e.length, e.entry_type.name());
        if e.is_available() {
            total_available += e.length;
        }
    }
    info!(" Available: {} MiB", total_available / MIB);
}

/// Log the page aligned regions after reserved ranges were carved out.
pub fn print_regions(regions: &MemoryRegions) {
    info!("Memory regions:");
    for r in regions.iter() {
        info!("  {:p}-{:p} {:>8} pages {}", r.start, r.end, r.pages(), r.region_type.name());
    }
    let stats = regions.stats();
    info!(
        "{} regions, {} MiB usable, {} of {} pages free, {} reserved",
        stats.region_count,
        stats.total_bytes as u64 / MIB,
        stats.free_pages,
        stats.total_pages,
        stats.reserved_pages,
    );
}
