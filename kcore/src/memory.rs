//! The kernel's memory core: frame allocator, active page tables and the heap pager,
//! initialized once from the boot memory regions.

use core::fmt;
use core::ptr;

use amd64::{cpu, PhysAddr, VirtAddr};
use interrupts::fault::FaultContext;
use interrupts::{Outcome, TrapFrame};
use kmem::demand::DemandPager;
use kmem::paging::direct::DirectMapping;
use kmem::paging::{Flags, HardwareTlb, MapError, PageTables};
use kmem::physical::alloc::{FreeError, FreeListAllocator, PageFrameAllocator};
use kmem::physical::regions::MemoryRegions;
use kmem::physical::PageFrame;
use spin::Mutex;

use crate::config;

struct MemoryCore {
    frames: FreeListAllocator,
    tables: PageTables<HardwareTlb>,
    pager: DemandPager,
}

static MEMORY: Mutex<Option<MemoryCore>> = Mutex::new(None);

/// The identity mapping set up by the boot code.
pub fn boot_mapping() -> DirectMapping {
    DirectMapping::new(VirtAddr(0), PhysAddr(0), config::IDENTITY_MAP_SIZE)
}

/// Set up the memory core on top of the normalized `regions`.
/// Must run before the first frame is allocated or the first demand page is touched.
pub fn init(regions: &MemoryRegions) {
    let mapping = boot_mapping();
    let frames = FreeListAllocator::new(regions, mapping.clone(), config::LOW_MEMORY_LIMIT);
    let core = MemoryCore {
        frames,
        tables: unsafe { PageTables::active(mapping) },
        pager: DemandPager::new(config::KERNEL_HEAP_START, config::KERNEL_HEAP_END),
    };
    info!("[MEM] {} free frames, page tables at {:p}", core.frames.free_frames(), core.tables.root());
    with_memory(|memory| *memory = Some(core));
}

/// Run `f` on the memory core with interrupts disabled.
fn with_memory<R, F: FnOnce(&mut Option<MemoryCore>) -> R>(f: F) -> R {
    cpu::without_interrupts(|| f(&mut *MEMORY.lock()))
}

fn with_core<R, F: FnOnce(&mut MemoryCore) -> R>(f: F) -> Option<R> {
    with_memory(|memory| memory.as_mut().map(f))
}

pub fn alloc_frame() -> Option<PageFrame> {
    with_core(|core| core.frames.alloc()).flatten()
}

pub fn free_frame(addr: PhysAddr) -> Result<(), FreeError> {
    with_core(|core| core.frames.free(addr)).unwrap_or(Err(FreeError::Unmapped(addr)))
}

pub fn free_frames() -> usize {
    with_core(|core| core.frames.free_frames()).unwrap_or(0)
}

/// Reserve `count` demand paged pages of kernel heap.
pub fn reserve(count: usize) -> Option<VirtAddr> {
    with_core(|core| core.pager.reserve(count, &mut core.tables, &mut core.frames)).flatten()
}

pub fn release(vaddr: VirtAddr, count: usize) {
    with_core(|core| core.pager.release(vaddr, count, &mut core.tables, &mut core.frames));
}

pub fn translate(vaddr: VirtAddr) -> Option<PhysAddr> {
    with_core(|core| core.tables.translate(vaddr)).flatten()
}

pub fn map(vaddr: VirtAddr, paddr: PhysAddr, flags: Flags) -> Result<(), MapError> {
    with_core(|core| core.tables.map(vaddr, paddr, flags, &mut core.frames)).unwrap_or(Err(MapError::OutOfMemory))
}

/// Remove the mapping of `vaddr` and free page tables that became empty.
pub fn unmap(vaddr: VirtAddr) -> Option<PhysAddr> {
    with_core(|core| {
        let old = core.tables.unmap(vaddr);
        core.tables.reclaim_empty_tables(vaddr, &mut core.frames);
        old.map(|entry| entry.base())
    })
    .flatten()
}

/// The page fault policy: resolve demand pages, report everything else and halt.
///
/// Runs on its own stack with interrupts disabled. It never waits for the memory core,
/// a fault while the core is locked is unresolvable.
pub fn handle_page_fault(frame: &TrapFrame) -> Outcome {
    let ctx = FaultContext::capture(frame);
    if ctx.is_not_present() {
        let resolved = MEMORY.try_lock().and_then(|mut memory| {
            memory
                .as_mut()
                .map(|core| core.pager.resolve_fault(ctx.address, &mut core.tables, &mut core.frames))
        });
        match resolved {
            Some(Ok(backing)) => {
                trace!("[PF] {:p} backed by {:p}", ctx.address, backing);
                return Outcome::Resume;
            }
            Some(Err(err)) => error!("[PF] cannot resolve: {}", err),
            None => error!("[PF] memory core unavailable"),
        }
    }
    error!("[PF] === PAGE FAULT ===\n{}", ctx);
    error!("[PF] registers:\n{}", frame);
    Outcome::Halt
}

/// A failed step of the memory self test.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct SelfTestError(&'static str);

impl fmt::Display for SelfTestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

fn check(condition: bool, what: &'static str) -> Result<(), SelfTestError> {
    if condition {
        Ok(())
    } else {
        Err(SelfTestError(what))
    }
}

/// Exercise allocator, page tables and demand paging on the live system.
pub fn selftest() -> Result<(), SelfTestError> {
    let before = free_frames();

    // LIFO reuse
    let a = alloc_frame().ok_or(SelfTestError("no frame"))?;
    check(free_frame(a.start_address()).is_ok(), "free failed")?;
    let b = alloc_frame().ok_or(SelfTestError("no frame"))?;
    check(a == b, "freed frame not reused first")?;

    // map, translate, unmap
    let scratch = config::SELFTEST_SCRATCH;
    map(scratch, b.start_address(), Flags::WRITABLE).map_err(|_| SelfTestError("map failed"))?;
    check(translate(scratch + 0x42) == Some(b.start_address() + 0x42), "translate after map")?;
    check(unmap(scratch) == Some(b.start_address()), "unmap")?;
    check(translate(scratch).is_none(), "translate after unmap")?;
    check(free_frame(b.start_address()).is_ok(), "free failed")?;
    check(free_frames() == before, "frames leaked by map/unmap")?;

    // demand paging through a real page fault
    let heap = reserve(2).ok_or(SelfTestError("reserve failed"))?;
    check(translate(heap).is_none(), "reserved page is backed")?;
    check(free_frames() + 3 >= before, "reserve consumed page frames")?;
    let reserved = free_frames();
    unsafe {
        let p = heap.as_mut_ptr::<u64>();
        check(ptr::read_volatile(p) == 0, "demand page not zeroed")?;
        ptr::write_volatile(p, 0x5EED);
        check(ptr::read_volatile(p) == 0x5EED, "demand page lost a write")?;
    }
    check(translate(heap).is_some(), "touched page not backed")?;
    check(free_frames() + 1 == reserved, "exactly one frame for one page")?;
    release(heap, 2);
    check(free_frames() == before, "frames leaked by reserve/release")?;

    info!("[MEM] self test passed, {} free frames", before);
    Ok(())
}
