//! Segment descriptors, the TSS and the dedicated fault stacks.

use core::ptr;

use amd64::gdt::Gdt;
use amd64::tss::TaskStateSegment;
use amd64::VirtAddr;
use spin::Once;

use crate::config::{DOUBLE_FAULT_IST, GENERAL_PROTECTION_IST, GUARD_STACK_SIZE, PAGE_FAULT_IST};

#[repr(C, align(16))]
struct GuardStack([u8; GUARD_STACK_SIZE]);

assert_eq_size!(GuardStack, [u8; GUARD_STACK_SIZE]);

const EMPTY_STACK: GuardStack = GuardStack([0; GUARD_STACK_SIZE]);

/// Fault stacks, in IST slot order. Only ever touched by the CPU.
static mut GUARD_STACKS: [GuardStack; 3] = [EMPTY_STACK; 3];

static TSS: Once<TaskStateSegment> = Once::new();
static GDT: Once<Gdt> = Once::new();

/// The top of the guard stack used for IST slot `index`.
fn stack_top(index: u8) -> VirtAddr {
    let base = unsafe { ptr::addr_of!(GUARD_STACKS[index as usize - 1]) };
    VirtAddr::from_ptr(base) + GUARD_STACK_SIZE
}

fn build_tss() -> TaskStateSegment {
    let mut tss = TaskStateSegment::new();
    for &index in &[DOUBLE_FAULT_IST, PAGE_FAULT_IST, GENERAL_PROTECTION_IST] {
        if let Err(err) = tss.set_interrupt_stack(index, stack_top(index)) {
            panic!("bad IST slot {}", err.0);
        }
        debug!("[GDT] IST{} -> {:p}", index, stack_top(index));
    }
    tss
}

/// Publish the fault stacks in the TSS, then load the GDT and the task register.
/// Must happen before the IDT referencing the IST slots is loaded.
pub fn init() {
    let tss = TSS.call_once(build_tss);
    let gdt = GDT.call_once(|| {
        let mut gdt = Gdt::new();
        gdt.set_tss(tss);
        gdt
    });
    unsafe { gdt.load() };
    info!("[GDT] loaded with {} guard stacks of {} KiB", 3, GUARD_STACK_SIZE / 1024);
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn guard_stacks_are_disjoint_and_aligned() {
        let tss = build_tss();
        let tops = [
            tss.interrupt_stack(DOUBLE_FAULT_IST).unwrap(),
            tss.interrupt_stack(PAGE_FAULT_IST).unwrap(),
            tss.interrupt_stack(GENERAL_PROTECTION_IST).unwrap(),
        ];
        for (i, a) in tops.iter().enumerate() {
            assert_eq!(a.0 % 16, 0, "stack top must be 16 byte aligned");
            for b in &tops[i + 1..] {
                let distance = if a > b { *a - *b } else { *b - *a };
                assert!(distance >= GUARD_STACK_SIZE, "stacks overlap");
            }
        }
        assert_eq!(tss.interrupt_stack(4), Some(VirtAddr(0)), "unused slots stay empty");
    }
}
