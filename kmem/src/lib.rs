//! Physical and virtual memory management of the kernel core: the normalized region
//! list, the free-list frame allocator, the 4-level page table walker and the
//! demand paging engine on top of it.

#![cfg_attr(not(test), no_std)]

#[macro_use]
extern crate log;
#[macro_use]
extern crate static_assertions;

pub mod demand;
pub mod paging;
pub mod physical;

#[cfg(test)]
pub(crate) mod testmem;

/// Number of trailing zeros in a page aligned address.
pub const PAGE_ALIGN_BITS: u32 = 12;

/// Size of a normal physical page, 4096 bytes.
pub const PAGE_SIZE: usize = 1 << PAGE_ALIGN_BITS;
