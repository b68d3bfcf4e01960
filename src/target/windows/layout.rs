//! Binary layouts of `MEMORY_BASIC_INFORMATION`.
//!
//! The structure filled by `VirtualQueryEx` differs in field widths and padding between
//! 32-bit and 64-bit processes, so the variant is picked from the target pointer width at build time.

use std::mem;

use winapi::um::winnt::{
    MEM_COMMIT, MEM_PRIVATE, PAGE_EXECUTE_READ, PAGE_EXECUTE_READWRITE, PAGE_READWRITE,
};

/// Protections that allow reading.
pub(crate) const PAGE_READABLE: u32 = PAGE_EXECUTE_READ | PAGE_EXECUTE_READWRITE | PAGE_READWRITE;
/// Protections that allow both reading and writing.
pub(crate) const PAGE_READWRITEABLE: u32 = PAGE_EXECUTE_READWRITE | PAGE_READWRITE;

#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct MemoryBasicInformation32 {
    pub base_address: u32,
    pub allocation_base: u32,
    pub allocation_protect: u32,
    pub region_size: u32,
    pub state: u32,
    pub protect: u32,
    pub type_: u32,
}

#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct MemoryBasicInformation64 {
    pub base_address: u64,
    pub allocation_base: u64,
    pub allocation_protect: u32,
    pub _alignment1: u32,
    pub region_size: u64,
    pub state: u32,
    pub protect: u32,
    pub type_: u32,
    pub _alignment2: u32,
}

const _: () = assert!(mem::size_of::<MemoryBasicInformation32>() == 28);
const _: () = assert!(mem::size_of::<MemoryBasicInformation64>() == 48);

#[cfg(target_pointer_width = "64")]
pub(crate) type MemoryBasicInformation = MemoryBasicInformation64;
#[cfg(target_pointer_width = "32")]
pub(crate) type MemoryBasicInformation = MemoryBasicInformation32;

/// The fields of a region query the region walk looks at.
pub(crate) trait RegionInfo {
    fn region_size(&self) -> usize;
    fn state(&self) -> u32;
    fn protect(&self) -> u32;
    fn type_(&self) -> u32;

    /// `(readable, writable)` for committed private memory, `None` for anything else
    /// (images, mapped files, free or reserved ranges).
    fn access(&self) -> Option<(bool, bool)> {
        if self.type_() != MEM_PRIVATE || self.state() != MEM_COMMIT {
            return None;
        }
        Some((
            self.protect() & PAGE_READABLE != 0,
            self.protect() & PAGE_READWRITEABLE != 0,
        ))
    }
}

impl RegionInfo for MemoryBasicInformation32 {
    fn region_size(&self) -> usize {
        self.region_size as usize
    }
    fn state(&self) -> u32 {
        self.state
    }
    fn protect(&self) -> u32 {
        self.protect
    }
    fn type_(&self) -> u32 {
        self.type_
    }
}

impl RegionInfo for MemoryBasicInformation64 {
    fn region_size(&self) -> usize {
        self.region_size as usize
    }
    fn state(&self) -> u32 {
        self.state
    }
    fn protect(&self) -> u32 {
        self.protect
    }
    fn type_(&self) -> u32 {
        self.type_
    }
}
