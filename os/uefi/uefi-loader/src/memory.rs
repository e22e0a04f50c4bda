use core::alloc::{GlobalAlloc, Layout};
use core::ptr::{self, NonNull, null_mut};
use uefi::boot::{self, MemoryType};
use uefi::Status;
use uefi_handoff::pool::PoolKind;

/// Backs Rust's global allocator with UEFI pool memory.
///
/// Only usable while boot services are active. Pool memory is 8-byte aligned,
/// so larger alignments are satisfied by over-allocating and keeping the
/// original pointer right in front of the returned block.
pub struct UefiBootAllocator;

#[global_allocator]
static GLOBAL_ALLOC: UefiBootAllocator = UefiBootAllocator;

unsafe impl GlobalAlloc for UefiBootAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let align = layout.align().max(size_of::<usize>());
        let size = layout.size().max(1);
        let Some(total) = size
            .checked_add(align)
            .and_then(|v| v.checked_add(size_of::<usize>()))
        else {
            return null_mut();
        };

        let Ok(raw) = boot::allocate_pool(MemoryType::LOADER_DATA, total) else {
            return null_mut();
        };

        let raw_ptr = raw.as_ptr();
        let addr = raw_ptr as usize + size_of::<usize>();
        let aligned = (addr + (align - 1)) & !(align - 1);
        let header_ptr = (aligned - size_of::<usize>()) as *mut usize;

        unsafe {
            ptr::write(header_ptr, raw_ptr as usize);
        }
        aligned as *mut u8
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        let header_ptr = (ptr as usize - size_of::<usize>()) as *mut usize;
        let orig_ptr = unsafe { ptr::read(header_ptr) as *mut u8 };

        if let Some(orig) = NonNull::new(orig_ptr) {
            let _ = unsafe { boot::free_pool(orig) };
        }
    }
}

/// Firmware memory type of a handoff pool allocation.
pub const fn memory_type(kind: PoolKind) -> MemoryType {
    match kind {
        PoolKind::LoaderCode => MemoryType::LOADER_CODE,
        PoolKind::LoaderData => MemoryType::LOADER_DATA,
    }
}

/// Allocates pool memory of the given kind.
pub fn allocate_pool(kind: PoolKind, size: usize) -> Result<NonNull<u8>, Status> {
    boot::allocate_pool(memory_type(kind), size).map_err(|e| e.status())
}

/// Returns pool memory to the firmware.
///
/// # Safety
/// `ptr` must come from [`allocate_pool`] and must not be used afterwards.
pub unsafe fn free_pool(ptr: NonNull<u8>) -> Result<(), Status> {
    unsafe { boot::free_pool(ptr) }.map_err(|e| e.status())
}
