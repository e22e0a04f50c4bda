//! # Firmware Pool Buffers
//!
//! Owned byte regions backed by the firmware's `AllocatePool` service.
//!
//! A [`PoolBuffer`] returns its memory to the pool when dropped, which gives
//! every abort path of the handoff its cleanup for free. Once boot services
//! are gone, freeing is no longer possible (and the memory belongs to the
//! loaded image anyway), so the buffer is released with
//! [`PoolBuffer::into_raw_parts`] instead.

use crate::error::HandoffError;
use core::ptr::NonNull;
use log::warn;
use uefi::Status;

/// Memory type tag for a pool allocation.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PoolKind {
    /// Code of the loaded image (`EfiLoaderCode`).
    LoaderCode,
    /// Data owned by the loader (`EfiLoaderData`).
    LoaderData,
}

/// The firmware's pool allocation service.
pub trait PoolAllocator {
    /// Allocates `size` bytes of pool memory of the given kind.
    ///
    /// # Errors
    /// Returns the firmware status if the allocation cannot be satisfied.
    fn allocate_pool(&self, kind: PoolKind, size: usize) -> Result<NonNull<u8>, Status>;

    /// Returns a region obtained from [`PoolAllocator::allocate_pool`].
    ///
    /// # Errors
    /// Returns the firmware status if the region was rejected.
    ///
    /// # Safety
    /// `ptr` must have been returned by `allocate_pool` of this allocator and
    /// must not be used or freed afterwards.
    unsafe fn free_pool(&self, ptr: NonNull<u8>) -> Result<(), Status>;
}

/// An owned, zero-initialized pool allocation.
pub struct PoolBuffer<'a> {
    ptr: NonNull<u8>,
    len: usize,
    pool: &'a dyn PoolAllocator,
}

impl<'a> PoolBuffer<'a> {
    /// Allocates exactly `len` bytes from `pool`.
    ///
    /// # Errors
    /// [`HandoffError::AllocationFailed`] if the firmware cannot satisfy the request.
    pub fn allocate(
        pool: &'a dyn PoolAllocator,
        kind: PoolKind,
        len: usize,
    ) -> Result<Self, HandoffError> {
        let ptr = pool
            .allocate_pool(kind, len)
            .map_err(|status| HandoffError::AllocationFailed { size: len, status })?;

        // Pool memory is handed out uninitialized.
        unsafe {
            core::ptr::write_bytes(ptr.as_ptr(), 0, len);
        }

        Ok(Self { ptr, len, pool })
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub const fn as_slice(&self) -> &[u8] {
        unsafe { core::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    #[must_use]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { core::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }

    /// Gives up ownership without returning the memory to the pool.
    ///
    /// Used once boot services are gone and the region passes to the loaded image.
    #[must_use]
    pub fn into_raw_parts(self) -> (NonNull<u8>, usize) {
        let this = core::mem::ManuallyDrop::new(self);
        (this.ptr, this.len)
    }
}

impl Drop for PoolBuffer<'_> {
    fn drop(&mut self) {
        // SAFETY: `ptr` came from `allocate_pool` of this very pool and is dropped exactly once.
        if let Err(status) = unsafe { self.pool.free_pool(self.ptr) } {
            warn!("Failed to return {} bytes to the pool: {status:?}", self.len);
        }
    }
}

impl core::fmt::Debug for PoolBuffer<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PoolBuffer")
            .field("ptr", &self.ptr)
            .field("len", &self.len)
            .finish_non_exhaustive()
    }
}
