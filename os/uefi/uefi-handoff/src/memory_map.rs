//! # Memory Map Snapshots
//!
//! `GetMemoryMap` wants a caller-provided buffer, but allocating that buffer
//! changes the memory map it is meant to hold. The snapshotter therefore
//! probes with an empty buffer, allocates exactly the reported size and
//! queries again, discarding and growing the buffer for as long as the
//! firmware keeps answering "buffer too small".
//!
//! The resulting buffer is the last allocation the loader makes; its map key
//! authorizes exactly one `ExitBootServices` call.

use crate::diagnostics::Diagnostics;
use crate::error::HandoffError;
use crate::pool::{PoolAllocator, PoolBuffer, PoolKind};
use core::fmt;
use core::ptr::NonNull;
use uefi::Status;
use uefi::mem::memory_map::MemoryDescriptor;

/// Opaque token identifying the state of the memory map at snapshot time.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct MapKey(usize);

impl MapKey {
    #[must_use]
    pub const fn new(value: usize) -> Self {
        Self(value)
    }

    #[must_use]
    pub const fn value(self) -> usize {
        self.0
    }
}

impl fmt::Display for MapKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// What a successful `GetMemoryMap` call reports besides the descriptors.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct MapMeta {
    /// Bytes of the buffer filled with descriptors.
    pub map_size: usize,
    /// Stride between descriptors; at least `size_of::<MemoryDescriptor>()`.
    pub desc_size: usize,
    pub desc_version: u32,
    pub key: MapKey,
}

/// Failure modes of a `GetMemoryMap` call.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MapQueryError {
    /// The buffer was too small; `required` bytes are needed now.
    BufferTooSmall { required: usize },
    Failed(Status),
}

/// The firmware's memory map service.
pub trait MemoryMapSource {
    /// Writes the current memory map into `buffer`.
    ///
    /// # Errors
    /// [`MapQueryError::BufferTooSmall`] with the required size if `buffer` is too small.
    fn query_memory_map(&self, buffer: &mut [u8]) -> Result<MapMeta, MapQueryError>;
}

/// An owned copy of the memory map together with its key.
#[derive(Debug)]
pub struct MemoryMapSnapshot<'a> {
    buffer: PoolBuffer<'a>,
    meta: MapMeta,
    attempts: usize,
}

impl MemoryMapSnapshot<'_> {
    #[must_use]
    pub const fn key(&self) -> MapKey {
        self.meta.key
    }

    #[must_use]
    pub const fn desc_size(&self) -> usize {
        self.meta.desc_size
    }

    #[must_use]
    pub const fn desc_version(&self) -> u32 {
        self.meta.desc_version
    }

    /// Bytes occupied by descriptors.
    #[must_use]
    pub const fn map_size(&self) -> usize {
        self.meta.map_size
    }

    /// Size of the owned buffer; never less than [`MemoryMapSnapshot::map_size`].
    #[must_use]
    pub const fn buffer_len(&self) -> usize {
        self.buffer.len()
    }

    /// Number of buffers allocated until the query succeeded.
    #[must_use]
    pub const fn attempts(&self) -> usize {
        self.attempts
    }

    /// Number of descriptors.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.meta.map_size / self.meta.desc_size
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Walks the descriptors in firmware order.
    #[must_use]
    pub fn descriptors(&self) -> Descriptors<'_> {
        Descriptors::new(
            &self.buffer.as_slice()[..self.meta.map_size],
            self.meta.desc_size,
        )
    }

    /// Sum of the page counts of all descriptors.
    #[must_use]
    pub fn total_pages(&self) -> u64 {
        self.descriptors().map(|desc| desc.page_count).sum()
    }

    /// Gives up the buffer without freeing it; returns its address and length.
    ///
    /// Only valid once boot services are gone.
    #[must_use]
    pub fn into_raw_parts(self) -> (NonNull<u8>, usize) {
        self.buffer.into_raw_parts()
    }
}

/// Bounds-checked stride walk over a raw descriptor array.
#[derive(Debug, Clone)]
pub struct Descriptors<'s> {
    bytes: &'s [u8],
    stride: usize,
    index: usize,
    count: usize,
}

impl<'s> Descriptors<'s> {
    /// Walks `bytes` in steps of `stride`; trailing bytes shorter than a descriptor are ignored.
    ///
    /// A `stride` smaller than a descriptor yields nothing.
    #[must_use]
    pub fn new(bytes: &'s [u8], stride: usize) -> Self {
        let count = if stride < size_of::<MemoryDescriptor>() {
            0
        } else {
            bytes.len() / stride
        };

        Self {
            bytes,
            stride,
            index: 0,
            count,
        }
    }
}

impl Iterator for Descriptors<'_> {
    type Item = MemoryDescriptor;

    fn next(&mut self) -> Option<Self::Item> {
        if self.index >= self.count {
            return None;
        }

        let start = self.index.checked_mul(self.stride)?;
        let end = start.checked_add(size_of::<MemoryDescriptor>())?;
        let chunk = self.bytes.get(start..end)?;
        self.index += 1;

        // SAFETY: `chunk` spans a full descriptor; every bit pattern is a valid descriptor.
        Some(unsafe { core::ptr::read_unaligned(chunk.as_ptr().cast::<MemoryDescriptor>()) })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.count - self.index;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Descriptors<'_> {}

/// Captures the current memory map into a pool buffer sized to the firmware's requirement.
///
/// # Errors
/// * [`HandoffError::MapQueryFailed`] for any failure other than "buffer too small",
///   including a probe that unexpectedly succeeds with an empty buffer.
/// * [`HandoffError::AllocationFailed`] if the buffer cannot be allocated.
pub fn snapshot<'a, S>(
    source: &S,
    pool: &'a dyn PoolAllocator,
    diagnostics: &Diagnostics<'_>,
) -> Result<MemoryMapSnapshot<'a>, HandoffError>
where
    S: MemoryMapSource + ?Sized,
{
    let mut required = match source.query_memory_map(&mut []) {
        Err(MapQueryError::BufferTooSmall { required }) => required,
        Err(MapQueryError::Failed(status)) => {
            return Err(diagnostics.report("GetMemoryMap", HandoffError::MapQueryFailed(status)));
        }
        Ok(_) => {
            return Err(diagnostics.report(
                "GetMemoryMap",
                HandoffError::MapQueryFailed(Status::BAD_BUFFER_SIZE),
            ));
        }
    };

    let mut attempts = 0;
    loop {
        attempts += 1;
        let mut buffer = PoolBuffer::allocate(pool, PoolKind::LoaderData, required)
            .map_err(|e| diagnostics.report("AllocatePool", e))?;

        match source.query_memory_map(buffer.as_mut_slice()) {
            Ok(meta) => {
                if meta.desc_size < size_of::<MemoryDescriptor>() || meta.map_size > buffer.len() {
                    return Err(diagnostics.report(
                        "GetMemoryMap",
                        HandoffError::MapQueryFailed(Status::BAD_BUFFER_SIZE),
                    ));
                }

                return Ok(MemoryMapSnapshot {
                    buffer,
                    meta,
                    attempts,
                });
            }
            Err(MapQueryError::BufferTooSmall { required: now }) => {
                // Freeing may itself change the map; the next query reports the truth.
                let grown = buffer.len().saturating_add(1);
                drop(buffer);
                required = now.max(grown);
            }
            Err(MapQueryError::Failed(status)) => {
                return Err(diagnostics.report("GetMemoryMap", HandoffError::MapQueryFailed(status)));
            }
        }
    }
}
