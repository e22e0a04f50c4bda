//! # Boot Image Loader
//!
//! Reads the second-stage image from the boot volume into loader-code pool
//! memory. The image is an opaque blob; its entry point is its first byte.

use crate::diagnostics::Diagnostics;
use crate::error::HandoffError;
use crate::firmware::{Capability, CapabilityHandle, CapabilityRegistry};
use crate::pool::{PoolAllocator, PoolBuffer, PoolKind};
use core::ptr::NonNull;
use log::{debug, info};
use uefi::Status;

/// A mounted file system.
pub trait FileVolume {
    type Root: Directory;

    /// Opens the root directory of the volume.
    ///
    /// # Errors
    /// Returns the firmware status if the volume cannot be opened.
    fn open_volume(&self) -> Result<Self::Root, Status>;
}

/// An open directory.
pub trait Directory {
    type File: ReadOnlyFile;

    /// Opens the regular file at `path` for reading.
    ///
    /// # Errors
    /// Returns the firmware status; `NOT_FOUND` if there is no such file.
    fn open_read_only(&mut self, path: &str) -> Result<Self::File, Status>;
}

/// A regular file opened for reading.
pub trait ReadOnlyFile {
    /// File size in bytes, as recorded in the file's metadata.
    ///
    /// # Errors
    /// Returns the firmware status if the metadata cannot be read.
    fn file_size(&mut self) -> Result<u64, Status>;

    /// Reads from the current position into `buffer`, returning the number of bytes read.
    ///
    /// # Errors
    /// Returns the firmware status if the read fails.
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize, Status>;
}

/// The image, fully materialized in memory.
#[derive(Debug)]
pub struct LoadedImage<'a> {
    buffer: PoolBuffer<'a>,
}

impl LoadedImage<'_> {
    /// Image size in bytes; always the file size.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.buffer.len()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    #[must_use]
    pub const fn as_bytes(&self) -> &[u8] {
        self.buffer.as_slice()
    }

    /// Gives up ownership; the returned pointer is the entry point at offset zero.
    ///
    /// Only valid once boot services are gone, as the memory is never freed.
    #[must_use]
    pub fn into_entry_point(self) -> NonNull<u8> {
        let (ptr, _len) = self.buffer.into_raw_parts();
        ptr
    }
}

/// Resolves the file system of the boot volume.
///
/// # Errors
/// [`HandoffError::DeviceNotFound`] if the volume cannot be resolved.
pub fn locate_volume<R>(registry: &R, diagnostics: &Diagnostics<'_>) -> Result<R::Volume, HandoffError>
where
    R: CapabilityRegistry + ?Sized,
{
    match registry.locate(Capability::FileVolume) {
        Ok(CapabilityHandle::Volume(volume)) => Ok(volume),
        Ok(CapabilityHandle::Display(_)) => Err(diagnostics.report(
            "HandleProtocol",
            HandoffError::DeviceNotFound(Status::NOT_FOUND),
        )),
        Err(status) => Err(diagnostics.report("HandleProtocol", HandoffError::DeviceNotFound(status))),
    }
}

/// Reads the file at `path` on `volume` into a freshly allocated buffer of exactly its size.
///
/// # Errors
/// * [`HandoffError::OpenFailed`] if the volume, the file or its metadata cannot be opened.
/// * [`HandoffError::NotFound`] if there is no file at `path`.
/// * [`HandoffError::AllocationFailed`] if the buffer cannot be allocated.
/// * [`HandoffError::TruncatedRead`] if fewer (or more) bytes than the file size were read,
///   or the file is empty. The buffer is released before returning.
pub fn load_image<'a, V>(
    volume: &V,
    pool: &'a dyn PoolAllocator,
    path: &str,
    diagnostics: &Diagnostics<'_>,
) -> Result<LoadedImage<'a>, HandoffError>
where
    V: FileVolume + ?Sized,
{
    let mut root = volume
        .open_volume()
        .map_err(|status| diagnostics.report("OpenVolume", HandoffError::OpenFailed(status)))?;

    let mut file = root.open_read_only(path).map_err(|status| {
        let error = if status == Status::NOT_FOUND {
            HandoffError::NotFound
        } else {
            HandoffError::OpenFailed(status)
        };
        diagnostics.report("Open", error)
    })?;

    let size = file
        .file_size()
        .map_err(|status| diagnostics.report("GetInfo", HandoffError::OpenFailed(status)))?;
    let Ok(size) = usize::try_from(size) else {
        return Err(diagnostics.report(
            "AllocatePool",
            HandoffError::AllocationFailed {
                size: usize::MAX,
                status: Status::OUT_OF_RESOURCES,
            },
        ));
    };

    if size == 0 {
        return Err(diagnostics.report(
            "Read",
            HandoffError::TruncatedRead {
                read: 0,
                expected: 0,
            },
        ));
    }

    info!("Loading {size} bytes of kernel image from {path}");
    let mut buffer = PoolBuffer::allocate(pool, PoolKind::LoaderCode, size)
        .map_err(|e| diagnostics.report("AllocatePool", e))?;

    // On any mismatch `buffer` is dropped here, returning it to the pool.
    let read = match file.read(buffer.as_mut_slice()) {
        Ok(read) => read,
        Err(status) => {
            debug!("Reading the kernel image failed: {status:?}");
            0
        }
    };
    if read != size {
        return Err(diagnostics.report(
            "Read",
            HandoffError::TruncatedRead {
                read,
                expected: size,
            },
        ));
    }

    info!("Loaded {read} bytes of kernel image");
    Ok(LoadedImage { buffer })
}
