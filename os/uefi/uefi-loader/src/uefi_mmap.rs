//! # UEFI Memory Map and Boot Services Exit
//!
//! Thin wrappers over `GetMemoryMap` and `ExitBootServices`. The safe
//! `uefi::boot` helpers run their own retry loop and allocate on the way;
//! the handoff needs both calls individually, so they go through the raw
//! boot services table.

use uefi::Status;
use uefi::boot;
use uefi_handoff::memory_map::{MapKey, MapMeta, MapQueryError};
use uefi_handoff::ownership::TransferRejection;
use uefi_raw::table::boot::{BootServices, MemoryDescriptor};

/// The raw boot services table, if the system table is still around.
pub fn boot_services() -> Option<&'static BootServices> {
    let st = uefi::table::system_table_raw()?;
    let bs = unsafe { st.as_ref() }.boot_services;
    unsafe { bs.as_ref() }
}

/// Copies the current memory map into `buffer`.
pub fn get_memory_map(buffer: &mut [u8]) -> Result<MapMeta, MapQueryError> {
    let bs = boot_services().ok_or(MapQueryError::Failed(Status::UNSUPPORTED))?;

    let mut map_size = buffer.len();
    let mut key = 0usize;
    let mut desc_size = 0usize;
    let mut desc_version = 0u32;

    let status = unsafe {
        (bs.get_memory_map)(
            &raw mut map_size,
            buffer.as_mut_ptr().cast::<MemoryDescriptor>(),
            &raw mut key,
            &raw mut desc_size,
            &raw mut desc_version,
        )
    };

    match status {
        Status::SUCCESS => Ok(MapMeta {
            map_size,
            desc_size,
            desc_version,
            key: MapKey::new(key),
        }),
        Status::BUFFER_TOO_SMALL => Err(MapQueryError::BufferTooSmall { required: map_size }),
        status => Err(MapQueryError::Failed(status)),
    }
}

/// Exits boot services with `key`.
///
/// The firmware signals an outdated key with `INVALID_PARAMETER`.
pub fn exit_boot_services(key: MapKey) -> Result<(), TransferRejection> {
    let bs = boot_services().ok_or(TransferRejection::Failed(Status::UNSUPPORTED))?;

    let status = unsafe { (bs.exit_boot_services)(boot::image_handle().as_ptr(), key.value()) };
    match status {
        Status::SUCCESS => Ok(()),
        Status::INVALID_PARAMETER => Err(TransferRejection::StaleMapKey),
        status => Err(TransferRejection::Failed(status)),
    }
}
