//! # Firmware Context
//!
//! [`UefiFirmware`] backs every handoff capability with the running UEFI
//! firmware. Once the first `ExitBootServices` attempt has been made, only
//! memory services remain usable: console mirroring stops and stalls turn
//! into no-ops.

use crate::file_system::BootVolume;
use crate::gop::GopDisplay;
use crate::logger::UefiLogger;
use crate::{memory, uefi_mmap};
use core::cell::Cell;
use core::ptr::NonNull;
use core::time::Duration;
use log::trace;
use uefi::boot;
use uefi::proto::console::text;
use uefi::Status;
use uefi_handoff::diagnostics::Stall;
use uefi_handoff::display::DisplaySurface;
use uefi_handoff::entry::ImageEntry;
use uefi_handoff::firmware::{
    Capability, CapabilityHandle, CapabilityRegistry, Firmware, FirmwareRevision,
};
use uefi_handoff::input::{Key, KeyInput};
use uefi_handoff::memory_map::{MapKey, MapMeta, MapQueryError, MemoryMapSource};
use uefi_handoff::ownership::{OwnershipGate, TransferRejection};
use uefi_handoff::pool::{PoolAllocator, PoolKind};

/// Calling convention of the loaded image.
type KernelEntry = extern "sysv64" fn(framebuffer: *mut u8, framebuffer_size: usize);

pub struct UefiFirmware {
    logger: &'static UefiLogger,
    exit_attempted: Cell<bool>,
}

impl UefiFirmware {
    pub const fn new(logger: &'static UefiLogger) -> Self {
        Self {
            logger,
            exit_attempted: Cell::new(false),
        }
    }
}

impl CapabilityRegistry for UefiFirmware {
    type Display = GopDisplay;
    type Volume = BootVolume;

    fn locate(
        &self,
        capability: Capability,
    ) -> Result<CapabilityHandle<Self::Display, Self::Volume>, Status> {
        match capability {
            Capability::DisplayDevice => GopDisplay::open().map(CapabilityHandle::Display),
            Capability::FileVolume => BootVolume::open().map(CapabilityHandle::Volume),
        }
    }
}

impl PoolAllocator for UefiFirmware {
    fn allocate_pool(&self, kind: PoolKind, size: usize) -> Result<NonNull<u8>, Status> {
        memory::allocate_pool(kind, size)
    }

    unsafe fn free_pool(&self, ptr: NonNull<u8>) -> Result<(), Status> {
        unsafe { memory::free_pool(ptr) }
    }
}

impl MemoryMapSource for UefiFirmware {
    fn query_memory_map(&self, buffer: &mut [u8]) -> Result<MapMeta, MapQueryError> {
        uefi_mmap::get_memory_map(buffer)
    }
}

impl OwnershipGate for UefiFirmware {
    fn exit_boot_services(&self, key: MapKey) -> Result<(), TransferRejection> {
        if !self.exit_attempted.replace(true) {
            self.logger.exit_boot_services();
        }
        uefi_mmap::exit_boot_services(key)
    }
}

impl KeyInput for UefiFirmware {
    fn wait_for_key(&self) -> Result<(), Status> {
        let event = uefi::system::with_stdin(|stdin| stdin.wait_for_key_event())
            .ok_or(Status::UNSUPPORTED)?;
        boot::wait_for_event(&mut [event]).map_err(|e| e.status())?;
        Ok(())
    }

    fn read_key(&self) -> Result<Option<Key>, Status> {
        let key = uefi::system::with_stdin(|stdin| stdin.read_key()).map_err(|e| e.status())?;
        Ok(key.map(|key| match key {
            text::Key::Printable(c) => Key::Printable(char::from(c)),
            text::Key::Special(code) => Key::Special(code.0),
        }))
    }
}

impl Stall for UefiFirmware {
    fn stall(&self, duration: Duration) {
        if self.exit_attempted.get() {
            return;
        }
        let Some(bs) = uefi_mmap::boot_services() else {
            return;
        };

        let micros = usize::try_from(duration.as_micros()).unwrap_or(usize::MAX);
        let status = unsafe { (bs.stall)(micros) };
        if status.is_error() {
            trace!("Stall failed: {status:?}");
        }
    }
}

impl ImageEntry for UefiFirmware {
    #[allow(clippy::cast_possible_truncation)]
    unsafe fn enter(&self, entry: NonNull<u8>, surface: &DisplaySurface) {
        let kernel: KernelEntry = unsafe { core::mem::transmute(entry.as_ptr()) };
        let framebuffer = core::ptr::with_exposed_provenance_mut::<u8>(surface.base as usize);
        kernel(framebuffer, surface.size);
    }
}

impl Firmware for UefiFirmware {
    fn revision(&self) -> FirmwareRevision {
        let revision = uefi::system::uefi_revision();
        FirmwareRevision {
            major: revision.major(),
            minor: revision.minor(),
        }
    }
}
