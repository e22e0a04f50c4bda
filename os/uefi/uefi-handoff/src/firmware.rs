//! # Firmware Context
//!
//! The handoff never reaches for global firmware tables. Instead, one context
//! object implementing [`Firmware`] is passed in, and each component only
//! asks for the narrow capability it needs.

use crate::diagnostics::Stall;
use crate::display::DisplayDevice;
use crate::entry::ImageEntry;
use crate::image::FileVolume;
use crate::input::KeyInput;
use crate::memory_map::MemoryMapSource;
use crate::ownership::OwnershipGate;
use crate::pool::PoolAllocator;
use core::fmt;
use uefi::Status;

/// Capabilities that can be looked up in the registry.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Capability {
    /// A graphics output device.
    DisplayDevice,
    /// The file system of the volume the loader was started from.
    FileVolume,
}

/// A handle for one of the registry's capabilities.
#[derive(Debug)]
pub enum CapabilityHandle<D, V> {
    Display(D),
    Volume(V),
}

/// Protocol discovery.
pub trait CapabilityRegistry {
    type Display: DisplayDevice;
    type Volume: FileVolume;

    /// Finds a device that implements `capability`.
    ///
    /// # Errors
    /// Returns the firmware status if no such device exists or it cannot be opened.
    fn locate(
        &self,
        capability: Capability,
    ) -> Result<CapabilityHandle<Self::Display, Self::Volume>, Status>;
}

/// Firmware specification revision, e.g. `2.70`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FirmwareRevision {
    pub major: u16,
    pub minor: u16,
}

impl fmt::Display for FirmwareRevision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.major, self.minor)
    }
}

/// Everything the handoff sequencer needs from the firmware.
pub trait Firmware:
    CapabilityRegistry + PoolAllocator + MemoryMapSource + OwnershipGate + KeyInput + Stall + ImageEntry
{
    /// Revision of the UEFI specification the firmware implements.
    fn revision(&self) -> FirmwareRevision;
}
