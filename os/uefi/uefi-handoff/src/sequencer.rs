//! # Handoff Sequencer
//!
//! Drives the loader from firmware control into the kernel:
//!
//! 1. configure the display interactively,
//! 2. load the kernel image,
//! 3. snapshot the memory map and exit boot services, re-snapshotting
//!    for as long as the firmware reports a stale map key,
//! 4. jump into the image with the framebuffer base and size.
//!
//! Display and image are finalized before the first snapshot, and every
//! protocol handle is closed by then. Between a snapshot and the exit call
//! nothing is logged or allocated.

use crate::config::BootConfig;
use crate::diagnostics::Diagnostics;
use crate::display::{self, DisplayDevice, DisplaySurface};
use crate::error::HandoffError;
use crate::firmware::Firmware;
use crate::image::{self, LoadedImage};
use crate::input;
use crate::memory_map::{self, MemoryMapSnapshot};
use crate::ownership;
use core::convert::Infallible;
use log::{debug, info};

/// Progress of the handoff.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum HandoffState {
    Init,
    DisplayConfigured,
    ImageLoaded,
    SnapshotTaken,
    OwnershipTransferred,
    /// Terminal; the image has been entered.
    ControlTransferred,
    /// Terminal; the handoff gave up for the given reason.
    Aborted(HandoffError),
}

pub struct HandoffSequencer<'f, F> {
    firmware: &'f F,
    config: BootConfig,
    state: HandoffState,
    snapshots: usize,
    transfers: usize,
}

impl<'f, F> HandoffSequencer<'f, F>
where
    F: Firmware,
{
    #[must_use]
    pub const fn new(firmware: &'f F, config: BootConfig) -> Self {
        Self {
            firmware,
            config,
            state: HandoffState::Init,
            snapshots: 0,
            transfers: 0,
        }
    }

    #[must_use]
    pub const fn state(&self) -> HandoffState {
        self.state
    }

    /// Number of memory map snapshots taken so far.
    #[must_use]
    pub const fn snapshot_attempts(&self) -> usize {
        self.snapshots
    }

    /// Number of `ExitBootServices` calls made so far.
    #[must_use]
    pub const fn transfer_attempts(&self) -> usize {
        self.transfers
    }

    /// Whether the firmware can still take control back.
    ///
    /// False once an `ExitBootServices` call has been made, whether or not it
    /// went through, and after the image has been entered.
    #[must_use]
    pub const fn firmware_usable(&self) -> bool {
        self.transfers == 0 && !matches!(self.state, HandoffState::ControlTransferred)
    }

    /// Runs the handoff.
    ///
    /// Only returns on failure: either an abort (state [`HandoffState::Aborted`],
    /// all buffers released) or, after the jump, [`HandoffError::EntryInvariantViolated`]
    /// if the image came back (state stays [`HandoffState::ControlTransferred`]).
    ///
    /// # Errors
    /// The reason the handoff did not complete.
    pub fn run(&mut self) -> Result<Infallible, HandoffError> {
        let firmware = self.firmware;
        let diagnostics = Diagnostics::new(firmware, self.config.error_pause);

        let surface = self
            .configure_display(&diagnostics)
            .map_err(|e| self.abort(&diagnostics, "SetGraphics", e))?;
        self.state = HandoffState::DisplayConfigured;

        let image = self
            .load_image(&diagnostics)
            .map_err(|e| self.abort(&diagnostics, "LoadKernel", e))?;
        self.state = HandoffState::ImageLoaded;

        let snapshot = match self.acquire_machine(&diagnostics) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                drop(image);
                return Err(self.abort(&diagnostics, "ExitBootServices", e));
            }
        };
        self.state = HandoffState::OwnershipTransferred;

        Err(self.enter(image, snapshot, &surface, &diagnostics))
    }

    fn configure_display(&self, diagnostics: &Diagnostics<'_>) -> Result<DisplaySurface, HandoffError> {
        let firmware = self.firmware;
        let mut device = display::locate_display(firmware, diagnostics)?;

        info!("UEFI version {}", firmware.revision());
        let current = device.frame_buffer();
        info!(
            "Current framebuffer at {:#010x} @ {} bytes",
            current.base, current.size
        );

        for mode in display::enumerate(&device) {
            info!(
                "Mode {}: {}x{}{}",
                mode.index,
                mode.width,
                mode.height,
                if mode.active { " | active" } else { "" }
            );
        }

        info!("Press 0-9 to select a graphics mode");
        let index = input::prompt_mode(firmware, diagnostics)?;
        let surface = display::select(&mut device, index, diagnostics)?;
        info!(
            "Mode {} selected: {}x{}, framebuffer at {:#010x} @ {} bytes",
            surface.mode, surface.width, surface.height, surface.base, surface.size
        );

        Ok(surface)
    }

    fn load_image(&self, diagnostics: &Diagnostics<'_>) -> Result<LoadedImage<'f>, HandoffError> {
        let firmware = self.firmware;
        let volume = image::locate_volume(firmware, diagnostics)?;
        image::load_image(&volume, firmware, self.config.image_path, diagnostics)
    }

    /// Snapshot-then-exit until the firmware accepts a key.
    fn acquire_machine(
        &mut self,
        diagnostics: &Diagnostics<'_>,
    ) -> Result<MemoryMapSnapshot<'f>, HandoffError> {
        let firmware = self.firmware;
        info!("Exiting boot services ...");

        loop {
            let snapshot = memory_map::snapshot(firmware, firmware, diagnostics)?;
            self.snapshots += 1;
            self.state = HandoffState::SnapshotTaken;

            self.transfers += 1;
            match ownership::transfer(firmware, &snapshot, diagnostics) {
                Ok(()) => return Ok(snapshot),
                Err(HandoffError::StaleMapKey) => {
                    debug!("Map key {} went stale, taking a new snapshot", snapshot.key());
                    drop(snapshot);
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn enter(
        &mut self,
        image: LoadedImage<'f>,
        snapshot: MemoryMapSnapshot<'f>,
        surface: &DisplaySurface,
        diagnostics: &Diagnostics<'_>,
    ) -> HandoffError {
        debug!(
            "Took over with {} descriptors (version {}, {} pages) after {} snapshots",
            snapshot.len(),
            snapshot.desc_version(),
            snapshot.total_pages(),
            self.snapshots
        );

        // Boot services are gone; both regions now belong to the kernel.
        let (_map, _map_len) = snapshot.into_raw_parts();
        let entry = image.into_entry_point();

        self.state = HandoffState::ControlTransferred;
        unsafe {
            self.firmware.enter(entry, surface);
        }

        diagnostics.report("KernelEntry", HandoffError::EntryInvariantViolated)
    }

    fn abort(&mut self, diagnostics: &Diagnostics<'_>, context: &str, error: HandoffError) -> HandoffError {
        // The failing step has already logged its status line.
        debug!("{context} aborted: {error}");
        self.state = HandoffState::Aborted(error);
        diagnostics.pause();
        error
    }
}
