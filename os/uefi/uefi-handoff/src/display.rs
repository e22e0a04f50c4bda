//! # Display Enumeration and Selection
//!
//! Lists the modes of a graphics output device and switches it to one of
//! them, producing the [`DisplaySurface`] that is handed to the kernel.

use crate::diagnostics::Diagnostics;
use crate::error::HandoffError;
use crate::firmware::{Capability, CapabilityHandle, CapabilityRegistry};
use uefi::Status;

/// Resolution and scanline length of a single mode.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ModeInfo {
    pub width: usize,
    pub height: usize,
    /// Pixels per scanline; may exceed `width`.
    pub stride: usize,
}

/// The linear framebuffer of the currently active mode.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FrameBuffer {
    /// Physical base address.
    pub base: u64,
    /// Size in bytes.
    pub size: usize,
}

/// A graphics output device, e.g. the UEFI Graphics Output Protocol.
pub trait DisplayDevice {
    /// Number of modes; valid indices are `0..max_mode`.
    fn max_mode(&self) -> u32;

    /// Index of the currently active mode.
    fn active_mode(&self) -> u32;

    /// Describes mode `index`.
    ///
    /// # Errors
    /// Returns the firmware status if the mode cannot be queried.
    fn query_mode(&self, index: u32) -> Result<ModeInfo, Status>;

    /// Makes mode `index` the active one.
    ///
    /// # Errors
    /// Returns the firmware status if the device refuses the switch.
    fn set_mode(&mut self, index: u32) -> Result<(), Status>;

    /// The framebuffer of the active mode.
    fn frame_buffer(&mut self) -> FrameBuffer;
}

/// One line of the mode listing.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ModeEntry {
    pub index: u32,
    pub width: usize,
    pub height: usize,
    pub active: bool,
}

/// The display configuration passed on to the kernel.
///
/// Owned by the firmware until boot services are exited, by the kernel afterwards.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct DisplaySurface {
    /// Physical framebuffer base address.
    pub base: u64,
    /// Framebuffer size in bytes.
    pub size: usize,
    pub width: usize,
    pub height: usize,
    pub stride: usize,
    /// Index of the mode this surface belongs to.
    pub mode: u32,
}

/// Resolves the first display-capable device.
///
/// # Errors
/// [`HandoffError::DeviceNotFound`] if no device implements the capability.
pub fn locate_display<R>(
    registry: &R,
    diagnostics: &Diagnostics<'_>,
) -> Result<R::Display, HandoffError>
where
    R: CapabilityRegistry + ?Sized,
{
    match registry.locate(Capability::DisplayDevice) {
        Ok(CapabilityHandle::Display(display)) => Ok(display),
        Ok(CapabilityHandle::Volume(_)) => Err(diagnostics.report(
            "LocateHandleBuffer",
            HandoffError::DeviceNotFound(Status::NOT_FOUND),
        )),
        Err(status) => Err(diagnostics.report(
            "LocateHandleBuffer",
            HandoffError::DeviceNotFound(status),
        )),
    }
}

/// Lazily lists all modes of `device`.
///
/// The sequence is finite and can be restarted by calling `enumerate` again,
/// e.g. after a mode switch. Modes the device fails to describe are skipped.
pub fn enumerate<D>(device: &D) -> Modes<'_, D>
where
    D: DisplayDevice + ?Sized,
{
    Modes {
        device,
        next: 0,
        max_mode: device.max_mode(),
        active: device.active_mode(),
    }
}

/// Iterator returned by [`enumerate`].
pub struct Modes<'d, D: ?Sized> {
    device: &'d D,
    next: u32,
    max_mode: u32,
    active: u32,
}

impl<D> Iterator for Modes<'_, D>
where
    D: DisplayDevice + ?Sized,
{
    type Item = ModeEntry;

    fn next(&mut self) -> Option<Self::Item> {
        while self.next < self.max_mode {
            let index = self.next;
            self.next += 1;

            if let Ok(info) = self.device.query_mode(index) {
                return Some(ModeEntry {
                    index,
                    width: info.width,
                    height: info.height,
                    active: index == self.active,
                });
            }
        }

        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.max_mode.saturating_sub(self.next) as usize;
        (0, Some(remaining))
    }
}

/// Switches `device` to mode `index` and captures the resulting surface.
///
/// # Errors
/// * [`HandoffError::InvalidMode`] if `index` is not below the device's mode count.
/// * [`HandoffError::ModeSwitchFailed`] if the device refuses the switch.
pub fn select<D>(
    device: &mut D,
    index: u32,
    diagnostics: &Diagnostics<'_>,
) -> Result<DisplaySurface, HandoffError>
where
    D: DisplayDevice + ?Sized,
{
    let max_mode = device.max_mode();
    if index >= max_mode {
        return Err(diagnostics.report("SetMode", HandoffError::InvalidMode { index, max_mode }));
    }

    device
        .set_mode(index)
        .map_err(|status| diagnostics.report("SetMode", HandoffError::ModeSwitchFailed { index, status }))?;

    let info = device
        .query_mode(index)
        .map_err(|status| diagnostics.report("QueryMode", HandoffError::ModeSwitchFailed { index, status }))?;
    let fb = device.frame_buffer();

    Ok(DisplaySurface {
        base: fb.base,
        size: fb.size,
        width: info.width,
        height: info.height,
        stride: info.stride,
        mode: index,
    })
}
