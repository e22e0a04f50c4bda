//! # Image Entry
//!
//! The calling contract of the loaded image: execution starts at offset zero
//! with the framebuffer base address and size as the only arguments.
//!
//! ```text
//! extern "sysv64" fn(framebuffer_base: *mut u8, framebuffer_size: usize)
//! ```
//!
//! The image is not expected to return.

use crate::display::DisplaySurface;
use core::ptr::NonNull;

/// Performs the final jump into the loaded image.
pub trait ImageEntry {
    /// Calls `entry` with the base address and size of `surface`.
    ///
    /// A well-formed image never returns from this call. If it does, the
    /// caller treats that as an unrecoverable fault.
    ///
    /// # Safety
    /// `entry` must point at executable code that follows the entry contract,
    /// and boot services must already have been exited.
    unsafe fn enter(&self, entry: NonNull<u8>, surface: &DisplaySurface);
}
