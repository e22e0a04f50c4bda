//! # Graphics Output Protocol
//!
//! The GOP is opened non-exclusively so the text console, which renders on
//! the same device, stays alive for the mode listing and the prompt.

use crate::memory;
use core::ptr::NonNull;
use log::{info, warn};
use uefi::boot::{self, OpenProtocolAttributes, OpenProtocolParams, ScopedProtocol, SearchType};
use uefi::proto::console::gop::GraphicsOutput;
use uefi::{Identify, Status};
use uefi_handoff::display::{DisplayDevice, FrameBuffer, ModeInfo};
use uefi_raw::protocol::console::{
    GraphicsOutputModeInformation, GraphicsOutputProtocol, GraphicsOutputProtocolMode,
};

pub struct GopDisplay {
    gop: ScopedProtocol<GraphicsOutput>,
}

impl GopDisplay {
    /// Opens the first handle that supports the GOP.
    pub fn open() -> Result<Self, Status> {
        let handles = boot::locate_handle_buffer(SearchType::ByProtocol(&GraphicsOutput::GUID))
            .map_err(|e| e.status())?;
        let handle = *handles.first().ok_or(Status::NOT_FOUND)?;
        info!("Found graphics output at handle {:p}", handle.as_ptr());

        let gop = unsafe {
            boot::open_protocol::<GraphicsOutput>(
                OpenProtocolParams {
                    handle,
                    agent: boot::image_handle(),
                    controller: None,
                },
                OpenProtocolAttributes::GetProtocol,
            )
        }
        .map_err(|e| e.status())?;

        Ok(Self { gop })
    }

    fn raw(&self) -> *const GraphicsOutputProtocol {
        core::ptr::from_ref::<GraphicsOutput>(&self.gop).cast()
    }

    fn raw_mut(&mut self) -> *mut GraphicsOutputProtocol {
        core::ptr::from_mut::<GraphicsOutput>(&mut self.gop).cast()
    }

    fn mode(&self) -> &GraphicsOutputProtocolMode {
        unsafe { &*(*self.raw()).mode }
    }
}

impl DisplayDevice for GopDisplay {
    fn max_mode(&self) -> u32 {
        self.mode().max_mode
    }

    fn active_mode(&self) -> u32 {
        self.mode().mode
    }

    fn query_mode(&self, index: u32) -> Result<ModeInfo, Status> {
        let gop = self.raw();
        let mut size = 0usize;
        let mut info: *const GraphicsOutputModeInformation = core::ptr::null();

        let status = unsafe { ((*gop).query_mode)(gop, index, &raw mut size, &raw mut info) };
        if status.is_error() {
            return Err(status);
        }
        let info = NonNull::new(info.cast_mut()).ok_or(Status::DEVICE_ERROR)?;

        let mode = {
            let info = unsafe { info.as_ref() };
            ModeInfo {
                width: info.horizontal_resolution as usize,
                height: info.vertical_resolution as usize,
                stride: info.pixels_per_scan_line as usize,
            }
        };

        // The caller owns the returned mode information.
        if let Err(status) = unsafe { memory::free_pool(info.cast()) } {
            warn!("Failed to release mode information: {status:?}");
        }

        Ok(mode)
    }

    fn set_mode(&mut self, index: u32) -> Result<(), Status> {
        let gop = self.raw_mut();
        let status = unsafe { ((*gop).set_mode)(gop, index) };
        if status.is_error() {
            return Err(status);
        }
        Ok(())
    }

    fn frame_buffer(&mut self) -> FrameBuffer {
        let mode = self.mode();
        FrameBuffer {
            base: mode.frame_buffer_base,
            size: mode.frame_buffer_size,
        }
    }
}
