//! # UEFI Handoff Loader
//!
//! UEFI application that walks the firmware-to-kernel handoff:
//!
//! ```text
//! UEFI Firmware
//!         ↓
//! ┌─────────────────────────────────────────────┐
//! │              UEFI Loader                    │
//! ├─────────────────────────────────────────────┤
//! │  1. Environment Setup                       │
//! │     • Logger (console + QEMU debugcon)      │
//! │     • Firmware and CPU mode report          │
//! │  2. Display                                 │
//! │     • List GOP modes, prompt for 0-9        │
//! │     • Switch mode, capture framebuffer      │
//! │  3. Kernel Image                            │
//! │     • Read \efi\boot\kernel.bin             │
//! │       into EfiLoaderCode pool memory        │
//! │  4. Ownership                               │
//! │     • Snapshot memory map                   │
//! │     • ExitBootServices, retry on stale key  │
//! │  5. Kernel Handoff                          │
//! │     • kernel(framebuffer, size), sysv64     │
//! └─────────────────────────────────────────────┘
//!         ↓
//! Kernel Execution
//! ```
//!
//! The sequencing lives in the `uefi-handoff` crate; this binary only
//! provides the firmware side of it.
//!
//! Failures before `ExitBootServices` are shown on screen for a few seconds
//! and the loader returns their status to the firmware. Failures after the
//! first exit attempt, and a kernel that returns, halt the CPU.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![no_main]
#![allow(unsafe_code)]
extern crate alloc;

mod cpu_modes;
mod debugcon;
mod file_system;
mod firmware;
mod gop;
mod logger;
mod memory;
mod uefi_mmap;

use crate::cpu_modes::CpuModes;
use crate::firmware::UefiFirmware;
use crate::logger::UefiLogger;
use log::{error, info};
use uefi::prelude::*;
use uefi_handoff::{BootConfig, HandoffSequencer};

#[entry]
fn efi_main() -> Status {
    if uefi::helpers::init().is_err() {
        return Status::UNSUPPORTED;
    }

    let config = BootConfig::DEFAULT;
    let Ok(logger) = UefiLogger::init(config.log_level) else {
        uefi::println!("Failed to install logger");
        return Status::ABORTED;
    };

    info!(
        "UEFI handoff loader on {} (firmware revision {:#x})",
        uefi::system::firmware_vendor(),
        uefi::system::firmware_revision()
    );
    unsafe { CpuModes::read() }.report();

    let firmware = UefiFirmware::new(logger);
    let mut sequencer = HandoffSequencer::new(&firmware, config);

    let Err(err) = sequencer.run();
    if !sequencer.firmware_usable() {
        error!("Boot services may be gone, halting in state {:?}", sequencer.state());
        halt()
    }
    err.into()
}

/// Parks the CPU for good.
fn halt() -> ! {
    loop {
        unsafe {
            core::arch::asm!("cli", "hlt", options(nomem, nostack));
        }
    }
}
