//! # UEFI Boot-to-Kernel Handoff
//!
//! Firmware-agnostic core of the UEFI loader: everything that decides *what*
//! happens between `efi_main` and the jump into the loaded image, expressed
//! against small capability traits instead of the global firmware tables.
//!
//! ## Handoff Sequence
//!
//! ```text
//! Init
//!   │  locate display, list modes, read a digit, set mode
//!   ▼
//! DisplayConfigured
//!   │  open \efi\boot\kernel.bin, read it into loader-code pool memory
//!   ▼
//! ImageLoaded
//!   │  probe / allocate / query the memory map  ◄──────┐
//!   ▼                                                  │
//! SnapshotTaken                                        │ stale map key
//!   │  ExitBootServices(map key) ──────────────────────┘
//!   ▼
//! OwnershipTransferred
//!   │  entry(framebuffer base, framebuffer size)
//!   ▼
//! ControlTransferred
//! ```
//!
//! Any step except the last may end in `Aborted`, in which case every pool
//! buffer acquired so far is handed back to the firmware before the status
//! code travels up to `efi_main`.
//!
//! ## Map Key Invariant
//!
//! A map key is only valid if no allocation or deallocation happened between
//! the `GetMemoryMap` call that produced it and the `ExitBootServices` call
//! that consumes it. The sequencer therefore loads the image and configures
//! the display first, closes every protocol handle, and performs neither
//! logging nor allocation between a successful snapshot and the transfer.
//!
//! ## Collaborators
//!
//! | Trait | Capability |
//! |-------|------------|
//! | [`CapabilityRegistry`](firmware::CapabilityRegistry) | Protocol discovery (display device, file volume) |
//! | [`PoolAllocator`](pool::PoolAllocator) | `AllocatePool` / `FreePool` |
//! | [`MemoryMapSource`](memory_map::MemoryMapSource) | `GetMemoryMap` |
//! | [`OwnershipGate`](ownership::OwnershipGate) | `ExitBootServices` |
//! | [`KeyInput`](input::KeyInput) | `WaitForKey` + `ReadKeyStroke` |
//! | [`Stall`](diagnostics::Stall) | Busy-wait delay |
//! | [`ImageEntry`](entry::ImageEntry) | The final jump |
//!
//! The UEFI application implements all of them on one context object; the
//! integration tests implement them on a scripted mock firmware.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod config;
pub mod diagnostics;
pub mod display;
pub mod entry;
pub mod error;
pub mod firmware;
pub mod image;
pub mod input;
pub mod memory_map;
pub mod ownership;
pub mod pool;
pub mod sequencer;

pub use config::BootConfig;
pub use error::HandoffError;
pub use firmware::Firmware;
pub use sequencer::{HandoffSequencer, HandoffState};
