//! # Boot Configuration
//!
//! Compile-time settings of the loader. Nothing here is read from disk or
//! NVRAM; the image path in particular is fixed.

use core::time::Duration;
use log::LevelFilter;

/// Location of the second-stage image on the boot volume.
pub const BOOT_IMAGE_PATH: &str = "\\efi\\boot\\kernel.bin";

/// How long the last status line stays on screen before the loader gives up.
pub const ERROR_PAUSE: Duration = Duration::from_secs(10);

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BootConfig {
    /// Path of the image to hand over to, relative to the boot volume root.
    pub image_path: &'static str,
    /// Pause after an abort; zero disables it.
    pub error_pause: Duration,
    /// Maximum level of the loader's log output.
    pub log_level: LevelFilter,
}

impl BootConfig {
    pub const DEFAULT: Self = Self {
        image_path: BOOT_IMAGE_PATH,
        error_pause: ERROR_PAUSE,
        log_level: LevelFilter::Info,
    };
}

impl Default for BootConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}
