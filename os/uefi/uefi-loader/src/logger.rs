use crate::debugcon;
use core::sync::atomic::{AtomicBool, Ordering};
use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};

/// Logs to the QEMU debug console and, while boot services are usable, to the UEFI console.
pub struct UefiLogger {
    console: AtomicBool,
}

static LOGGER: UefiLogger = UefiLogger {
    console: AtomicBool::new(true),
};

impl UefiLogger {
    /// Installs the logger; call once during early init.
    ///
    /// # Errors
    /// Fails if another logger was installed before.
    pub fn init(max_level: LevelFilter) -> Result<&'static Self, SetLoggerError> {
        log::set_logger(&LOGGER)?;
        log::set_max_level(max_level);
        Ok(&LOGGER)
    }

    /// Stops mirroring to the UEFI console.
    ///
    /// Must be called before the first `ExitBootServices` attempt; from then on
    /// only memory allocation services may be used, even if the attempt fails.
    pub fn exit_boot_services(&self) {
        self.console.store(false, Ordering::Release);
    }
}

impl Log for UefiLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        debugcon!(
            "[{}] {}: {}\n",
            record.level(),
            record.target(),
            record.args()
        );

        if self.console.load(Ordering::Acquire) {
            uefi::println!("[{}] {}", record.level(), record.args());
        }
    }

    fn flush(&self) {}
}
