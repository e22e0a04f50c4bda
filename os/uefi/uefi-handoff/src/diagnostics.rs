//! # Diagnostics Reporter
//!
//! Every failure on the way to the kernel passes through here before it is
//! propagated. A report is a single `"<context>: <code>"` line on the `error`
//! log level, where `<code>` is the UEFI status number without the error bit
//! (`LoadImage: 14` for `EFI_NOT_FOUND`). When the handoff gives up it
//! stalls for a while so that line stays readable before the loader exits
//! or halts; the abort itself adds no second line.

use crate::error::HandoffError;
use core::fmt;
use core::time::Duration;
use log::{debug, error};
use uefi::Status;

/// A blocking, busy-waiting delay.
pub trait Stall {
    fn stall(&self, duration: Duration);
}

/// Formats and emits failure reports.
pub struct Diagnostics<'a> {
    stall: &'a dyn Stall,
    pause: Duration,
}

impl<'a> Diagnostics<'a> {
    /// Creates a reporter that pauses for `pause` on [`Diagnostics::pause`];
    /// [`Duration::ZERO`] disables the pause.
    #[must_use]
    pub const fn new(stall: &'a dyn Stall, pause: Duration) -> Self {
        Self { stall, pause }
    }

    /// Emits a status line for `error` and hands it back for propagation.
    pub fn report(&self, context: &str, error: HandoffError) -> HandoffError {
        error!("{}", StatusLine::new(context, error.status()));
        debug!("{context}: {error}");
        error
    }

    /// Holds the last report on screen for the configured pause.
    pub fn pause(&self) {
        if !self.pause.is_zero() {
            self.stall.stall(self.pause);
        }
    }
}

/// A `"<context>: <code>"` status line.
#[derive(Debug, Copy, Clone)]
pub struct StatusLine<'a> {
    context: &'a str,
    status: Status,
}

impl<'a> StatusLine<'a> {
    #[must_use]
    pub const fn new(context: &'a str, status: Status) -> Self {
        Self { context, status }
    }
}

impl fmt::Display for StatusLine<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.context, status_code(self.status))
    }
}

/// The status number as listed in the UEFI specification, i.e. without the error bit.
#[must_use]
pub const fn status_code(status: Status) -> usize {
    const ERROR_BIT: usize = 1 << (usize::BITS - 1);
    status.0 & !ERROR_BIT
}
