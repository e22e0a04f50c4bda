//! # Keystroke Input
//!
//! Blocking keystroke reads that drive the interactive mode selection.
//! There is no timeout; a caller that needs one has to wrap the firmware.

use crate::diagnostics::Diagnostics;
use crate::error::HandoffError;
use log::debug;
use uefi::Status;

/// A single keystroke.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Key {
    /// A key producing a character.
    Printable(char),
    /// A key without a character, identified by its UEFI scan code.
    Special(u16),
}

/// The console input device.
pub trait KeyInput {
    /// Blocks until the key event is signaled.
    ///
    /// # Errors
    /// Returns the firmware status if the wait fails.
    fn wait_for_key(&self) -> Result<(), Status>;

    /// Reads the pending keystroke, if any.
    ///
    /// # Errors
    /// Returns the firmware status if the device reports an error.
    fn read_key(&self) -> Result<Option<Key>, Status>;
}

/// Blocks until a keystroke is available and returns it.
///
/// # Errors
/// [`HandoffError::EventWaitFailed`] or [`HandoffError::ReadFailed`]; neither is retried.
pub fn read_key<I>(input: &I, diagnostics: &Diagnostics<'_>) -> Result<Key, HandoffError>
where
    I: KeyInput + ?Sized,
{
    loop {
        input
            .wait_for_key()
            .map_err(|status| diagnostics.report("WaitForEvent", HandoffError::EventWaitFailed(status)))?;

        match input.read_key() {
            Ok(Some(key)) => return Ok(key),
            // Signaled, but the key was already consumed.
            Ok(None) => {}
            Err(status) => {
                return Err(diagnostics.report("ReadKeyStroke", HandoffError::ReadFailed(status)));
            }
        }
    }
}

/// Maps the digit keys `'0'`–`'9'` to the mode index of the same value.
///
/// The index is not checked against the device; that is the selector's job.
#[must_use]
pub fn mode_from_key(key: Key) -> Option<u32> {
    match key {
        Key::Printable(c) => c.to_digit(10),
        Key::Special(_) => None,
    }
}

/// Reads keystrokes until a digit selects a mode.
///
/// # Errors
/// Propagates failures of [`read_key`].
pub fn prompt_mode<I>(input: &I, diagnostics: &Diagnostics<'_>) -> Result<u32, HandoffError>
where
    I: KeyInput + ?Sized,
{
    loop {
        let key = read_key(input, diagnostics)?;
        match mode_from_key(key) {
            Some(index) => return Ok(index),
            None => debug!("Ignoring {key:?}; press 0-9 to pick a mode"),
        }
    }
}
