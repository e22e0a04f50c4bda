//! # Ownership Transfer
//!
//! Exiting boot services hands the machine to the loader. The firmware only
//! agrees if the supplied map key still describes the current memory map.

use crate::diagnostics::Diagnostics;
use crate::error::HandoffError;
use crate::memory_map::{MapKey, MemoryMapSnapshot};
use uefi::Status;

/// Why the firmware refused to exit boot services.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TransferRejection {
    /// The memory map changed since the key was issued.
    StaleMapKey,
    Failed(Status),
}

/// The firmware's `ExitBootServices` gate.
pub trait OwnershipGate {
    /// Exits boot services if `key` is current.
    ///
    /// # Errors
    /// [`TransferRejection::StaleMapKey`] if the key is outdated.
    fn exit_boot_services(&self, key: MapKey) -> Result<(), TransferRejection>;
}

/// Attempts to take over the machine with the key of `snapshot`.
///
/// # Errors
/// * [`HandoffError::StaleMapKey`] if the snapshot is outdated; re-snapshot and retry.
/// * [`HandoffError::OwnershipTransferFailed`] for any other rejection.
pub fn transfer<G>(
    gate: &G,
    snapshot: &MemoryMapSnapshot<'_>,
    diagnostics: &Diagnostics<'_>,
) -> Result<(), HandoffError>
where
    G: OwnershipGate + ?Sized,
{
    match gate.exit_boot_services(snapshot.key()) {
        Ok(()) => Ok(()),
        Err(TransferRejection::StaleMapKey) => Err(HandoffError::StaleMapKey),
        Err(TransferRejection::Failed(status)) => Err(diagnostics.report(
            "ExitBootServices",
            HandoffError::OwnershipTransferFailed(status),
        )),
    }
}
