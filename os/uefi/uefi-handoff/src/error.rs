//! # Handoff Errors

use uefi::Status;

/// Every way the handoff can fail.
///
/// Variants that originate from a firmware call carry the firmware's [`Status`];
/// the others map to a fixed status in [`HandoffError::status`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandoffError {
    #[error("no usable display device was found ({0:?})")]
    DeviceNotFound(Status),
    #[error("display mode {index} is outside of the supported range 0..{max_mode}")]
    InvalidMode { index: u32, max_mode: u32 },
    #[error("the display device refused to switch to mode {index} ({status:?})")]
    ModeSwitchFailed { index: u32, status: Status },
    #[error("waiting for a keystroke failed ({0:?})")]
    EventWaitFailed(Status),
    #[error("reading a keystroke failed ({0:?})")]
    ReadFailed(Status),
    #[error("the boot image does not exist")]
    NotFound,
    #[error("the boot image could not be opened ({0:?})")]
    OpenFailed(Status),
    #[error("read {read} bytes of the boot image, expected {expected} bytes")]
    TruncatedRead { read: usize, expected: usize },
    #[error("pool allocation of {size} bytes failed ({status:?})")]
    AllocationFailed { size: usize, status: Status },
    #[error("the memory map could not be queried ({0:?})")]
    MapQueryFailed(Status),
    #[error("the memory map key is no longer current")]
    StaleMapKey,
    #[error("the firmware refused to relinquish the machine ({0:?})")]
    OwnershipTransferFailed(Status),
    #[error("the boot image entry point returned")]
    EntryInvariantViolated,
}

impl HandoffError {
    /// The numeric status reported for this error and returned to the firmware.
    #[must_use]
    pub const fn status(self) -> Status {
        match self {
            Self::DeviceNotFound(status)
            | Self::ModeSwitchFailed { status, .. }
            | Self::EventWaitFailed(status)
            | Self::ReadFailed(status)
            | Self::OpenFailed(status)
            | Self::AllocationFailed { status, .. }
            | Self::MapQueryFailed(status)
            | Self::OwnershipTransferFailed(status) => status,
            Self::InvalidMode { .. } => Status::UNSUPPORTED,
            Self::NotFound => Status::NOT_FOUND,
            Self::TruncatedRead { .. } => Status::BAD_BUFFER_SIZE,
            Self::StaleMapKey => Status::INVALID_PARAMETER,
            Self::EntryInvariantViolated => Status::ABORTED,
        }
    }

    /// Only a stale map key is recovered locally (by re-snapshotting).
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::StaleMapKey)
    }
}

impl From<HandoffError> for Status {
    fn from(value: HandoffError) -> Self {
        value.status()
    }
}
