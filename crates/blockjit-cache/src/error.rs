use blockjit_il::{GuestAddr, MemFault, SlotId, SlotKind};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, JitError>;

/// Cache or compiler misuse. None of these are guest-triggerable; the driver is expected to halt
/// emulation when it sees one.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum IntegrityError {
    #[error("entry ceiling exceeded inserting {addr:#010x} (max {max} entries per generation)")]
    EntryCeiling { addr: GuestAddr, max: usize },

    #[error("{inst_count}-instruction block does not jump out")]
    MissingExit { inst_count: usize },

    #[error("slot {slot} accessed as {expected:?} but declared {declared:?}")]
    SlotKind {
        slot: SlotId,
        expected: SlotKind,
        declared: SlotKind,
    },

    #[error("slot {slot} out of range ({slot_count} slots)")]
    SlotOutOfRange { slot: SlotId, slot_count: usize },

    #[error("block at {addr:#010x} is already compiled")]
    AlreadyCompiled { addr: GuestAddr },

    #[error("block at {addr:#010x} executed before it was compiled")]
    NotCompiled { addr: GuestAddr },

    #[error("block at {addr:#010x} re-entered while executing")]
    BlockBusy { addr: GuestAddr },

    #[error("allocation failed: {0}")]
    AllocFailed(&'static str),
}

/// Why a block stopped without producing a jump target.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ExecError {
    #[error(transparent)]
    Integrity(#[from] IntegrityError),

    #[error(transparent)]
    Fault(#[from] MemFault),
}

/// Top-level error seen by the emulation driver.
#[derive(Debug, Error)]
pub enum JitError {
    #[error("integrity violation: {0}")]
    Integrity(#[from] IntegrityError),

    #[error("guest fault in block {entry:#010x}: {fault}")]
    Fault { entry: GuestAddr, fault: MemFault },

    #[error("failed to translate block at {addr:#010x}: {reason}")]
    Translate { addr: GuestAddr, reason: String },
}

impl JitError {
    pub fn from_exec(entry: GuestAddr, err: ExecError) -> Self {
        match err {
            ExecError::Integrity(err) => Self::Integrity(err),
            ExecError::Fault(fault) => Self::Fault { entry, fault },
        }
    }

    /// `true` for errors that must stop emulation.
    pub fn is_integrity(&self) -> bool {
        matches!(self, Self::Integrity(_))
    }
}
