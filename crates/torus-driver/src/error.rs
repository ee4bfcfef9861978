//! Error types for mesh driver operations

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for mesh operations
pub type Result<T> = std::result::Result<T, MeshError>;

/// Errors that can occur while driving the mesh
#[derive(Debug, Error)]
pub enum MeshError {
    /// Device not found at the expected path
    #[error("Device not found: {path}")]
    DeviceNotFound {
        /// Path that was checked
        path: PathBuf,
    },

    /// Device or machine is in an invalid state
    #[error("Machine in invalid state: {state}")]
    InvalidState {
        /// Current state description
        state: String,
    },

    /// Host-side buffer does not match the mesh geometry
    #[error("Shape mismatch: expected {expected} words, got {actual}")]
    ShapeMismatch {
        /// Word count the topology requires
        expected: usize,
        /// Word count supplied by the caller
        actual: usize,
    },

    /// The per-PE scratch register was reserved while already held
    #[error("Scratch register already reserved")]
    ScratchInUse,

    /// The per-PE scratch register was used or released without a reservation
    #[error("Scratch register not reserved")]
    ScratchNotHeld,

    /// A mask layer was popped with no masked section open
    #[error("Mask pop with no masked section open")]
    MaskUnderflow,

    /// A kernel ended with masked sections still open
    #[error("Kernel ended with {depth} masked section(s) still open")]
    UnbalancedMask {
        /// Open mask layers at the halt step
        depth: usize,
    },

    /// A kernel step could not be executed
    #[error("Kernel fault at step {pc}: {reason}")]
    KernelFault {
        /// Step index that faulted
        pc: usize,
        /// Reason for failure
        reason: String,
    },

    /// Blocking wait on the completion signal expired
    #[error("Signal wait timeout after {duration_ms}ms")]
    Timeout {
        /// Timeout duration in milliseconds
        duration_ms: u64,
    },

    /// Data transfer over the host link failed
    #[error("Transfer failed: {reason}")]
    TransferFailed {
        /// Reason for failure
        reason: String,
    },

    /// I/O error during device communication
    #[error("I/O error: {source}")]
    Io {
        /// Underlying I/O error
        #[from]
        source: std::io::Error,
    },
}

impl MeshError {
    /// Create a device not found error
    pub fn device_not_found(path: impl Into<PathBuf>) -> Self {
        Self::DeviceNotFound { path: path.into() }
    }

    /// Create an invalid state error
    pub fn invalid_state(state: impl Into<String>) -> Self {
        Self::InvalidState {
            state: state.into(),
        }
    }

    /// Create a transfer failed error
    pub fn transfer_failed(reason: impl Into<String>) -> Self {
        Self::TransferFailed {
            reason: reason.into(),
        }
    }

    /// Create a kernel fault error
    pub fn kernel_fault(pc: usize, reason: impl Into<String>) -> Self {
        Self::KernelFault {
            pc,
            reason: reason.into(),
        }
    }
}
