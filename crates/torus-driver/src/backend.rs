//! Backend abstraction for mesh access
//!
//! Provides a unified interface over the cycle-counting emulator and the
//! hardware link, so the matrix engine and harness never care which one
//! is underneath.

use crate::error::Result;
use std::fmt::Debug;
use std::time::Duration;
use torus_chip::isa::Kernel;
use torus_chip::topology::MeshTopology;

/// Unified interface to a mesh machine.
///
/// The call sequence for one program is always:
/// `load_kernel` → `start` → (`wait_signal` → staging I/O →
/// `clear_signal`)* until the kernel halts. The backend never runs
/// anything outside this protocol; all host synchronization happens at
/// `wait_signal`.
pub trait MeshBackend: Debug + Send {
    /// Mesh geometry of this machine.
    fn topology(&self) -> MeshTopology;

    /// True while the control unit is mid-kernel (including paused at a
    /// signal step). A freshly reset machine must report false; seeing
    /// true at session startup is fatal.
    ///
    /// # Errors
    ///
    /// Returns error if the machine state cannot be read.
    fn is_running(&mut self) -> Result<bool>;

    /// Write the full N×N staging block (row-major 16-bit words).
    ///
    /// # Errors
    ///
    /// Returns error if `words` does not match the topology, or the
    /// transfer fails.
    fn write_staging(&mut self, words: &[u16]) -> Result<()>;

    /// Read the full N×N staging block into `out`.
    ///
    /// # Errors
    ///
    /// Returns error if `out` does not match the topology, or the
    /// transfer fails.
    fn read_staging(&mut self, out: &mut [u16]) -> Result<()>;

    /// Load a materialized kernel. Per-PE memory grows to the kernel's
    /// slot count; the persistent fields keep their contents.
    ///
    /// # Errors
    ///
    /// Returns error if the machine is mid-kernel or the transfer fails.
    fn load_kernel(&mut self, kernel: &Kernel) -> Result<()>;

    /// Begin executing the loaded kernel.
    ///
    /// # Errors
    ///
    /// Returns error if no kernel is loaded or execution faults before
    /// the first signal.
    fn start(&mut self) -> Result<()>;

    /// Block until the completion flag is raised, at most `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::MeshError::Timeout`] if the flag is not raised in
    /// time — including the case where the kernel already halted and the
    /// flag can never come.
    fn wait_signal(&mut self, timeout: Duration) -> Result<()>;

    /// Clear the completion flag and let the machine resume.
    ///
    /// # Errors
    ///
    /// Returns error if no signal is pending or execution faults on
    /// resume.
    fn clear_signal(&mut self) -> Result<()>;

    /// Backend identifier for logs and reports.
    fn backend_type(&self) -> BackendType;

    /// Cycles taken by the last kernel, where the backend counts them
    /// (the emulator does; real silicon does not expose this).
    fn cycles_taken(&self) -> Option<u64>;
}

/// Backend type identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendType {
    /// Real silicon over the host link.
    Hardware,
    /// In-process cycle-counting emulator.
    Emulated,
}

impl std::fmt::Display for BackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Hardware => write!(f, "Hardware"),
            Self::Emulated => write!(f, "Emulated"),
        }
    }
}

/// Execution mode requested on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecMode {
    /// Drive real silicon.
    Real,
    /// Drive the emulator.
    Emulated,
}

/// Build the backend for the requested execution mode.
///
/// `Real` discovers the device at its default path and fails with
/// [`crate::MeshError::DeviceNotFound`] when no silicon is present.
///
/// # Errors
///
/// Returns error if the requested backend cannot be initialized.
pub fn select_backend(mode: ExecMode, topology: MeshTopology) -> Result<Box<dyn MeshBackend>> {
    use crate::backends::emulator::EmulatorBackend;
    use crate::backends::hardware::HardwareBackend;

    match mode {
        ExecMode::Real => {
            let backend = HardwareBackend::discover(topology)?;
            tracing::info!("Using hardware backend at {}", backend.path().display());
            Ok(Box::new(backend))
        }
        ExecMode::Emulated => {
            tracing::info!(
                rows = topology.rows,
                cols = topology.cols,
                "Using emulator backend"
            );
            Ok(Box::new(EmulatorBackend::new(topology)))
        }
    }
}
