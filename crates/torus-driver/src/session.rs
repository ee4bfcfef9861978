//! Mesh session
//!
//! The host-side harness object. A session owns one backend, and with it
//! the machine's persistent state: the matrix `A` created when the
//! machine came up lives exactly as long as the session's backend does.
//!
//! The driving protocol is strictly blocking and single-threaded: load a
//! buffered program (translated to a kernel in one shot), start it, then
//! alternate `wait_signal` / staging I/O / `clear_signal` at each signal
//! point the program declared. The wait is the host's only suspension
//! point and carries an explicit timeout, so a stalled or already-halted
//! machine reports instead of hanging.

use crate::backend::{BackendType, MeshBackend};
use crate::error::{MeshError, Result};
use crate::host::HostMatrix;
use crate::program::Program;
use std::time::Duration;
use tracing::{debug, info};

/// Default bound on one completion-signal wait.
pub const DEFAULT_SIGNAL_TIMEOUT: Duration = Duration::from_secs(5);

/// Host-side handle on one mesh machine.
#[derive(Debug)]
pub struct MeshSession {
    backend: Box<dyn MeshBackend>,
    timeout: Duration,
}

impl MeshSession {
    /// Take ownership of a backend after verifying it is safe to drive.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::InvalidState`] if the machine is already
    /// mid-kernel — a reset is supposed to make that impossible, so a
    /// running machine at startup is fatal — or if the mesh is not
    /// square (the matrix engine requires mesh dimensions equal to the
    /// matrix dimensions).
    pub fn new(mut backend: Box<dyn MeshBackend>) -> Result<Self> {
        let topo = backend.topology();
        if topo.rows != topo.cols {
            return Err(MeshError::invalid_state(format!(
                "matrix session requires a square mesh, have {}×{}",
                topo.rows, topo.cols
            )));
        }
        if backend.is_running()? {
            return Err(MeshError::invalid_state(
                "machine still running at session startup",
            ));
        }
        info!(
            backend = %backend.backend_type(),
            n = topo.rows,
            "mesh session opened"
        );
        Ok(Self { backend, timeout: DEFAULT_SIGNAL_TIMEOUT })
    }

    /// Replace the signal-wait timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Matrix side length N (= mesh rows = mesh columns).
    #[must_use]
    pub fn n(&self) -> usize {
        self.backend.topology().rows
    }

    /// Backend driving this session.
    #[must_use]
    pub fn backend_type(&self) -> BackendType {
        self.backend.backend_type()
    }

    /// Cycles the last kernel took, when the backend counts them.
    #[must_use]
    pub fn cycles_taken(&self) -> Option<u64> {
        self.backend.cycles_taken()
    }

    /// Translate a buffered program — once, as a whole — and load the
    /// resulting kernel.
    ///
    /// # Errors
    ///
    /// Returns error if translation fails or the machine rejects the
    /// load.
    pub fn load(&mut self, program: &Program) -> Result<()> {
        let kernel = program.translate(self.backend.topology())?;
        debug!(
            ops = program.ops().len(),
            steps = kernel.len(),
            signals = program.signal_count(),
            "program materialized"
        );
        self.backend.load_kernel(&kernel)
    }

    /// Start the loaded kernel.
    ///
    /// # Errors
    ///
    /// Returns error if no kernel is loaded or execution faults.
    pub fn start(&mut self) -> Result<()> {
        self.backend.start()
    }

    /// Block until the machine raises the completion flag.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::Timeout`] when the flag is not raised within
    /// the session timeout.
    pub fn wait_signal(&mut self) -> Result<()> {
        self.backend.wait_signal(self.timeout)
    }

    /// Clear the completion flag so the machine resumes.
    ///
    /// # Errors
    ///
    /// Returns error if no signal is pending or execution faults on
    /// resume.
    pub fn clear_signal(&mut self) -> Result<()> {
        self.backend.clear_signal()
    }

    /// Encode a host matrix into the staging block.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::ShapeMismatch`] if the matrix does not match
    /// the mesh.
    pub fn write_matrix(&mut self, matrix: &HostMatrix) -> Result<()> {
        if matrix.n() != self.n() {
            return Err(MeshError::ShapeMismatch {
                expected: self.backend.topology().cells(),
                actual: matrix.n() * matrix.n(),
            });
        }
        self.backend.write_staging(&matrix.encode())
    }

    /// Decode the staging block into a host matrix.
    ///
    /// # Errors
    ///
    /// Returns error if the staging transfer fails.
    pub fn read_matrix(&mut self) -> Result<HostMatrix> {
        let n = self.n();
        let mut words = vec![0u16; self.backend.topology().cells()];
        self.backend.read_staging(&mut words)?;
        HostMatrix::decode(n, &words)
    }
}
