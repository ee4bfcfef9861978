//! Driver and matrix engine for the torus-mesh SIMD accelerator.
//!
//! The machine is one control unit broadcasting instructions to an N×N
//! torus of processing elements, each holding one 16-bit word per named
//! matrix. This crate programs it: host buffers, the kernel builder, the
//! systolic multiply, the blocking signal harness, and the result
//! verifier — over either of two backends.
//!
//! # Backend hierarchy
//!
//! ```text
//! Hardware:
//!   HardwareBackend — framed transactions over the card's device file
//!
//! Development / CI:
//!   EmulatorBackend — in-process interpreter, cycle-counted, bit-faithful
//! ```
//!
//! # Quick start
//!
//! ```no_run
//! use torus_driver::prelude::*;
//! use torus_chip::topology::MeshTopology;
//!
//! # fn main() -> torus_driver::Result<()> {
//! let backend = select_backend(ExecMode::Emulated, MeshTopology::square(8))?;
//! let mut session = MeshSession::new(backend)?;
//!
//! let mut program = Program::new();
//! program.upload_b();
//! program.compute(MatrixOp::Assign);
//! program.compute(MatrixOp::Multiply); // A := B · B
//! program.download_a();
//! program.signal();
//!
//! session.load(&program)?;
//! session.write_matrix(&HostMatrix::from_fn(8, |r, c| (r + c) as f32))?;
//! session.start()?;
//! session.wait_signal()?;
//! let result = session.read_matrix()?;
//! session.clear_signal()?;
//! # let _ = result;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::doc_markdown)]

mod backend;
pub mod backends;
mod error;
mod host;
mod kernel;
mod program;
mod session;
mod verify;

pub use backend::{select_backend, BackendType, ExecMode, MeshBackend};
pub use backends::emulator::EmulatorBackend;
pub use backends::hardware::HardwareBackend;
pub use error::{MeshError, Result};
pub use host::HostMatrix;
pub use kernel::{KernelBuilder, ScratchGuard};
pub use program::{MatrixOp, Program, ProgramOp};
pub use session::{MeshSession, DEFAULT_SIGNAL_TIMEOUT};
pub use verify::{
    check_matrix, reference_product, CheckReport, Mismatch, REL_TOLERANCE, ZERO_TOLERANCE,
};

/// Commonly used types.
pub mod prelude {
    pub use crate::{
        check_matrix, reference_product, select_backend, CheckReport, ExecMode, HostMatrix,
        MatrixOp, MeshError, MeshSession, Program, ProgramOp, Result,
    };
}
