// SPDX-License-Identifier: AGPL-3.0-only

//! Buffered programs and their translation to broadcast kernels.
//!
//! A [`Program`] is the harness-facing operation list: uploads,
//! computes, downloads and signal points, buffered in order and
//! materialized into a [`Kernel`] exactly once, when the whole sequence
//! is known. Nothing executes during buffering.
//!
//! The translation of [`MatrixOp::Multiply`] is the heart of the stack:
//! the systolic shift-accumulate product. Each PE first derives its own
//! mesh coordinates, the operands are then skewed into alignment with
//! per-row / per-column conditional rotations, and N synchronized
//! rotate-multiply-accumulate rounds leave every PE holding its element
//! of the true product. See Cypher and Sanz §5.6 for the textbook
//! treatment.

use crate::error::{MeshError, Result};
use crate::kernel::KernelBuilder;
use torus_chip::isa::{fields, Kernel, Slot};
use torus_chip::topology::{Dir, MeshTopology};
use tracing::debug;

/// One arithmetic operation on the persistent matrix.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MatrixOp {
    /// `A := c` for every element.
    ScalarSet(f32),
    /// `A := A + c`.
    ScalarAdd(f32),
    /// `A := A × c`.
    ScalarMul(f32),
    /// `A := c / A`, element-wise reciprocal scaling.
    ScalarRecip(f32),
    /// `A := B`.
    Assign,
    /// `A := A + B`, element-wise.
    Add,
    /// `A := A × B`, the systolic matrix product.
    Multiply,
}

impl std::fmt::Display for MatrixOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ScalarSet(c) => write!(f, "A := {c}"),
            Self::ScalarAdd(c) => write!(f, "A := A + {c}"),
            Self::ScalarMul(c) => write!(f, "A := A * {c}"),
            Self::ScalarRecip(c) => write!(f, "A := {c} / A"),
            Self::Assign => write!(f, "A := B"),
            Self::Add => write!(f, "A := A + B"),
            Self::Multiply => write!(f, "A := A * B"),
        }
    }
}

/// One buffered program operation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProgramOp {
    /// Scatter the staging block into the operand matrix `B`.
    UploadB,
    /// Run one matrix operation on the mesh.
    Compute(MatrixOp),
    /// Gather the persistent matrix `A` into the staging block.
    DownloadA,
    /// Raise the completion flag and pause for the host.
    Signal,
}

/// An ordered, buffered operation list.
///
/// Push operations in execution order, then hand the program to a
/// session; translation to broadcast steps happens once, for the whole
/// list, never per operation.
#[derive(Debug, Clone, Default)]
pub struct Program {
    ops: Vec<ProgramOp>,
}

impl Program {
    /// Empty program.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one operation.
    pub fn push(&mut self, op: ProgramOp) {
        self.ops.push(op);
    }

    /// Append an upload of the staging block into `B`.
    pub fn upload_b(&mut self) {
        self.push(ProgramOp::UploadB);
    }

    /// Append a matrix operation.
    pub fn compute(&mut self, op: MatrixOp) {
        self.push(ProgramOp::Compute(op));
    }

    /// Append a download of `A` into the staging block.
    pub fn download_a(&mut self) {
        self.push(ProgramOp::DownloadA);
    }

    /// Append a completion-signal pause.
    pub fn signal(&mut self) {
        self.push(ProgramOp::Signal);
    }

    /// The buffered operations in order.
    #[must_use]
    pub fn ops(&self) -> &[ProgramOp] {
        &self.ops
    }

    /// Number of signal pauses the host must service.
    #[must_use]
    pub fn signal_count(&self) -> usize {
        self.ops.iter().filter(|op| matches!(op, ProgramOp::Signal)).count()
    }

    /// Materialize the whole program into one broadcast kernel.
    ///
    /// # Errors
    ///
    /// Returns error if an operation is untranslatable for this mesh —
    /// in particular [`MatrixOp::Multiply`] on a non-square mesh.
    pub fn translate(&self, topo: MeshTopology) -> Result<Kernel> {
        let mut b = KernelBuilder::new(topo);
        for op in &self.ops {
            match op {
                ProgramOp::UploadB => b.scatter(fields::B),
                ProgramOp::Compute(op) => {
                    debug!(op = %op, "translating");
                    emit_compute(&mut b, *op)?;
                }
                ProgramOp::DownloadA => b.gather(fields::A)?,
                ProgramOp::Signal => b.signal(),
            }
        }
        b.halt();
        b.finish()
    }
}

fn emit_compute(b: &mut KernelBuilder, op: MatrixOp) -> Result<()> {
    match op {
        MatrixOp::ScalarSet(c) => {
            let k = b.constant(c);
            b.copy(fields::A, k);
        }
        MatrixOp::ScalarAdd(c) => {
            let k = b.constant(c);
            b.add(fields::A, fields::A, k);
        }
        MatrixOp::ScalarMul(c) => {
            let k = b.constant(c);
            b.mul(fields::A, fields::A, k);
        }
        MatrixOp::ScalarRecip(c) => {
            let k = b.constant(c);
            b.div(fields::A, k, fields::A);
        }
        MatrixOp::Assign => b.copy(fields::A, fields::B),
        MatrixOp::Add => b.add(fields::A, fields::A, fields::B),
        MatrixOp::Multiply => {
            let topo = b.topology();
            if topo.rows != topo.cols {
                return Err(MeshError::invalid_state(format!(
                    "matrix multiply needs a square mesh, have {}×{}",
                    topo.rows, topo.cols
                )));
            }
            let vars = MulVars::declare(b);
            emit_coordinates(b, &vars);
            emit_skew(b, &vars);
            emit_multiply_accumulate(b, &vars);
        }
    }
    Ok(())
}

/// Per-invocation scratch of one multiply: coordinate registers, the
/// working rotations of both operands, and the saved copy that restores
/// `B` at the end. All slots die with the kernel.
struct MulVars {
    row: Slot,
    col: Slot,
    a_work: Slot,
    b_work: Slot,
    b_saved: Slot,
}

impl MulVars {
    fn declare(b: &mut KernelBuilder) -> Self {
        let row = b.alloc();
        let col = b.alloc();
        b.imm(row, 0);
        b.imm(col, 0);

        // The rotation primitive works on scratch variables, not on the
        // named fields directly; A and B are staged through working
        // copies for the whole multiply.
        let a_work = b.alloc();
        let b_work = b.alloc();
        b.copy(a_work, fields::A);
        b.copy(b_work, fields::B);

        // B must come out of the multiply bit-identical.
        let b_saved = b.alloc();
        b.copy(b_saved, fields::B);

        Self { row, col, a_work, b_work, b_saved }
    }
}

/// Every PE computes its own (row, col).
///
/// Seed zero enters from outside the mesh: the non-wrapping northward
/// read gives the top row a zero, so after exactly N read-and-increment
/// rounds a PE in row r holds r+1. One increment too many is cheaper to
/// take back than to special-case the final round, so the loop runs the
/// full N and a single subtraction corrects it. The count must be
/// exactly N in both axes — anything else corrupts every mask that
/// follows. Columns are symmetric via the westward read.
fn emit_coordinates(b: &mut KernelBuilder, vars: &MulVars) {
    let n = b.topology().rows;
    for _ in 0..n {
        b.get_edge(vars.row, vars.row, Dir::North);
        b.add_int(vars.row, 1);
        b.get_edge(vars.col, vars.col, Dir::West);
        b.add_int(vars.col, 1);
    }
    b.add_int(vars.row, -1);
    b.add_int(vars.col, -1);
}

/// Cannon-style operand skew.
///
/// Round i rotates the whole working copy of A one step east and of B
/// one step south, then commits the rotated value back into the field
/// only where the PE's row (for A) or column (for B) index exceeds i.
/// Row r therefore takes its last commit at i = r-1, after exactly r
/// rotations: PE(r,c) ends up holding A[r][(c+r) mod N], and by the
/// symmetric argument B[(r+c) mod N][c].
#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
fn emit_skew(b: &mut KernelBuilder, vars: &MulVars) {
    let n = b.topology().rows;
    for i in 0..n {
        b.rotate(vars.a_work, Dir::East);
        b.masked_gt(vars.row, i as i16, |b| b.copy(fields::A, vars.a_work));

        b.rotate(vars.b_work, Dir::South);
        b.masked_gt(vars.col, i as i16, |b| b.copy(fields::B, vars.b_work));
    }
}

/// Rotate–multiply–accumulate, then restore and commit.
///
/// Exactly N rounds of `acc += a·b` with an eastward A rotation and a
/// southward B rotation after each term. The skew lined the operands up
/// so that in round k PE(r,c) multiplies A[r][(r+c+k) mod N] by
/// B[(r+c+k) mod N][c] — the k-th term of the true dot product. The
/// saved operand then overwrites B, and the accumulator becomes the new
/// A.
fn emit_multiply_accumulate(b: &mut KernelBuilder, vars: &MulVars) {
    let n = b.topology().rows;

    // Reload the working copies from the skewed fields.
    b.copy(vars.a_work, fields::A);
    b.copy(vars.b_work, fields::B);

    let acc = b.alloc();
    let prod = b.alloc();
    b.imm(acc, torus_chip::approx::Approx::ZERO.to_bits());

    for _ in 0..n {
        b.mul(prod, vars.a_work, vars.b_work);
        b.add(acc, acc, prod);
        b.rotate(vars.a_work, Dir::East);
        b.rotate(vars.b_work, Dir::South);
    }

    b.copy(fields::B, vars.b_saved);
    b.copy(fields::A, acc);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MeshBackend;
    use crate::backends::emulator::EmulatorBackend;
    use crate::host::HostMatrix;
    use std::time::Duration;
    use torus_chip::isa::Step;

    const TICK: Duration = Duration::from_millis(100);

    #[test]
    fn translate_materializes_the_whole_sequence_at_once() {
        let mut p = Program::new();
        p.upload_b();
        p.compute(MatrixOp::Assign);
        p.download_a();
        p.signal();
        let kernel = p.translate(MeshTopology::square(4)).unwrap();

        assert_eq!(kernel.steps().last(), Some(&Step::Halt));
        assert!(kernel.steps().contains(&Step::Scatter { field: fields::B }));
        assert!(kernel.steps().contains(&Step::Signal));
        assert_eq!(p.signal_count(), 1);
    }

    #[test]
    fn multiply_rejects_non_square_mesh() {
        let mut p = Program::new();
        p.compute(MatrixOp::Multiply);
        let err = p.translate(MeshTopology::new(2, 3)).unwrap_err();
        assert!(matches!(err, MeshError::InvalidState { .. }));
    }

    /// Drive a hand-built kernel far enough to collect one staging block
    /// per pending signal.
    fn collect_signalled_blocks(
        machine: &mut EmulatorBackend,
        kernel: &torus_chip::isa::Kernel,
        blocks: usize,
    ) -> Vec<Vec<u16>> {
        machine.load_kernel(kernel).unwrap();
        machine.start().unwrap();
        let cells = machine.topology().cells();
        let mut out = Vec::new();
        for _ in 0..blocks {
            machine.wait_signal(TICK).unwrap();
            let mut words = vec![0u16; cells];
            machine.read_staging(&mut words).unwrap();
            out.push(words);
            machine.clear_signal().unwrap();
        }
        out
    }

    #[test]
    fn every_pe_derives_its_own_coordinates() {
        let n = 4;
        let topo = MeshTopology::square(n);
        let mut b = KernelBuilder::new(topo);
        let vars = MulVars::declare(&mut b);
        emit_coordinates(&mut b, &vars);
        b.gather(vars.row).unwrap();
        b.signal();
        b.gather(vars.col).unwrap();
        b.signal();
        b.halt();
        let kernel = b.finish().unwrap();

        let mut machine = EmulatorBackend::new(topo);
        let blocks = collect_signalled_blocks(&mut machine, &kernel, 2);
        for r in 0..n {
            for c in 0..n {
                let i = topo.index(r, c);
                assert_eq!(blocks[0][i] as usize, r, "row index at ({r},{c})");
                assert_eq!(blocks[1][i] as usize, c, "col index at ({r},{c})");
            }
        }
    }

    #[test]
    fn skew_aligns_both_operands() {
        let n = 4;
        let topo = MeshTopology::square(n);
        let mut b = KernelBuilder::new(topo);
        b.scatter(fields::A);
        b.signal(); // host swaps the staging block from A to B
        b.scatter(fields::B);
        let vars = MulVars::declare(&mut b);
        emit_coordinates(&mut b, &vars);
        emit_skew(&mut b, &vars);
        b.gather(fields::A).unwrap();
        b.signal();
        b.gather(fields::B).unwrap();
        b.signal();
        b.halt();
        let kernel = b.finish().unwrap();

        let a = HostMatrix::from_fn(n, |r, c| (10 * r + c) as f32);
        let bm = HostMatrix::from_fn(n, |r, c| (100 + 10 * r + c) as f32);

        let mut machine = EmulatorBackend::new(topo);
        machine.write_staging(&a.encode()).unwrap();
        machine.load_kernel(&kernel).unwrap();
        machine.start().unwrap();

        machine.wait_signal(TICK).unwrap();
        machine.write_staging(&bm.encode()).unwrap();
        machine.clear_signal().unwrap();

        let mut collected = Vec::new();
        for _ in 0..2 {
            machine.wait_signal(TICK).unwrap();
            let mut words = vec![0u16; topo.cells()];
            machine.read_staging(&mut words).unwrap();
            collected.push(HostMatrix::decode(n, &words).unwrap());
            machine.clear_signal().unwrap();
        }

        for r in 0..n {
            for c in 0..n {
                assert_eq!(
                    collected[0].get(r, c),
                    a.get(r, (c + r) % n),
                    "skewed A at ({r},{c})"
                );
                assert_eq!(
                    collected[1].get(r, c),
                    bm.get((r + c) % n, c),
                    "skewed B at ({r},{c})"
                );
            }
        }
    }

    #[test]
    fn coordinate_round_count_must_be_exact() {
        // One round short leaves the far rows miscounted; this pins the
        // derivation loop at exactly N rounds.
        let n = 3;
        let topo = MeshTopology::square(n);
        let mut b = KernelBuilder::new(topo);
        let vars = MulVars::declare(&mut b);
        for _ in 0..n - 1 {
            b.get_edge(vars.row, vars.row, Dir::North);
            b.add_int(vars.row, 1);
        }
        b.add_int(vars.row, -1);
        b.gather(vars.row).unwrap();
        b.signal();
        b.halt();
        let kernel = b.finish().unwrap();

        let mut machine = EmulatorBackend::new(topo);
        let blocks = collect_signalled_blocks(&mut machine, &kernel, 1);
        // Bottom row would need the full N rounds to reach its index.
        let i = topo.index(n - 1, 0);
        assert_ne!(blocks[0][i] as usize, n - 1);
    }
}
