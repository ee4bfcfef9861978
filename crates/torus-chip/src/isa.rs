//! Broadcast instruction set and kernel container.
//!
//! A kernel is the fully materialized form of a buffered program: a flat
//! list of [`Step`]s the control unit issues in order, each broadcast to
//! every PE simultaneously. There is no per-PE control flow — divergence
//! exists only as the predicate mask gating writes.
//!
//! Two address spaces appear in the steps:
//!
//! - **per-PE memory slots** ([`Slot`]): 16-bit words, one bank per PE.
//!   The named matrices live at fixed slots ([`fields`]); everything else
//!   is scratch allocated at translation time.
//! - **staging memory**: one N×N block of words in the control unit,
//!   written and read by the host, moved to/from a per-PE field by
//!   [`Step::Scatter`] and [`Step::Gather`].
//!
//! The binary encoding is a fixed-width little-endian record per step,
//! carried over the host link when loading a kernel into real silicon.

use crate::topology::Dir;

/// Per-PE memory address of one 16-bit word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot(pub u16);

/// Fixed slot assignments for the named mesh matrices.
///
/// `A` persists across kernels — it is created when the machine comes up
/// and survives until teardown. `B` is the transient operand refreshed by
/// the host before each operation that consumes it.
pub mod fields {
    use super::Slot;

    /// The persistent matrix (input and output accumulator).
    pub const A: Slot = Slot(0);
    /// The transient operand matrix.
    pub const B: Slot = Slot(1);
    /// First slot available for translation-time scratch variables.
    pub const FIRST_FREE: u16 = 2;
}

/// Cycles charged per word read during a gather, covering address settle
/// time on the PE column bus before the value is latched.
pub const GATHER_PROP_DELAY: u64 = 4;

/// One broadcast instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Copy the staging block into a per-PE field, rows outer / columns
    /// inner, visiting every PE exactly once. Ignores the mask.
    Scatter {
        /// Destination field.
        field: Slot,
    },
    /// Reserve the per-PE scratch register for a gather sequence.
    ReserveScratch,
    /// Latch a per-PE field into the reserved scratch register.
    LoadScratch {
        /// Source field.
        field: Slot,
    },
    /// Copy the scratch register of every PE into the staging block,
    /// rows outer / columns inner. Ignores the mask; charges
    /// [`GATHER_PROP_DELAY`] cycles per word.
    Gather,
    /// Release the scratch register.
    ReleaseScratch,
    /// Raise the completion flag and pause until the host clears it.
    Signal,
    /// End of kernel.
    Halt,
    /// Broadcast a 16-bit literal into a slot.
    Imm {
        /// Destination slot.
        dst: Slot,
        /// Raw word to store.
        bits: u16,
    },
    /// Per-PE copy between slots.
    Copy {
        /// Destination slot.
        dst: Slot,
        /// Source slot.
        src: Slot,
    },
    /// Read the neighbor's `src` into `dst`, without wraparound: a PE on
    /// the mesh boundary reads zero.
    GetEdge {
        /// Destination slot.
        dst: Slot,
        /// Slot read from the neighbor.
        src: Slot,
        /// Neighbor direction.
        dir: Dir,
    },
    /// Read the torus neighbor's `src` into `dst`. With `dst == src` this
    /// is an exact whole-field rotation by one step.
    GetTorus {
        /// Destination slot.
        dst: Slot,
        /// Slot read from the neighbor.
        src: Slot,
        /// Neighbor direction.
        dir: Dir,
    },
    /// Integer add-immediate on a slot (16-bit two's complement).
    AddIntImm {
        /// Slot updated in place.
        dst: Slot,
        /// Immediate addend.
        imm: i16,
    },
    /// Push a mask layer enabling only PEs where the integer in `slot`
    /// is greater than `imm`.
    MaskGtInt {
        /// Slot holding the per-PE integer.
        slot: Slot,
        /// Comparison immediate.
        imm: i16,
    },
    /// Pop the innermost mask layer, restoring the enclosing state.
    Unmask,
    /// Reduced-precision sum: `dst = a + b`.
    Add {
        /// Destination slot.
        dst: Slot,
        /// Left operand slot.
        a: Slot,
        /// Right operand slot.
        b: Slot,
    },
    /// Reduced-precision product: `dst = a * b`.
    Mul {
        /// Destination slot.
        dst: Slot,
        /// Left operand slot.
        a: Slot,
        /// Right operand slot.
        b: Slot,
    },
    /// Reduced-precision quotient: `dst = a / b`.
    Div {
        /// Destination slot.
        dst: Slot,
        /// Numerator slot.
        a: Slot,
        /// Denominator slot.
        b: Slot,
    },
}

/// Magic bytes at the start of an encoded kernel.
pub const KERNEL_MAGIC: &[u8; 4] = b"TMK1";

/// Bytes per encoded step record.
pub const STEP_RECORD_BYTES: usize = 8;

/// A materialized kernel: the step list plus the per-PE memory size it
/// requires.
#[derive(Debug, Clone)]
pub struct Kernel {
    slots: u16,
    steps: Vec<Step>,
}

impl Kernel {
    /// Assemble a kernel from its parts.
    #[must_use]
    pub fn new(slots: u16, steps: Vec<Step>) -> Self {
        Self { slots, steps }
    }

    /// Per-PE memory words this kernel addresses.
    #[must_use]
    pub const fn slots(&self) -> u16 {
        self.slots
    }

    /// The broadcast step list, in issue order.
    #[must_use]
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Step count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// True if the kernel has no steps.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Serialize to the host-link wire format.
    ///
    /// Layout: magic, `slots` (u16 LE), step count (u32 LE), then one
    /// [`STEP_RECORD_BYTES`]-byte record per step:
    /// `[opcode, dir, w0 LE, w1 LE, w2 LE]`.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out =
            Vec::with_capacity(KERNEL_MAGIC.len() + 6 + self.steps.len() * STEP_RECORD_BYTES);
        out.extend_from_slice(KERNEL_MAGIC);
        out.extend_from_slice(&self.slots.to_le_bytes());
        out.extend_from_slice(&u32::try_from(self.steps.len()).unwrap_or(u32::MAX).to_le_bytes());
        for step in &self.steps {
            let (op, dir, w0, w1, w2) = encode_step(*step);
            out.push(op);
            out.push(dir);
            out.extend_from_slice(&w0.to_le_bytes());
            out.extend_from_slice(&w1.to_le_bytes());
            out.extend_from_slice(&w2.to_le_bytes());
        }
        out
    }
}

/// Wire opcodes.
mod opcode {
    pub const SCATTER: u8 = 0x01;
    pub const RESERVE_SCRATCH: u8 = 0x02;
    pub const LOAD_SCRATCH: u8 = 0x03;
    pub const GATHER: u8 = 0x04;
    pub const RELEASE_SCRATCH: u8 = 0x05;
    pub const SIGNAL: u8 = 0x06;
    pub const HALT: u8 = 0x07;
    pub const IMM: u8 = 0x10;
    pub const COPY: u8 = 0x11;
    pub const GET_EDGE: u8 = 0x12;
    pub const GET_TORUS: u8 = 0x13;
    pub const ADD_INT_IMM: u8 = 0x14;
    pub const MASK_GT_INT: u8 = 0x15;
    pub const UNMASK: u8 = 0x16;
    pub const ADD: u8 = 0x20;
    pub const MUL: u8 = 0x21;
    pub const DIV: u8 = 0x22;
}

const fn dir_code(dir: Dir) -> u8 {
    match dir {
        Dir::North => 0,
        Dir::South => 1,
        Dir::East => 2,
        Dir::West => 3,
    }
}

#[allow(clippy::cast_sign_loss)]
fn encode_step(step: Step) -> (u8, u8, u16, u16, u16) {
    match step {
        Step::Scatter { field } => (opcode::SCATTER, 0, field.0, 0, 0),
        Step::ReserveScratch => (opcode::RESERVE_SCRATCH, 0, 0, 0, 0),
        Step::LoadScratch { field } => (opcode::LOAD_SCRATCH, 0, field.0, 0, 0),
        Step::Gather => (opcode::GATHER, 0, 0, 0, 0),
        Step::ReleaseScratch => (opcode::RELEASE_SCRATCH, 0, 0, 0, 0),
        Step::Signal => (opcode::SIGNAL, 0, 0, 0, 0),
        Step::Halt => (opcode::HALT, 0, 0, 0, 0),
        Step::Imm { dst, bits } => (opcode::IMM, 0, dst.0, bits, 0),
        Step::Copy { dst, src } => (opcode::COPY, 0, dst.0, src.0, 0),
        Step::GetEdge { dst, src, dir } => (opcode::GET_EDGE, dir_code(dir), dst.0, src.0, 0),
        Step::GetTorus { dst, src, dir } => (opcode::GET_TORUS, dir_code(dir), dst.0, src.0, 0),
        Step::AddIntImm { dst, imm } => (opcode::ADD_INT_IMM, 0, dst.0, imm as u16, 0),
        Step::MaskGtInt { slot, imm } => (opcode::MASK_GT_INT, 0, slot.0, imm as u16, 0),
        Step::Unmask => (opcode::UNMASK, 0, 0, 0, 0),
        Step::Add { dst, a, b } => (opcode::ADD, 0, dst.0, a.0, b.0),
        Step::Mul { dst, a, b } => (opcode::MUL, 0, dst.0, a.0, b.0),
        Step::Div { dst, a, b } => (opcode::DIV, 0, dst.0, a.0, b.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoding_is_fixed_width() {
        let kernel = Kernel::new(
            4,
            vec![
                Step::Scatter { field: fields::B },
                Step::Copy { dst: fields::A, src: fields::B },
                Step::Signal,
                Step::Halt,
            ],
        );
        let bytes = kernel.encode();
        assert_eq!(&bytes[..4], KERNEL_MAGIC);
        assert_eq!(bytes.len(), 4 + 2 + 4 + 4 * STEP_RECORD_BYTES);
    }

    #[test]
    fn encoding_is_deterministic() {
        let steps = vec![
            Step::GetTorus { dst: Slot(2), src: Slot(2), dir: Dir::East },
            Step::MaskGtInt { slot: Slot(3), imm: -1 },
            Step::Unmask,
            Step::Halt,
        ];
        let a = Kernel::new(5, steps.clone()).encode();
        let b = Kernel::new(5, steps).encode();
        assert_eq!(a, b);
    }

    #[test]
    fn negative_immediates_survive_encoding() {
        let (_, _, _, w1, _) = encode_step(Step::AddIntImm { dst: Slot(0), imm: -1 });
        assert_eq!(w1 as i16, -1);
    }

    #[test]
    fn field_slots_are_stable() {
        // Persistent state depends on these addresses never moving.
        assert_eq!(fields::A, Slot(0));
        assert_eq!(fields::B, Slot(1));
        assert_eq!(fields::FIRST_FREE, 2);
    }
}
