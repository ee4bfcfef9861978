//! Kernel builder
//!
//! The emit layer between buffered program operations and the broadcast
//! instruction set. The builder owns slot allocation for scratch
//! variables and enforces the two structural invariants of the machine
//! at emit time:
//!
//! - masked sections are closure-scoped, so every mask push is closed
//!   exactly once and nesting can never unbalance;
//! - the per-PE scratch register is handed out as a guard that emits the
//!   release on every exit path, and a second reservation while one is
//!   live is a checked error.
//!
//! The emulator re-checks both at execution time; hand-assembled kernels
//! get the same discipline that built ones do.

use crate::error::{MeshError, Result};
use torus_chip::approx::Approx;
use torus_chip::isa::{fields, Kernel, Slot, Step};
use torus_chip::topology::{Dir, MeshTopology};

/// Incrementally assembles a [`Kernel`] for one mesh topology.
#[derive(Debug)]
pub struct KernelBuilder {
    topo: MeshTopology,
    steps: Vec<Step>,
    next_slot: u16,
    mask_depth: usize,
    scratch_reserved: bool,
}

impl KernelBuilder {
    /// Start an empty kernel for the given mesh.
    #[must_use]
    pub fn new(topo: MeshTopology) -> Self {
        Self {
            topo,
            steps: Vec::new(),
            next_slot: fields::FIRST_FREE,
            mask_depth: 0,
            scratch_reserved: false,
        }
    }

    /// Mesh this kernel targets.
    #[must_use]
    pub const fn topology(&self) -> MeshTopology {
        self.topo
    }

    /// Allocate a fresh per-PE scratch variable.
    #[must_use]
    pub fn alloc(&mut self) -> Slot {
        let slot = Slot(self.next_slot);
        self.next_slot += 1;
        slot
    }

    /// Allocate a slot holding a broadcast reduced-precision constant.
    #[must_use]
    pub fn constant(&mut self, value: f32) -> Slot {
        let slot = self.alloc();
        self.imm(slot, Approx::from_f32(value).to_bits());
        slot
    }

    /// Broadcast a raw 16-bit literal into `dst`.
    pub fn imm(&mut self, dst: Slot, bits: u16) {
        self.steps.push(Step::Imm { dst, bits });
    }

    /// Per-PE copy `dst = src`.
    pub fn copy(&mut self, dst: Slot, src: Slot) {
        self.steps.push(Step::Copy { dst, src });
    }

    /// Neighbor read without wraparound; boundary PEs read zero.
    pub fn get_edge(&mut self, dst: Slot, src: Slot, dir: Dir) {
        self.steps.push(Step::GetEdge { dst, src, dir });
    }

    /// Rotate a whole field one step: every PE takes its torus
    /// neighbor's value in `dir`.
    pub fn rotate(&mut self, slot: Slot, dir: Dir) {
        self.steps.push(Step::GetTorus { dst: slot, src: slot, dir });
    }

    /// Integer add-immediate on `dst`.
    pub fn add_int(&mut self, dst: Slot, imm: i16) {
        self.steps.push(Step::AddIntImm { dst, imm });
    }

    /// Reduced-precision `dst = a + b`.
    pub fn add(&mut self, dst: Slot, a: Slot, b: Slot) {
        self.steps.push(Step::Add { dst, a, b });
    }

    /// Reduced-precision `dst = a * b`.
    pub fn mul(&mut self, dst: Slot, a: Slot, b: Slot) {
        self.steps.push(Step::Mul { dst, a, b });
    }

    /// Reduced-precision `dst = a / b`.
    pub fn div(&mut self, dst: Slot, a: Slot, b: Slot) {
        self.steps.push(Step::Div { dst, a, b });
    }

    /// Emit `body` under a mask enabling only PEs where the integer in
    /// `slot` exceeds `imm`. The section is closed when `body` returns.
    pub fn masked_gt(&mut self, slot: Slot, imm: i16, body: impl FnOnce(&mut Self)) {
        self.steps.push(Step::MaskGtInt { slot, imm });
        self.mask_depth += 1;
        body(self);
        self.steps.push(Step::Unmask);
        self.mask_depth -= 1;
    }

    /// Copy the staging block into a per-PE field (mask ignored).
    pub fn scatter(&mut self, field: Slot) {
        self.steps.push(Step::Scatter { field });
    }

    /// Copy a per-PE field into the staging block through the scratch
    /// register. Reservation and release are emitted as a pair on every
    /// path.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::ScratchInUse`] if a scratch reservation is
    /// already live.
    pub fn gather(&mut self, field: Slot) -> Result<()> {
        let mut guard = self.reserve_scratch()?;
        guard.load(field);
        guard.gather();
        Ok(())
    }

    /// Reserve the per-PE scratch register, returning a guard that emits
    /// the release when dropped.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::ScratchInUse`] on a second reservation.
    pub fn reserve_scratch(&mut self) -> Result<ScratchGuard<'_>> {
        if self.scratch_reserved {
            return Err(MeshError::ScratchInUse);
        }
        self.scratch_reserved = true;
        self.steps.push(Step::ReserveScratch);
        Ok(ScratchGuard { builder: self })
    }

    /// Raise the completion flag and pause for the host.
    pub fn signal(&mut self) {
        self.steps.push(Step::Signal);
    }

    /// End the kernel.
    pub fn halt(&mut self) {
        self.steps.push(Step::Halt);
    }

    /// Seal the kernel.
    ///
    /// # Errors
    ///
    /// Returns error if a masked section is still open — a kernel that
    /// would corrupt the machine's mask state must never leave the
    /// builder.
    pub fn finish(self) -> Result<Kernel> {
        if self.mask_depth != 0 {
            return Err(MeshError::UnbalancedMask {
                depth: self.mask_depth,
            });
        }
        Ok(Kernel::new(self.next_slot, self.steps))
    }
}

/// Live reservation of the per-PE scratch register.
///
/// Emits [`Step::ReleaseScratch`] when dropped, so the register cannot
/// leak past the sequence that reserved it regardless of how that
/// sequence exits.
#[derive(Debug)]
pub struct ScratchGuard<'a> {
    builder: &'a mut KernelBuilder,
}

impl ScratchGuard<'_> {
    /// Latch a field into the scratch register.
    pub fn load(&mut self, field: Slot) {
        self.builder.steps.push(Step::LoadScratch { field });
    }

    /// Emit the staged read of every PE's scratch register.
    pub fn gather(&mut self) {
        self.builder.steps.push(Step::Gather);
    }
}

impl Drop for ScratchGuard<'_> {
    fn drop(&mut self) {
        self.builder.steps.push(Step::ReleaseScratch);
        self.builder.scratch_reserved = false;
    }
}
