// SPDX-License-Identifier: AGPL-3.0-only

//! Emulator backend
//!
//! A single-threaded interpreter for the broadcast instruction set,
//! bit-faithful to the machine's data model: per-PE memory is a dense
//! `Vec<u16>` per slot, a masked write is
//! `cell[i] = enabled[i] ? new[i] : cell[i]`, and a neighbor read always
//! observes the fully completed previous step (every step computes its
//! result from a snapshot before writing anything back). There are no
//! per-cell threads; the SIMD machine's synchronous broadcast makes the
//! sequential interpretation exact.
//!
//! The emulator also counts cycles per kernel the way the silicon's
//! documentation prices the operations — notably the per-word settle
//! delay during gather — so programs can be compared for cost without
//! hardware.

use crate::backend::{BackendType, MeshBackend};
use crate::error::{MeshError, Result};
use std::time::Duration;
use torus_chip::isa::{Kernel, Slot, Step, GATHER_PROP_DELAY};
use torus_chip::topology::MeshTopology;
use tracing::{debug, trace};

/// Where the control unit is in its kernel lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// No kernel started since the last load/reset.
    Idle,
    /// Mid-kernel, paused at a signal step with the flag raised.
    Signalled,
    /// Kernel ran to its halt step.
    Halted,
    /// Kernel faulted; machine needs a reload.
    Faulted,
}

/// In-process mesh machine.
///
/// The persistent matrix fields come up zeroed when the machine is
/// created and survive across kernel loads; everything else (scratch
/// slots, mask stack, staging) is ordinary mutable state owned by this
/// object and torn down with it.
#[derive(Debug)]
pub struct EmulatorBackend {
    topo: MeshTopology,
    /// Per-PE memory, one dense row-major field per slot.
    fields: Vec<Vec<u16>>,
    /// Per-PE scratch register used by gather sequences.
    scratch: Vec<u16>,
    scratch_reserved: bool,
    /// Stack of cumulative per-PE write-enable layers.
    mask: Vec<Vec<bool>>,
    /// Control-unit staging memory, one N×N block.
    staging: Vec<u16>,
    code: Vec<Step>,
    pc: usize,
    phase: Phase,
    cycles: u64,
}

impl EmulatorBackend {
    /// Create a machine with zeroed persistent fields.
    #[must_use]
    pub fn new(topo: MeshTopology) -> Self {
        let cells = topo.cells();
        Self {
            topo,
            fields: vec![vec![0; cells]; usize::from(torus_chip::isa::fields::FIRST_FREE)],
            scratch: vec![0; cells],
            scratch_reserved: false,
            mask: Vec::new(),
            staging: vec![0; cells],
            code: Vec::new(),
            pc: 0,
            phase: Phase::Idle,
            cycles: 0,
        }
    }

    fn field(&self, pc: usize, slot: Slot) -> Result<&Vec<u16>> {
        self.fields
            .get(usize::from(slot.0))
            .ok_or_else(|| MeshError::kernel_fault(pc, format!("slot {} out of range", slot.0)))
    }

    /// Write `values` into `slot`, honoring the innermost mask layer.
    fn write_field(&mut self, pc: usize, slot: Slot, values: &[u16]) -> Result<()> {
        self.field(pc, slot)?;
        let dst = &mut self.fields[usize::from(slot.0)];
        match self.mask.last() {
            None => dst.copy_from_slice(values),
            Some(enabled) => {
                for (i, v) in values.iter().enumerate() {
                    if enabled[i] {
                        dst[i] = *v;
                    }
                }
            }
        }
        Ok(())
    }

    /// Neighbor read into a fresh buffer; `None` neighbors read zero.
    fn neighbor_values(&self, src: &[u16], dir: torus_chip::topology::Dir, torus: bool) -> Vec<u16> {
        let mut out = vec![0u16; self.topo.cells()];
        for (i, slot) in out.iter_mut().enumerate() {
            let (r, c) = self.topo.coords(i);
            let from = if torus {
                Some(self.topo.torus_neighbor(r, c, dir))
            } else {
                self.topo.edge_neighbor(r, c, dir)
            };
            *slot = from.map_or(0, |(nr, nc)| src[self.topo.index(nr, nc)]);
        }
        out
    }

    /// Run until the kernel signals, halts, or faults.
    fn run(&mut self) -> Result<()> {
        loop {
            let Some(step) = self.code.get(self.pc).copied() else {
                self.phase = Phase::Faulted;
                return Err(MeshError::kernel_fault(self.pc, "ran off the end of the kernel"));
            };
            let pc = self.pc;
            self.pc += 1;
            match self.exec(pc, step) {
                Ok(true) => continue,
                Ok(false) => return Ok(()),
                Err(e) => {
                    self.phase = Phase::Faulted;
                    return Err(e);
                }
            }
        }
    }

    /// Execute one broadcast step. Returns false when the control unit
    /// pauses (signal) or stops (halt).
    #[allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)]
    fn exec(&mut self, pc: usize, step: Step) -> Result<bool> {
        trace!(pc, ?step, "broadcast");
        self.cycles += 1;
        match step {
            Step::Scatter { field } => {
                self.field(pc, field)?;
                // Rows outer, columns inner; every PE exactly once,
                // mask ignored.
                for row in 0..self.topo.rows {
                    for col in 0..self.topo.cols {
                        let i = self.topo.index(row, col);
                        self.fields[usize::from(field.0)][i] = self.staging[i];
                        self.cycles += 1;
                    }
                }
            }
            Step::ReserveScratch => {
                if self.scratch_reserved {
                    return Err(MeshError::ScratchInUse);
                }
                self.scratch_reserved = true;
            }
            Step::LoadScratch { field } => {
                if !self.scratch_reserved {
                    return Err(MeshError::ScratchNotHeld);
                }
                let src = self.field(pc, field)?.clone();
                self.scratch.copy_from_slice(&src);
            }
            Step::Gather => {
                if !self.scratch_reserved {
                    return Err(MeshError::ScratchNotHeld);
                }
                for row in 0..self.topo.rows {
                    for col in 0..self.topo.cols {
                        let i = self.topo.index(row, col);
                        // Let the address change settle before latching.
                        self.cycles += GATHER_PROP_DELAY + 1;
                        self.staging[i] = self.scratch[i];
                    }
                }
            }
            Step::ReleaseScratch => {
                if !self.scratch_reserved {
                    return Err(MeshError::ScratchNotHeld);
                }
                self.scratch_reserved = false;
            }
            Step::Signal => {
                debug!(pc, cycles = self.cycles, "completion flag raised");
                self.phase = Phase::Signalled;
                return Ok(false);
            }
            Step::Halt => {
                if !self.mask.is_empty() {
                    return Err(MeshError::UnbalancedMask {
                        depth: self.mask.len(),
                    });
                }
                if self.scratch_reserved {
                    return Err(MeshError::kernel_fault(
                        pc,
                        "halt with scratch register still reserved",
                    ));
                }
                debug!(cycles = self.cycles, "kernel halted");
                self.phase = Phase::Halted;
                return Ok(false);
            }
            Step::Imm { dst, bits } => {
                let values = vec![bits; self.topo.cells()];
                self.write_field(pc, dst, &values)?;
            }
            Step::Copy { dst, src } => {
                let values = self.field(pc, src)?.clone();
                self.write_field(pc, dst, &values)?;
            }
            Step::GetEdge { dst, src, dir } => {
                let src = self.field(pc, src)?;
                let values = self.neighbor_values(src, dir, false);
                self.write_field(pc, dst, &values)?;
            }
            Step::GetTorus { dst, src, dir } => {
                let src = self.field(pc, src)?;
                let values = self.neighbor_values(src, dir, true);
                self.write_field(pc, dst, &values)?;
            }
            Step::AddIntImm { dst, imm } => {
                let values: Vec<u16> = self
                    .field(pc, dst)?
                    .iter()
                    .map(|&w| (w as i16).wrapping_add(imm) as u16)
                    .collect();
                self.write_field(pc, dst, &values)?;
            }
            Step::MaskGtInt { slot, imm } => {
                let outer = self.mask.last().cloned();
                let layer: Vec<bool> = self
                    .field(pc, slot)?
                    .iter()
                    .enumerate()
                    .map(|(i, &w)| {
                        (w as i16) > imm && outer.as_ref().map_or(true, |m| m[i])
                    })
                    .collect();
                self.mask.push(layer);
            }
            Step::Unmask => {
                if self.mask.pop().is_none() {
                    return Err(MeshError::MaskUnderflow);
                }
            }
            Step::Add { dst, a, b } => self.arith(pc, dst, a, b, torus_chip::approx::Approx::add)?,
            Step::Mul { dst, a, b } => self.arith(pc, dst, a, b, torus_chip::approx::Approx::mul)?,
            Step::Div { dst, a, b } => self.arith(pc, dst, a, b, torus_chip::approx::Approx::div)?,
        }
        Ok(true)
    }

    fn arith(
        &mut self,
        pc: usize,
        dst: Slot,
        a: Slot,
        b: Slot,
        op: fn(torus_chip::approx::Approx, torus_chip::approx::Approx) -> torus_chip::approx::Approx,
    ) -> Result<()> {
        use torus_chip::approx::Approx;
        let lhs = self.field(pc, a)?.clone();
        let rhs = self.field(pc, b)?.clone();
        let values: Vec<u16> = lhs
            .iter()
            .zip(rhs.iter())
            .map(|(&x, &y)| op(Approx::from_bits(x), Approx::from_bits(y)).to_bits())
            .collect();
        self.write_field(pc, dst, &values)
    }
}

impl MeshBackend for EmulatorBackend {
    fn topology(&self) -> MeshTopology {
        self.topo
    }

    fn is_running(&mut self) -> Result<bool> {
        Ok(self.phase == Phase::Signalled)
    }

    fn write_staging(&mut self, words: &[u16]) -> Result<()> {
        if words.len() != self.topo.cells() {
            return Err(MeshError::ShapeMismatch {
                expected: self.topo.cells(),
                actual: words.len(),
            });
        }
        self.staging.copy_from_slice(words);
        Ok(())
    }

    fn read_staging(&mut self, out: &mut [u16]) -> Result<()> {
        if out.len() != self.topo.cells() {
            return Err(MeshError::ShapeMismatch {
                expected: self.topo.cells(),
                actual: out.len(),
            });
        }
        out.copy_from_slice(&self.staging);
        Ok(())
    }

    fn load_kernel(&mut self, kernel: &Kernel) -> Result<()> {
        if self.phase == Phase::Signalled {
            return Err(MeshError::invalid_state("kernel load while mid-kernel"));
        }
        // Grow per-PE memory to the kernel's slot count. Existing fields
        // — in particular the persistent matrices — keep their words.
        let cells = self.topo.cells();
        while self.fields.len() < usize::from(kernel.slots()) {
            self.fields.push(vec![0; cells]);
        }
        self.code = kernel.steps().to_vec();
        self.pc = 0;
        self.phase = Phase::Idle;
        debug!(steps = self.code.len(), slots = kernel.slots(), "kernel loaded");
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        if self.code.is_empty() {
            return Err(MeshError::invalid_state("start with no kernel loaded"));
        }
        if self.phase == Phase::Signalled {
            return Err(MeshError::invalid_state("start while mid-kernel"));
        }
        self.pc = 0;
        self.cycles = 0;
        self.mask.clear();
        debug!("kernel started");
        self.run()
    }

    fn wait_signal(&mut self, timeout: Duration) -> Result<()> {
        match self.phase {
            Phase::Signalled => Ok(()),
            // The kernel already halted or faulted: the flag can never be
            // raised, so the blocking wait reports its timeout at once
            // instead of hanging the host.
            Phase::Halted | Phase::Faulted | Phase::Idle => Err(MeshError::Timeout {
                duration_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        }
    }

    fn clear_signal(&mut self) -> Result<()> {
        if self.phase != Phase::Signalled {
            return Err(MeshError::invalid_state("signal clear with no signal pending"));
        }
        debug!("completion flag cleared, resuming");
        self.run()
    }

    fn backend_type(&self) -> BackendType {
        BackendType::Emulated
    }

    fn cycles_taken(&self) -> Option<u64> {
        Some(self.cycles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use torus_chip::isa::fields;

    fn run_kernel(backend: &mut EmulatorBackend, steps: Vec<Step>) -> Result<()> {
        let slots = fields::FIRST_FREE + 4;
        backend.load_kernel(&Kernel::new(slots, steps))?;
        backend.start()
    }

    #[test]
    fn scatter_gather_round_trip() {
        let topo = MeshTopology::square(4);
        let mut m = EmulatorBackend::new(topo);
        let words: Vec<u16> = (0..16).map(|i| i * 3 + 1).collect();
        m.write_staging(&words).unwrap();
        run_kernel(
            &mut m,
            vec![
                Step::Scatter { field: fields::B },
                Step::ReserveScratch,
                Step::LoadScratch { field: fields::B },
                Step::Gather,
                Step::ReleaseScratch,
                Step::Halt,
            ],
        )
        .unwrap();
        let mut out = vec![0u16; 16];
        m.read_staging(&mut out).unwrap();
        assert_eq!(out, words);
    }

    #[test]
    fn staging_shape_is_checked() {
        let mut m = EmulatorBackend::new(MeshTopology::square(4));
        let err = m.write_staging(&[0u16; 9]).unwrap_err();
        assert!(matches!(err, MeshError::ShapeMismatch { expected: 16, actual: 9 }));
        let mut short = vec![0u16; 3];
        assert!(m.read_staging(&mut short).is_err());
    }

    #[test]
    fn scratch_double_reserve_is_an_error() {
        let mut m = EmulatorBackend::new(MeshTopology::square(2));
        let err = run_kernel(&mut m, vec![Step::ReserveScratch, Step::ReserveScratch]).unwrap_err();
        assert!(matches!(err, MeshError::ScratchInUse));
    }

    #[test]
    fn gather_requires_reservation() {
        let mut m = EmulatorBackend::new(MeshTopology::square(2));
        let err = run_kernel(&mut m, vec![Step::Gather]).unwrap_err();
        assert!(matches!(err, MeshError::ScratchNotHeld));
    }

    #[test]
    fn halt_with_reserved_scratch_is_a_leak() {
        let mut m = EmulatorBackend::new(MeshTopology::square(2));
        let err = run_kernel(&mut m, vec![Step::ReserveScratch, Step::Halt]).unwrap_err();
        assert!(matches!(err, MeshError::KernelFault { .. }));
    }

    #[test]
    fn mask_pop_without_push_is_an_error() {
        let mut m = EmulatorBackend::new(MeshTopology::square(2));
        let err = run_kernel(&mut m, vec![Step::Unmask]).unwrap_err();
        assert!(matches!(err, MeshError::MaskUnderflow));
    }

    #[test]
    fn halt_inside_masked_section_is_an_error() {
        let mut m = EmulatorBackend::new(MeshTopology::square(2));
        let err = run_kernel(
            &mut m,
            vec![Step::MaskGtInt { slot: fields::A, imm: -1 }, Step::Halt],
        )
        .unwrap_err();
        assert!(matches!(err, MeshError::UnbalancedMask { depth: 1 }));
    }

    #[test]
    fn mask_gates_writes() {
        use torus_chip::approx::Approx;
        let mut m = EmulatorBackend::new(MeshTopology::square(2));
        let five = Approx::from_f32(5.0).to_bits();
        let nine = Approx::from_f32(9.0).to_bits();
        // Slot 2 holds integer 7 in every PE. 7 > 10 enables nobody; the
        // masked store must leave A untouched. 7 > 3 enables everybody.
        run_kernel(
            &mut m,
            vec![
                Step::Imm { dst: fields::A, bits: five },
                Step::Imm { dst: Slot(2), bits: 7 },
                Step::MaskGtInt { slot: Slot(2), imm: 10 },
                Step::Imm { dst: fields::A, bits: nine },
                Step::Unmask,
                Step::MaskGtInt { slot: Slot(2), imm: 3 },
                Step::Imm { dst: fields::B, bits: nine },
                Step::Unmask,
                Step::Halt,
            ],
        )
        .unwrap();
        assert!(m.fields[0].iter().all(|&w| w == five));
        assert!(m.fields[1].iter().all(|&w| w == nine));
    }

    #[test]
    fn signal_wait_clear_protocol() {
        let mut m = EmulatorBackend::new(MeshTopology::square(2));
        run_kernel(&mut m, vec![Step::Signal, Step::Halt]).unwrap();
        assert!(m.is_running().unwrap());
        m.wait_signal(Duration::from_millis(10)).unwrap();
        m.clear_signal().unwrap();
        assert!(!m.is_running().unwrap());
        // Halted: the next wait can never be satisfied.
        let err = m.wait_signal(Duration::from_millis(10)).unwrap_err();
        assert!(matches!(err, MeshError::Timeout { .. }));
    }

    #[test]
    fn gather_charges_propagation_delay() {
        let mut m = EmulatorBackend::new(MeshTopology::square(4));
        run_kernel(
            &mut m,
            vec![
                Step::ReserveScratch,
                Step::Gather,
                Step::ReleaseScratch,
                Step::Halt,
            ],
        )
        .unwrap();
        assert!(m.cycles_taken().unwrap() >= 16 * (GATHER_PROP_DELAY + 1));
    }

    #[test]
    fn fields_persist_across_kernel_loads() {
        let mut m = EmulatorBackend::new(MeshTopology::square(2));
        let bits = torus_chip::approx::Approx::from_f32(17.0).to_bits();
        run_kernel(&mut m, vec![Step::Imm { dst: fields::A, bits }, Step::Halt]).unwrap();
        // A second kernel with a larger slot demand must not disturb A.
        let big = Kernel::new(32, vec![Step::Imm { dst: Slot(30), bits: 1 }, Step::Halt]);
        m.load_kernel(&big).unwrap();
        m.start().unwrap();
        assert!(m.fields[0].iter().all(|&w| w == bits));
    }

    #[test]
    fn fresh_machine_is_not_running() {
        let mut m = EmulatorBackend::new(MeshTopology::square(8));
        assert!(!m.is_running().unwrap());
        assert_eq!(m.backend_type(), BackendType::Emulated);
    }
}
