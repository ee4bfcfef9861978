//! Host-link register map.
//!
//! The real machine exposes a small register file over its host link;
//! the driver's hardware backend frames every transaction against these
//! offsets. The emulator models the same status bits directly.

// ── Device identity ──────────────────────────────────────────────────────────

/// Device ID register.
pub const DEVICE_ID: usize = 0x0000;

/// Value read from [`DEVICE_ID`] on a healthy device.
pub const EXPECTED_DEVICE_ID: u32 = 0x544D_0001;

/// Mesh geometry register: rows in the high half, columns in the low.
pub const GEOMETRY: usize = 0x0004;

// ── Status and control ───────────────────────────────────────────────────────

/// Main status register.
pub const STATUS: usize = 0x0008;

/// Control register.
pub const CONTROL: usize = 0x000C;

// ── Kernel load ──────────────────────────────────────────────────────────────

/// Kernel image size in bytes.
pub const KERNEL_SIZE: usize = 0x0100;
/// Kernel load trigger — write 1 after streaming the image.
pub const KERNEL_LOAD: usize = 0x0104;
/// Kernel start trigger — write 1 to begin execution.
pub const KERNEL_START: usize = 0x0108;
/// Base offset of the kernel image window.
pub const KERNEL_BASE: usize = 0x2_0000;

// ── Staging memory ───────────────────────────────────────────────────────────

/// Base offset of the N×N staging block (16-bit words).
pub const STAGING_BASE: usize = 0x1000;

// ── Status register bits ─────────────────────────────────────────────────────

/// Status bit definitions.
pub mod status {
    /// Control unit is executing a kernel.
    pub const RUNNING: u32 = 1 << 0;
    /// Completion flag raised; the machine is paused at a signal step.
    pub const SIGNAL: u32 = 1 << 1;
    /// Kernel ran to its halt step.
    pub const HALTED: u32 = 1 << 2;
    /// The last kernel faulted.
    pub const ERROR: u32 = 1 << 3;
}

// ── Control register bits ────────────────────────────────────────────────────

/// Control bit definitions.
pub mod control {
    /// Soft reset.
    pub const RESET: u32 = 1 << 0;
    /// Clear the completion flag and resume execution.
    pub const CLEAR_SIGNAL: u32 = 1 << 1;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_offsets_non_overlapping() {
        assert_ne!(DEVICE_ID, STATUS);
        assert_ne!(STATUS, CONTROL);
        assert_ne!(KERNEL_LOAD, KERNEL_START);
        assert!(STAGING_BASE > KERNEL_START);
    }

    #[test]
    fn status_bits_disjoint() {
        let all = status::RUNNING | status::SIGNAL | status::HALTED | status::ERROR;
        assert_eq!(all.count_ones(), 4);
    }
}
