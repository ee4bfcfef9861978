//! Hardware backend
//!
//! Drives real silicon through its character device. Every transaction
//! is a fixed-layout little-endian frame: register reads and writes for
//! control, block transfers for the staging memory and the kernel image.
//!
//! The device file is opened non-blocking; the completion flag is
//! observed by polling the status register under an explicit deadline,
//! so a stalled kernel surfaces as a timeout instead of hanging the
//! host.

use crate::backend::{BackendType, MeshBackend};
use crate::error::{MeshError, Result};
use bytes::{BufMut, Bytes, BytesMut};
use rustix::fs::OFlags;
use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use torus_chip::isa::Kernel;
use torus_chip::topology::MeshTopology;
use torus_chip::regs;
use tracing::{debug, info};

/// Default device node for the first mesh card.
pub const DEFAULT_DEVICE_PATH: &str = "/dev/torus-mesh0";

/// Poll interval while waiting on the completion flag.
const POLL_INTERVAL: Duration = Duration::from_micros(200);

/// Host-link command opcodes.
mod cmd {
    pub const REG_READ: u8 = 0x01;
    pub const REG_WRITE: u8 = 0x02;
    pub const BLOCK_READ: u8 = 0x03;
    pub const BLOCK_WRITE: u8 = 0x04;
}

/// Real mesh silicon over the host link.
#[derive(Debug)]
pub struct HardwareBackend {
    topo: MeshTopology,
    path: PathBuf,
    handle: DeviceHandle,
}

/// Low-level device file handle
#[derive(Debug)]
struct DeviceHandle {
    file: File,
}

impl DeviceHandle {
    fn open(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(MeshError::device_not_found(path));
        }

        // Flag bits are small positive values.
        #[allow(clippy::cast_possible_wrap)]
        let nonblock_flag = OFlags::NONBLOCK.bits() as i32;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(nonblock_flag)
            .open(path)?;

        Ok(Self { file })
    }

    fn write_all(&mut self, mut data: &[u8]) -> Result<()> {
        use std::io::Write;
        while !data.is_empty() {
            let n = self
                .file
                .write(data)
                .map_err(|e| MeshError::transfer_failed(format!("write failed: {e}")))?;
            if n == 0 {
                return Err(MeshError::transfer_failed("device accepted zero bytes"));
            }
            data = &data[n..];
        }
        Ok(())
    }

    fn read_exact(&mut self, mut buf: &mut [u8]) -> Result<()> {
        use std::io::Read;
        while !buf.is_empty() {
            let n = self
                .file
                .read(buf)
                .map_err(|e| MeshError::transfer_failed(format!("read failed: {e}")))?;
            if n == 0 {
                return Err(MeshError::transfer_failed("device returned zero bytes"));
            }
            buf = &mut buf[n..];
        }
        Ok(())
    }
}

impl AsRawFd for DeviceHandle {
    fn as_raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}

impl HardwareBackend {
    /// Open the first mesh card and verify identity and geometry.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::DeviceNotFound`] when no card is present, or
    /// [`MeshError::InvalidState`] when the card's geometry does not
    /// match the requested topology.
    pub fn discover(topo: MeshTopology) -> Result<Self> {
        Self::open(DEFAULT_DEVICE_PATH, topo)
    }

    /// Open a mesh card at an explicit device path.
    ///
    /// # Errors
    ///
    /// Returns error if the device cannot be opened or identified.
    pub fn open(path: impl Into<PathBuf>, topo: MeshTopology) -> Result<Self> {
        let path = path.into();
        debug!("Opening device {}", path.display());
        let handle = DeviceHandle::open(&path)?;
        let mut backend = Self { topo, path, handle };

        let id = backend.reg_read(regs::DEVICE_ID)?;
        if id != regs::EXPECTED_DEVICE_ID {
            return Err(MeshError::invalid_state(format!(
                "unexpected device id {id:#010x}"
            )));
        }
        let geometry = backend.reg_read(regs::GEOMETRY)?;
        let (rows, cols) = (geometry >> 16, geometry & 0xFFFF);
        if (rows as usize, cols as usize) != (topo.rows, topo.cols) {
            return Err(MeshError::invalid_state(format!(
                "device mesh is {rows}×{cols}, requested {}×{}",
                topo.rows, topo.cols
            )));
        }

        info!("Opened device {} ({rows}×{cols} mesh)", backend.path.display());
        Ok(backend)
    }

    /// Device node this backend drives.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn reg_read(&mut self, offset: usize) -> Result<u32> {
        let mut frame = BytesMut::with_capacity(9);
        frame.put_u8(cmd::REG_READ);
        frame.put_u32_le(u32::try_from(offset).unwrap_or(u32::MAX));
        frame.put_u32_le(4);
        self.handle.write_all(&frame)?;
        let mut value = [0u8; 4];
        self.handle.read_exact(&mut value)?;
        Ok(u32::from_le_bytes(value))
    }

    fn reg_write(&mut self, offset: usize, value: u32) -> Result<()> {
        let mut frame = BytesMut::with_capacity(13);
        frame.put_u8(cmd::REG_WRITE);
        frame.put_u32_le(u32::try_from(offset).unwrap_or(u32::MAX));
        frame.put_u32_le(4);
        frame.put_u32_le(value);
        self.handle.write_all(&frame)
    }

    fn block_write(&mut self, offset: usize, payload: &Bytes) -> Result<()> {
        let mut frame = BytesMut::with_capacity(9 + payload.len());
        frame.put_u8(cmd::BLOCK_WRITE);
        frame.put_u32_le(u32::try_from(offset).unwrap_or(u32::MAX));
        frame.put_u32_le(u32::try_from(payload.len()).unwrap_or(u32::MAX));
        frame.put_slice(payload);
        self.handle.write_all(&frame)
    }

    fn block_read(&mut self, offset: usize, out: &mut [u8]) -> Result<()> {
        let mut frame = BytesMut::with_capacity(9);
        frame.put_u8(cmd::BLOCK_READ);
        frame.put_u32_le(u32::try_from(offset).unwrap_or(u32::MAX));
        frame.put_u32_le(u32::try_from(out.len()).unwrap_or(u32::MAX));
        self.handle.write_all(&frame)?;
        self.handle.read_exact(out)
    }

    fn status(&mut self) -> Result<u32> {
        self.reg_read(regs::STATUS)
    }
}

impl MeshBackend for HardwareBackend {
    fn topology(&self) -> MeshTopology {
        self.topo
    }

    fn is_running(&mut self) -> Result<bool> {
        Ok(self.status()? & (regs::status::RUNNING | regs::status::SIGNAL) != 0)
    }

    fn write_staging(&mut self, words: &[u16]) -> Result<()> {
        if words.len() != self.topo.cells() {
            return Err(MeshError::ShapeMismatch {
                expected: self.topo.cells(),
                actual: words.len(),
            });
        }
        let mut payload = BytesMut::with_capacity(words.len() * 2);
        for w in words {
            payload.put_u16_le(*w);
        }
        self.block_write(regs::STAGING_BASE, &payload.freeze())
    }

    fn read_staging(&mut self, out: &mut [u16]) -> Result<()> {
        if out.len() != self.topo.cells() {
            return Err(MeshError::ShapeMismatch {
                expected: self.topo.cells(),
                actual: out.len(),
            });
        }
        let mut raw = vec![0u8; out.len() * 2];
        self.block_read(regs::STAGING_BASE, &mut raw)?;
        for (w, pair) in out.iter_mut().zip(raw.chunks_exact(2)) {
            *w = u16::from_le_bytes([pair[0], pair[1]]);
        }
        Ok(())
    }

    fn load_kernel(&mut self, kernel: &Kernel) -> Result<()> {
        let image = Bytes::from(kernel.encode());
        debug!(bytes = image.len(), steps = kernel.len(), "loading kernel image");
        self.block_write(regs::KERNEL_BASE, &image)?;
        self.reg_write(regs::KERNEL_SIZE, u32::try_from(image.len()).unwrap_or(u32::MAX))?;
        self.reg_write(regs::KERNEL_LOAD, 1)
    }

    fn start(&mut self) -> Result<()> {
        self.reg_write(regs::KERNEL_START, 1)
    }

    fn wait_signal(&mut self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            let status = self.status()?;
            if status & regs::status::SIGNAL != 0 {
                return Ok(());
            }
            if status & regs::status::ERROR != 0 {
                return Err(MeshError::invalid_state("device reported a kernel fault"));
            }
            // Halted without a signal: the flag can never come.
            if status & regs::status::HALTED != 0 || Instant::now() >= deadline {
                return Err(MeshError::Timeout {
                    duration_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                });
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    fn clear_signal(&mut self) -> Result<()> {
        self.reg_write(regs::CONTROL, regs::control::CLEAR_SIGNAL)
    }

    fn backend_type(&self) -> BackendType {
        BackendType::Hardware
    }

    fn cycles_taken(&self) -> Option<u64> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discover_without_silicon_reports_device_not_found() {
        if Path::new(DEFAULT_DEVICE_PATH).exists() {
            println!("ℹ️  Skipping test (mesh card present)");
            return;
        }
        let err = HardwareBackend::discover(MeshTopology::square(8)).unwrap_err();
        assert!(matches!(err, MeshError::DeviceNotFound { .. }));
    }
}
