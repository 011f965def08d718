//! Single-block transfers between a device and the scratch buffer.

use crate::command;
use crate::error::{CorruptError, CorruptResult};
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// Transfer unit, identical to the unit `filefrag -b4096` reports in.
pub const BLOCK_SIZE: usize = 4096;

/// Raw access to a block device by block number.
pub trait BlockDevice {
    /// Read exactly one block. A short read is an error.
    fn read_block(&self, device: &str, block: u64) -> CorruptResult<Vec<u8>>;
    /// Write exactly one block, leaving the rest of the device untouched.
    fn write_block(&self, device: &str, block: u64, data: &[u8]) -> CorruptResult<()>;
}

impl<T: BlockDevice + ?Sized> BlockDevice for Box<T> {
    fn read_block(&self, device: &str, block: u64) -> CorruptResult<Vec<u8>> {
        (**self).read_block(device, block)
    }

    fn write_block(&self, device: &str, block: u64, data: &[u8]) -> CorruptResult<()> {
        (**self).write_block(device, block, data)
    }
}

fn byte_offset(block: u64) -> Option<u64> {
    block.checked_mul(BLOCK_SIZE as u64)
}

fn check_len(device: &str, block: u64, data: &[u8]) -> CorruptResult<()> {
    if data.len() != BLOCK_SIZE {
        return Err(CorruptError::DeviceWrite {
            device: device.to_string(),
            block,
            detail: format!("buffer is {} bytes, expected {}", data.len(), BLOCK_SIZE),
        });
    }
    Ok(())
}

/// Production adapter: `dd` through a scratch file.
///
/// Writes use `oflag=direct conv=notrunc` so the block bypasses the page
/// cache and nothing around it is truncated.
#[derive(Debug, Clone)]
pub struct DdDevice {
    scratch: PathBuf,
    dd: String,
}

impl DdDevice {
    pub fn new(scratch: impl Into<PathBuf>) -> Self {
        Self { scratch: scratch.into(), dd: "dd".into() }
    }
}

impl BlockDevice for DdDevice {
    fn read_block(&self, device: &str, block: u64) -> CorruptResult<Vec<u8>> {
        let read_err = |detail: String| CorruptError::DeviceRead {
            device: device.to_string(),
            block,
            detail,
        };
        let args = [
            format!("bs={BLOCK_SIZE}"),
            "count=1".to_string(),
            format!("skip={block}"),
            format!("if={device}"),
            format!("of={}", self.scratch.display()),
        ];
        command::run_checked(&self.dd, &args).map_err(read_err)?;
        let buf = fs::read(&self.scratch)
            .map_err(|e| read_err(format!("scratch {}: {e}", self.scratch.display())))?;
        if buf.len() != BLOCK_SIZE {
            return Err(read_err(format!("short read: {} of {} bytes", buf.len(), BLOCK_SIZE)));
        }
        Ok(buf)
    }

    fn write_block(&self, device: &str, block: u64, data: &[u8]) -> CorruptResult<()> {
        check_len(device, block, data)?;
        let write_err = |detail: String| CorruptError::DeviceWrite {
            device: device.to_string(),
            block,
            detail,
        };
        fs::write(&self.scratch, data)
            .map_err(|e| write_err(format!("scratch {}: {e}", self.scratch.display())))?;
        let args = [
            format!("bs={BLOCK_SIZE}"),
            "count=1".to_string(),
            format!("if={}", self.scratch.display()),
            format!("of={device}"),
            format!("seek={block}"),
            "oflag=direct".to_string(),
            "conv=notrunc".to_string(),
        ];
        command::run_checked(&self.dd, &args).map_err(write_err)?;
        Ok(())
    }
}

/// In-process adapter using positional I/O on the device node, followed by
/// `sync_data`. Works against plain image files as well.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileDevice;

impl BlockDevice for FileDevice {
    fn read_block(&self, device: &str, block: u64) -> CorruptResult<Vec<u8>> {
        let read_err = |detail: String| CorruptError::DeviceRead {
            device: device.to_string(),
            block,
            detail,
        };
        let off = byte_offset(block).ok_or_else(|| read_err("block number overflows".into()))?;
        let f = fs::File::open(device).map_err(|e| read_err(e.to_string()))?;
        let mut buf = vec![0u8; BLOCK_SIZE];
        f.read_exact_at(&mut buf, off).map_err(|e| read_err(e.to_string()))?;
        debug!(device, block, "read block");
        Ok(buf)
    }

    fn write_block(&self, device: &str, block: u64, data: &[u8]) -> CorruptResult<()> {
        check_len(device, block, data)?;
        let write_err = |detail: String| CorruptError::DeviceWrite {
            device: device.to_string(),
            block,
            detail,
        };
        let off = byte_offset(block).ok_or_else(|| write_err("block number overflows".into()))?;
        let f = OpenOptions::new().write(true).open(device).map_err(|e| write_err(e.to_string()))?;
        f.write_all_at(data, off).map_err(|e| write_err(e.to_string()))?;
        f.sync_data().map_err(|e| write_err(e.to_string()))?;
        debug!(device, block, "wrote block");
        Ok(())
    }
}

#[derive(Debug, Default)]
struct MemoryInner {
    blocks: HashMap<(String, u64), Vec<u8>>,
    fail_reads: bool,
    fail_writes: bool,
    writes: usize,
}

/// Device kept in memory. Blocks never written read back as zeros.
/// Clones share the same storage.
#[derive(Debug, Clone, Default)]
pub struct MemoryDevice {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryDevice {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_block(&self, device: &str, block: u64, data: Vec<u8>) {
        let mut data = data;
        data.resize(BLOCK_SIZE, 0);
        self.lock().blocks.insert((device.to_string(), block), data);
    }

    pub fn block(&self, device: &str, block: u64) -> Vec<u8> {
        let inner = self.lock();
        inner
            .blocks
            .get(&(device.to_string(), block))
            .cloned()
            .unwrap_or_else(|| vec![0u8; BLOCK_SIZE])
    }

    /// Overwrite one byte in place, as an outside writer would.
    pub fn poke(&self, device: &str, block: u64, offset: usize, value: u8) {
        let mut buf = self.block(device, block);
        buf[offset] = value;
        self.set_block(device, block, buf);
    }

    pub fn fail_reads(&self, fail: bool) {
        self.lock().fail_reads = fail;
    }

    pub fn fail_writes(&self, fail: bool) {
        self.lock().fail_writes = fail;
    }

    pub fn write_count(&self) -> usize {
        self.lock().writes
    }
}

impl BlockDevice for MemoryDevice {
    fn read_block(&self, device: &str, block: u64) -> CorruptResult<Vec<u8>> {
        if self.lock().fail_reads {
            return Err(CorruptError::DeviceRead {
                device: device.to_string(),
                block,
                detail: "injected read failure".into(),
            });
        }
        Ok(self.block(device, block))
    }

    fn write_block(&self, device: &str, block: u64, data: &[u8]) -> CorruptResult<()> {
        check_len(device, block, data)?;
        let mut inner = self.lock();
        if inner.fail_writes {
            return Err(CorruptError::DeviceWrite {
                device: device.to_string(),
                block,
                detail: "injected write failure".into(),
            });
        }
        inner.writes += 1;
        inner.blocks.insert((device.to_string(), block), data.to_vec());
        Ok(())
    }
}
