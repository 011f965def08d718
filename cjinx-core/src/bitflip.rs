use crate::error::{CorruptError, CorruptResult};
use std::path::Path;
use tracing::{debug, info};

/// Byte and bit every corruption targets: the top bit of the block's first byte.
pub const TARGET_BYTE: usize = 0;
pub const TARGET_BIT: u8 = 7;

/// Toggle bit `bit` of `buf[offset]` in place, returning `(before, after)`.
pub fn flip_bit(buf: &mut [u8], offset: usize, bit: u8) -> CorruptResult<(u8, u8)> {
    if offset >= buf.len() || bit > 7 {
        return Err(CorruptError::OffsetOutOfRange { offset, bit, len: buf.len() });
    }
    let before = buf[offset];
    let after = before ^ (1u8 << bit);
    buf[offset] = after;
    info!("nth_byte = {offset} before/after: {before:#04x}/{after:#04x}");
    Ok((before, after))
}

/// Put `original` back at `offset`, but only if the byte there is still
/// `expected`; otherwise nothing in `buf` changes.
pub fn restore_byte(buf: &mut [u8], offset: usize, expected: u8, original: u8, path: &Path) -> CorruptResult<()> {
    let len = buf.len();
    let slot = buf.get_mut(offset).ok_or(CorruptError::OffsetOutOfRange { offset, bit: 0, len })?;
    let found = *slot;
    debug!("modified_value {expected:#04x} / value_read {found:#04x}");
    if found != expected {
        return Err(CorruptError::IntegrityMismatch { path: path.to_path_buf(), expected, found });
    }
    *slot = original;
    debug!("revert to orig_value: {original:#04x}");
    Ok(())
}
