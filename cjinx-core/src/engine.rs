//! Corrupt and revert, one file at a time.
//!
//! A file is either clean (no record) or corrupted (one record). Corruption
//! stages its record before touching the device and commits it once the write
//! has landed; [`Engine::recover`] settles records a crash left staged.

use crate::audit::{AuditLog, AuditOp};
use crate::bitflip::{flip_bit, restore_byte, TARGET_BIT, TARGET_BYTE};
use crate::cache::CacheInvalidator;
use crate::device::BlockDevice;
use crate::error::{CorruptError, CorruptResult};
use crate::extent::{Extent, ExtentResolver};
use crate::record::{mtime_secs, CorruptionRecord, RecordState};
use crate::store::RecordStore;
use chrono::Utc;
use rand::rngs::StdRng;
use rand::Rng;
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum RevertOutcome {
    Reverted(CorruptionRecord),
    NotFound,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RevertSummary {
    pub reverted: usize,
    pub not_found: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoverySummary {
    /// Staged records whose write was found on disk.
    pub committed: usize,
    /// Staged records whose write never happened.
    pub dropped: usize,
    /// Staged records left alone: unreadable block or unexpected byte.
    pub unresolved: usize,
}

/// `path` made absolute against the working directory with `.` and `..`
/// folded lexically. Symlinks are not resolved. Records are keyed by this form.
pub fn absolute_path(path: &Path) -> std::io::Result<PathBuf> {
    let joined = if path.is_absolute() { path.to_path_buf() } else { std::env::current_dir()?.join(path) };
    let mut out = PathBuf::new();
    for comp in joined.components() {
        match comp {
            Component::CurDir => {}
            // `..` at the root stays at the root
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    Ok(out)
}

/// Uniform pick in `[extent.begin, extent.end]`.
pub fn pick_target_block<R: Rng>(extent: &Extent, rng: &mut R) -> u64 {
    if extent.end <= extent.begin {
        return extent.begin;
    }
    rng.gen_range(extent.begin..=extent.end)
}

pub struct Engine {
    resolver: Box<dyn ExtentResolver>,
    device: Box<dyn BlockDevice>,
    cache: Box<dyn CacheInvalidator>,
    store: Box<dyn RecordStore>,
    audit: AuditLog,
    rng: StdRng,
}

impl Engine {
    pub fn new(
        resolver: impl ExtentResolver + 'static,
        device: impl BlockDevice + 'static,
        cache: impl CacheInvalidator + 'static,
        store: impl RecordStore + 'static,
        audit: AuditLog,
        rng: StdRng,
    ) -> Self {
        Self {
            resolver: Box::new(resolver),
            device: Box::new(device),
            cache: Box::new(cache),
            store: Box::new(store),
            audit,
            rng,
        }
    }

    pub fn store(&self) -> &dyn RecordStore {
        self.store.as_ref()
    }

    pub fn rng_mut(&mut self) -> &mut StdRng {
        &mut self.rng
    }

    pub fn has_been_corrupted(&self, path: &Path) -> CorruptResult<bool> {
        Ok(self.store.get_by_filename(path)?.is_some())
    }

    /// Flip one bit in a random block of the file's first extent.
    pub fn corrupt(&mut self, path: &Path) -> CorruptResult<CorruptionRecord> {
        let path = absolute_path(path).map_err(|e| CorruptError::io(path, e))?;
        let meta = match fs::metadata(&path) {
            Ok(m) if m.is_file() => m,
            _ => return Err(CorruptError::precondition(&path, "file not existed or not a regular file")),
        };
        if meta.len() == 0 {
            return Err(CorruptError::precondition(&path, "file size = 0"));
        }
        if self.has_been_corrupted(&path)? {
            return Err(CorruptError::precondition(&path, "file already corrupted"));
        }
        let mtime = mtime_secs(&meta).map_err(|e| CorruptError::io(&path, e))?;

        let loc = self.resolver.resolve(&path)?;
        let extent = *loc.first_extent().ok_or_else(|| CorruptError::ExtentMap {
            path: path.clone(),
            detail: "no extents".into(),
        })?;
        let block = pick_target_block(&extent, &mut self.rng);
        debug!(?extent, target_block = block, "picked target block");
        if block == 0 {
            return Err(CorruptError::InvalidBlock { path });
        }

        let mut buf = self.device.read_block(&loc.device, block)?;
        let (original, modified) = flip_bit(&mut buf, TARGET_BYTE, TARGET_BIT)?;

        let mut record = CorruptionRecord {
            path: path.clone(),
            mtime,
            device: loc.device.clone(),
            block,
            offset: TARGET_BYTE,
            original,
            modified,
            state: RecordState::Staged,
            created_utc: Utc::now().to_rfc3339(),
        };
        self.store.insert(record.clone())?;

        self.audit.write_start(AuditOp::CorruptBit, &path, block);
        if let Err(e) = self.device.write_block(&loc.device, block, &buf) {
            self.audit.write_end(AuditOp::CorruptBit, false);
            error!("dd_write_data() CORRUPT_BIT fail: {e}");
            if let Err(se) = self.store.delete_by_filename(&path) {
                error!("staged record for {} left behind: {se}", path.display());
            }
            return Err(e);
        }
        self.audit.write_end(AuditOp::CorruptBit, true);
        warn!("Bit Inversion introduced to {}", path.display());
        info!("target_block = {block}, nth_byte = {TARGET_BYTE}, before/after: {original:#04x}/{modified:#04x}");

        // a failed commit leaves the record staged; recover() will find the
        // modified byte on disk and commit it
        self.store.mark_committed(&path)?;
        record.state = RecordState::Committed;
        self.audit.corrupt_record(&record);

        self.invalidate(&path);
        Ok(record)
    }

    /// Undo the recorded corruption of `path`, if there is one.
    pub fn revert(&mut self, path: &Path) -> CorruptResult<RevertOutcome> {
        let path = absolute_path(path).map_err(|e| CorruptError::io(path, e))?;
        let Some(rec) = self.store.get_by_filename(&path)? else {
            info!("'{}' record not found", path.display());
            return Ok(RevertOutcome::NotFound);
        };
        info!(
            "record: filename {}, record_disk {}, target_block {}, nth_byte {}, orig_value {:#04x}, modified_value {:#04x}",
            path.display(),
            rec.device,
            rec.block,
            rec.offset,
            rec.original,
            rec.modified
        );

        match fs::metadata(&path).and_then(|m| mtime_secs(&m)) {
            Ok(now) if now == rec.mtime => {}
            Ok(now) => warn!("mtime not match for {}: recorded {}, now {}", path.display(), rec.mtime, now),
            Err(e) => warn!("cannot read mtime of {}: {e}", path.display()),
        }

        if rec.block == 0 {
            return Err(CorruptError::InvalidBlock { path });
        }
        let mut buf = self.device.read_block(&rec.device, rec.block)?;

        if !rec.is_committed() && buf.get(rec.offset) == Some(&rec.original) {
            info!("'{}' staged corruption never reached the disk; dropping record", path.display());
            self.store.delete_by_filename(&path)?;
            return Ok(RevertOutcome::Reverted(rec));
        }

        restore_byte(&mut buf, rec.offset, rec.modified, rec.original, &path)?;

        self.audit.write_start(AuditOp::Revert, &path, rec.block);
        if let Err(e) = self.device.write_block(&rec.device, rec.block, &buf) {
            self.audit.write_end(AuditOp::Revert, false);
            error!("dd_write_data() REVERT fail: {e}");
            return Err(e);
        }
        self.audit.write_end(AuditOp::Revert, true);
        info!("'{}' reverted", path.display());
        info!(
            "target_block = {}, nth_byte = {}, before/after: {:#04x}/{:#04x}",
            rec.block, rec.offset, rec.modified, rec.original
        );

        self.invalidate(&path);
        self.store.delete_by_filename(&path)?;
        Ok(RevertOutcome::Reverted(rec))
    }

    /// Revert every stored record; one failure does not stop the rest.
    pub fn revert_all(&mut self) -> CorruptResult<RevertSummary> {
        let mut summary = RevertSummary::default();
        for rec in self.store.get_all()? {
            match self.revert(&rec.path) {
                Ok(RevertOutcome::Reverted(_)) => summary.reverted += 1,
                Ok(RevertOutcome::NotFound) => summary.not_found += 1,
                Err(e) => {
                    error!("revert of {} failed: {e}", rec.path.display());
                    summary.failed += 1;
                }
            }
        }
        Ok(summary)
    }

    /// Settle records left staged by an interrupted corruption by looking at
    /// what is actually on disk.
    pub fn recover(&mut self) -> CorruptResult<RecoverySummary> {
        let mut summary = RecoverySummary::default();
        for rec in self.store.get_all()?.into_iter().filter(|r| !r.is_committed()) {
            let on_disk = match self.device.read_block(&rec.device, rec.block) {
                Ok(buf) => buf.get(rec.offset).copied(),
                Err(e) => {
                    warn!("staged record for {} kept: {e}", rec.path.display());
                    summary.unresolved += 1;
                    continue;
                }
            };
            match on_disk {
                Some(b) if b == rec.modified => {
                    self.store.mark_committed(&rec.path)?;
                    let mut committed = rec.clone();
                    committed.state = RecordState::Committed;
                    self.audit.corrupt_record(&committed);
                    info!("recovered corruption of {}", rec.path.display());
                    summary.committed += 1;
                }
                Some(b) if b == rec.original => {
                    self.store.delete_by_filename(&rec.path)?;
                    info!("dropped staged record for {}; block unchanged", rec.path.display());
                    summary.dropped += 1;
                }
                other => {
                    warn!(
                        "staged record for {} kept: found {:?}, expected {:#04x} or {:#04x}",
                        rec.path.display(),
                        other,
                        rec.original,
                        rec.modified
                    );
                    summary.unresolved += 1;
                }
            }
        }
        Ok(summary)
    }

    fn invalidate(&self, path: &Path) {
        if let Err(e) = self.cache.drop_cache(path) {
            warn!("dropping cache of {} failed: {e}", path.display());
        }
    }
}
