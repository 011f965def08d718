//! Persistence of corruption records, keyed by absolute file path.

use crate::error::StoreError;
use crate::record::{CorruptionRecord, RecordState};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

pub trait RecordStore {
    fn create_schema_if_missing(&mut self) -> StoreResult<()>;
    /// Fails with [`StoreError::Duplicate`] if the path already has a record.
    fn insert(&mut self, record: CorruptionRecord) -> StoreResult<()>;
    fn get_by_filename(&self, path: &Path) -> StoreResult<Option<CorruptionRecord>>;
    fn get_all(&self) -> StoreResult<Vec<CorruptionRecord>>;
    /// Returns whether a record was removed.
    fn delete_by_filename(&mut self, path: &Path) -> StoreResult<bool>;
    fn mark_committed(&mut self, path: &Path) -> StoreResult<()>;
}

const STORE_VERSION: u32 = 1;

#[derive(Serialize, Deserialize, Debug)]
struct StoreDoc {
    version: u32,
    records: Vec<CorruptionRecord>,
}

impl Default for StoreDoc {
    fn default() -> Self {
        Self { version: STORE_VERSION, records: Vec::new() }
    }
}

fn insert_into(records: &mut Vec<CorruptionRecord>, record: CorruptionRecord) -> StoreResult<()> {
    if records.iter().any(|r| r.path == record.path) {
        return Err(StoreError::Duplicate(record.path));
    }
    records.push(record);
    Ok(())
}

fn commit_in(records: &mut [CorruptionRecord], path: &Path) -> StoreResult<()> {
    let rec = records
        .iter_mut()
        .find(|r| r.path == path)
        .ok_or_else(|| StoreError::Missing(path.to_path_buf()))?;
    rec.state = RecordState::Committed;
    Ok(())
}

/// Records in one JSON document. Every mutation holds an exclusive lock on
/// `<file>.lock` and replaces the document through a renamed temp file.
#[derive(Debug, Clone)]
pub struct JsonRecordStore {
    path: PathBuf,
    lock_path: PathBuf,
}

impl JsonRecordStore {
    /// Open (and create if needed) the store at `path`.
    pub fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();
        let mut lock_name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        lock_name.push(".lock");
        let lock_path = path.with_file_name(lock_name);
        let mut store = Self { path, lock_path };
        store.create_schema_if_missing()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_err(&self, source: std::io::Error) -> StoreError {
        StoreError::Io { path: self.path.clone(), source }
    }

    fn lock(&self, exclusive: bool) -> StoreResult<File> {
        let f = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&self.lock_path)
            .map_err(|source| StoreError::Lock { path: self.lock_path.clone(), source })?;
        let locked = if exclusive { FileExt::lock_exclusive(&f) } else { FileExt::lock_shared(&f) };
        locked.map_err(|source| StoreError::Lock { path: self.lock_path.clone(), source })?;
        Ok(f)
    }

    fn read_doc(&self) -> StoreResult<StoreDoc> {
        let bytes = match fs::read(&self.path) {
            Ok(b) => b,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(StoreDoc::default()),
            Err(e) => return Err(self.io_err(e)),
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(StoreDoc::default());
        }
        let doc: StoreDoc = serde_json::from_slice(&bytes)
            .map_err(|source| StoreError::Json { path: self.path.clone(), source })?;
        if doc.version != STORE_VERSION {
            return Err(StoreError::Version {
                path: self.path.clone(),
                found: doc.version,
                expected: STORE_VERSION,
            });
        }
        Ok(doc)
    }

    fn write_doc(&self, doc: &StoreDoc) -> StoreResult<()> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| self.io_err(e))?;
        let json = serde_json::to_vec_pretty(doc)
            .map_err(|source| StoreError::Json { path: self.path.clone(), source })?;
        tmp.write_all(&json).map_err(|e| self.io_err(e))?;
        tmp.as_file().sync_all().map_err(|e| self.io_err(e))?;
        tmp.persist(&self.path).map_err(|e| self.io_err(e.error))?;
        debug!(path = %self.path.display(), records = doc.records.len(), "record store written");
        Ok(())
    }

    fn mutate<T>(&self, f: impl FnOnce(&mut Vec<CorruptionRecord>) -> StoreResult<T>) -> StoreResult<T> {
        let _guard = self.lock(true)?;
        let mut doc = self.read_doc()?;
        let out = f(&mut doc.records)?;
        self.write_doc(&doc)?;
        Ok(out)
    }
}

impl RecordStore for JsonRecordStore {
    fn create_schema_if_missing(&mut self) -> StoreResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| self.io_err(e))?;
            }
        }
        let _guard = self.lock(true)?;
        if !self.path.exists() {
            self.write_doc(&StoreDoc::default())?;
        }
        Ok(())
    }

    fn insert(&mut self, record: CorruptionRecord) -> StoreResult<()> {
        self.mutate(|records| insert_into(records, record))
    }

    fn get_by_filename(&self, path: &Path) -> StoreResult<Option<CorruptionRecord>> {
        let _guard = self.lock(false)?;
        Ok(self.read_doc()?.records.into_iter().find(|r| r.path == path))
    }

    fn get_all(&self) -> StoreResult<Vec<CorruptionRecord>> {
        let _guard = self.lock(false)?;
        Ok(self.read_doc()?.records)
    }

    fn delete_by_filename(&mut self, path: &Path) -> StoreResult<bool> {
        self.mutate(|records| {
            let before = records.len();
            records.retain(|r| r.path != path);
            Ok(records.len() != before)
        })
    }

    fn mark_committed(&mut self, path: &Path) -> StoreResult<()> {
        self.mutate(|records| commit_in(records, path))
    }
}

/// Store that lives only as long as the process.
#[derive(Debug, Clone, Default)]
pub struct MemoryRecordStore {
    records: Vec<CorruptionRecord>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: Vec<CorruptionRecord>) -> Self {
        Self { records }
    }
}

impl RecordStore for MemoryRecordStore {
    fn create_schema_if_missing(&mut self) -> StoreResult<()> {
        Ok(())
    }

    fn insert(&mut self, record: CorruptionRecord) -> StoreResult<()> {
        insert_into(&mut self.records, record)
    }

    fn get_by_filename(&self, path: &Path) -> StoreResult<Option<CorruptionRecord>> {
        Ok(self.records.iter().find(|r| r.path == path).cloned())
    }

    fn get_all(&self) -> StoreResult<Vec<CorruptionRecord>> {
        Ok(self.records.clone())
    }

    fn delete_by_filename(&mut self, path: &Path) -> StoreResult<bool> {
        let before = self.records.len();
        self.records.retain(|r| r.path != path);
        Ok(self.records.len() != before)
    }

    fn mark_committed(&mut self, path: &Path) -> StoreResult<()> {
        commit_in(&mut self.records, path)
    }
}
