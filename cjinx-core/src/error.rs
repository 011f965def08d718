use std::path::PathBuf;

/// Failures of the record store. Kept apart from [`CorruptError`] because the
/// store is also opened outside of an engine (listing, recovery).
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("record store I/O at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("record store {path}: bad JSON: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("record store {path} has format version {found}, expected {expected}")]
    Version { path: PathBuf, found: u32, expected: u32 },

    #[error("could not lock record store {path}: {source}")]
    Lock {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("a record for {0} already exists")]
    Duplicate(PathBuf),

    #[error("no record for {0}")]
    Missing(PathBuf),
}

/// Everything that can stop a corrupt or revert operation.
///
/// `PreconditionFailed`, `DeviceLookup`, `ExtentMap` and `InvalidBlock` are
/// raised before the device is touched. `DeviceWrite` during corruption drops
/// the staged record again, so no variant leaves a committed record without
/// the matching on-disk change.
#[derive(Debug, thiserror::Error)]
pub enum CorruptError {
    #[error("{path}: {reason}")]
    PreconditionFailed { path: PathBuf, reason: String },

    #[error("device lookup for {path} failed: {detail}")]
    DeviceLookup { path: PathBuf, detail: String },

    #[error("extent map for {path} failed: {detail}")]
    ExtentMap { path: PathBuf, detail: String },

    #[error("picked block 0 for {path}; refusing to touch the device")]
    InvalidBlock { path: PathBuf },

    #[error("reading block {block} of {device} failed: {detail}")]
    DeviceRead { device: String, block: u64, detail: String },

    #[error("writing block {block} of {device} failed: {detail}")]
    DeviceWrite { device: String, block: u64, detail: String },

    #[error("{path}: expected {expected:#04x} on disk, found {found:#04x}; not reverting")]
    IntegrityMismatch { path: PathBuf, expected: u8, found: u8 },

    #[error("byte offset {offset} bit {bit} outside a {len}-byte buffer")]
    OffsetOutOfRange { offset: usize, bit: u8, len: usize },

    #[error("watching {path} failed: {detail}")]
    Watch { path: PathBuf, detail: String },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl CorruptError {
    pub(crate) fn precondition(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::PreconditionFailed { path: path.into(), reason: reason.into() }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }

    /// True for refusals that never reach the device.
    pub fn is_precondition(&self) -> bool {
        matches!(self, Self::PreconditionFailed { .. })
    }
}

pub type CorruptResult<T> = std::result::Result<T, CorruptError>;
