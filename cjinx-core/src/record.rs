use serde::{Deserialize, Serialize};
use std::fs::Metadata;
use std::path::PathBuf;
use std::time::UNIX_EPOCH;

/// Whether the device write a record describes is known to have landed.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RecordState {
    /// Written before the device write; confirmed or dropped afterwards.
    Staged,
    #[default]
    Committed,
}

/// Everything needed to undo one corruption. Keyed by `path`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct CorruptionRecord {
    pub path: PathBuf,
    /// Modification time of the file when it was corrupted, seconds since the epoch.
    pub mtime: f64,
    pub device: String,
    pub block: u64,
    pub offset: usize,
    pub original: u8,
    pub modified: u8,
    #[serde(default)]
    pub state: RecordState,
    #[serde(default)]
    pub created_utc: String,
}

impl CorruptionRecord {
    pub fn is_committed(&self) -> bool {
        self.state == RecordState::Committed
    }

    /// The tuple written to the audit log. Log correlation tools extract the
    /// path as the text between the first pair of single quotes.
    pub fn audit_tuple(&self) -> String {
        format!(
            "('{}', {}, '{}', {}, {}, {}, {})",
            self.path.display(),
            self.mtime,
            self.device,
            self.block,
            self.offset,
            self.original,
            self.modified
        )
    }
}

/// `mtime` of `meta` as fractional seconds since the epoch.
pub fn mtime_secs(meta: &Metadata) -> std::io::Result<f64> {
    let modified = meta.modified()?;
    let since = modified
        .duration_since(UNIX_EPOCH)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    Ok(since.as_secs_f64())
}
