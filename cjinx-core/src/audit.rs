//! Plain-text, append-only trail of corruption events (`cj.log`).
//!
//! Separate from the tracing output: this file is read by log correlation
//! tooling, so its line format is fixed.

use crate::record::CorruptionRecord;
use chrono::Local;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;
use tracing::warn;

/// File name of the audit log inside the configured log directory.
pub const AUDIT_LOG_NAME: &str = "cj.log";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditOp {
    CorruptBit,
    Revert,
}

impl AuditOp {
    fn as_str(self) -> &'static str {
        match self {
            AuditOp::CorruptBit => "CORRUPT_BIT",
            AuditOp::Revert => "REVERT",
        }
    }
}

pub struct AuditLog {
    sink: Box<dyn Write + Send>,
}

impl AuditLog {
    /// Append to `path`, creating it if needed.
    pub fn open(path: &Path) -> io::Result<Self> {
        let f = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self { sink: Box::new(f) })
    }

    pub fn to_writer(w: impl Write + Send + 'static) -> Self {
        Self { sink: Box::new(w) }
    }

    pub fn disabled() -> Self {
        Self { sink: Box::new(io::sink()) }
    }

    fn line(&mut self, msg: &str) {
        let stamp = Local::now().format("%Y-%m-%d %H:%M:%S,%3f");
        let res = writeln!(self.sink, "{stamp} {msg}").and_then(|_| self.sink.flush());
        if let Err(e) = res {
            warn!("audit log write failed: {e}");
        }
    }

    pub fn write_start(&mut self, op: AuditOp, path: &Path, block: u64) {
        self.line(&format!("{} START filename = {}, target_block = {}", op.as_str(), path.display(), block));
    }

    pub fn write_end(&mut self, op: AuditOp, ok: bool) {
        self.line(&format!("{} END {}", op.as_str(), if ok { "success" } else { "fail" }));
    }

    pub fn corrupt_record(&mut self, rec: &CorruptionRecord) {
        self.line(&format!("CORRUPT record: {}", rec.audit_tuple()));
    }
}
