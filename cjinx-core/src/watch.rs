//! Wait mode: block until a matching file has been written and closed.

use crate::engine::absolute_path;
use crate::error::{CorruptError, CorruptResult};
use crate::select::name_matcher;
use globset::GlobMatcher;
use notify::event::{AccessKind, AccessMode};
use notify::{Event, EventKind, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;
use tracing::{debug, info};

/// How often the wait loop checks its shutdown flag.
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Which arrivals count: name matches the pattern, and the file sits directly
/// in `dir` (or anywhere below it when recursive).
#[derive(Debug, Clone)]
pub struct ArrivalFilter {
    dir: PathBuf,
    matcher: GlobMatcher,
    recursive: bool,
}

impl ArrivalFilter {
    pub fn new(dir: &Path, pattern: &str, recursive: bool) -> CorruptResult<Self> {
        let dir = absolute_path(dir).map_err(|e| CorruptError::io(dir, e))?;
        if !dir.is_dir() {
            return Err(CorruptError::precondition(&dir, "directory does not exist"));
        }
        Ok(Self { dir, matcher: name_matcher(pattern)?, recursive })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn matches(&self, path: &Path) -> bool {
        let Some(name) = path.file_name() else {
            return false;
        };
        if !self.matcher.is_match(name) {
            return false;
        }
        if self.recursive {
            path.starts_with(&self.dir)
        } else {
            path.parent() == Some(self.dir.as_path())
        }
    }
}

fn is_close_write(kind: &EventKind) -> bool {
    matches!(kind, EventKind::Access(AccessKind::Close(AccessMode::Write)))
}

/// Block until a file accepted by `filter` is closed after writing. Returns
/// `None` once `shutdown` is set.
pub fn wait_for_arrival(filter: &ArrivalFilter, shutdown: &AtomicBool) -> CorruptResult<Option<PathBuf>> {
    let watch_err = |e: notify::Error| CorruptError::Watch {
        path: filter.dir.clone(),
        detail: e.to_string(),
    };
    let (tx, rx) = mpsc::channel::<notify::Result<Event>>();
    let mut watcher = notify::recommended_watcher(tx).map_err(watch_err)?;
    let mode = if filter.recursive { RecursiveMode::Recursive } else { RecursiveMode::NonRecursive };
    watcher.watch(&filter.dir, mode).map_err(watch_err)?;
    info!("waiting for file to arrive under {} ...", filter.dir.display());

    loop {
        if shutdown.load(Ordering::Relaxed) {
            info!("wait interrupted");
            return Ok(None);
        }
        match rx.recv_timeout(WAIT_POLL_INTERVAL) {
            Ok(Ok(event)) => {
                if !is_close_write(&event.kind) {
                    continue;
                }
                for path in event.paths {
                    debug!(path = %path.display(), "close_write");
                    if filter.matches(&path) {
                        return Ok(Some(path));
                    }
                }
            }
            Ok(Err(e)) => return Err(watch_err(e)),
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                return Err(CorruptError::Watch {
                    path: filter.dir.clone(),
                    detail: "watcher stopped".into(),
                })
            }
        }
    }
}
