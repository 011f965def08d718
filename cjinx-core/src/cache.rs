use crate::command;
use crate::error::{CorruptError, CorruptResult};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

/// Drops a file's cached pages after its blocks were changed underneath it.
pub trait CacheInvalidator {
    fn drop_cache(&self, path: &Path) -> CorruptResult<()>;
}

impl<T: CacheInvalidator + ?Sized> CacheInvalidator for Box<T> {
    fn drop_cache(&self, path: &Path) -> CorruptResult<()> {
        (**self).drop_cache(path)
    }
}

/// `fsync` the file, then let `dd oflag=nocache` discard its pages.
#[derive(Debug, Clone)]
pub struct DdCacheInvalidator {
    dd: String,
}

impl Default for DdCacheInvalidator {
    fn default() -> Self {
        Self { dd: "dd".into() }
    }
}

impl CacheInvalidator for DdCacheInvalidator {
    fn drop_cache(&self, path: &Path) -> CorruptResult<()> {
        // the nocache hint only discards clean pages, so flush first
        let f = OpenOptions::new().read(true).write(true).open(path).map_err(|e| CorruptError::io(path, e))?;
        f.sync_all().map_err(|e| CorruptError::io(path, e))?;
        drop(f);

        let args = [
            format!("of={}", path.display()),
            "oflag=nocache".to_string(),
            "conv=notrunc,fdatasync".to_string(),
            "count=0".to_string(),
        ];
        command::run_checked(&self.dd, &args).map_err(|detail| {
            CorruptError::io(path, std::io::Error::new(std::io::ErrorKind::Other, detail))
        })?;
        Ok(())
    }
}

/// Does nothing; used when cache dropping is disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCache;

impl CacheInvalidator for NoopCache {
    fn drop_cache(&self, _path: &Path) -> CorruptResult<()> {
        Ok(())
    }
}

/// Remembers every path it was asked to drop; can be told to fail.
#[derive(Debug, Clone, Default)]
pub struct RecordingCache {
    dropped: Arc<Mutex<Vec<PathBuf>>>,
    fail: Arc<Mutex<bool>>,
}

impl RecordingCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail(&self, fail: bool) {
        *self.fail.lock().unwrap_or_else(PoisonError::into_inner) = fail;
    }

    pub fn dropped(&self) -> Vec<PathBuf> {
        self.dropped.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl CacheInvalidator for RecordingCache {
    fn drop_cache(&self, path: &Path) -> CorruptResult<()> {
        self.dropped.lock().unwrap_or_else(PoisonError::into_inner).push(path.to_path_buf());
        if *self.fail.lock().unwrap_or_else(PoisonError::into_inner) {
            return Err(CorruptError::io(
                path,
                std::io::Error::new(std::io::ErrorKind::Other, "injected cache drop failure"),
            ));
        }
        Ok(())
    }
}
