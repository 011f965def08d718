//! Choosing which file gets corrupted.

use crate::engine::{absolute_path, Engine};
use crate::error::{CorruptError, CorruptResult};
use crate::record::CorruptionRecord;
use globset::{GlobBuilder, GlobMatcher};
use rand::seq::SliceRandom;
use rand::Rng;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

/// Weighted coin flipped once per invocation before corrupting anything.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbabilityGate {
    p: f64,
}

impl Default for ProbabilityGate {
    fn default() -> Self {
        Self { p: 1.0 }
    }
}

impl ProbabilityGate {
    /// `None`, NaN and values outside `[0, 1]` all mean "always".
    pub fn new(p: Option<f64>) -> Self {
        match p {
            None => Self::default(),
            Some(p) if (0.0..=1.0).contains(&p) => Self { p },
            Some(p) => {
                warn!("probability {p} outside [0, 1]; using 1.0");
                Self::default()
            }
        }
    }

    pub fn probability(&self) -> f64 {
        self.p
    }

    pub fn roll<R: Rng>(&self, rng: &mut R) -> bool {
        rng.gen::<f64>() < self.p
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    Corrupted(CorruptionRecord),
    NoCandidates,
}

/// Compile a file-name pattern (`*.bin`, `part-??.dat`).
pub fn name_matcher(pattern: &str) -> CorruptResult<GlobMatcher> {
    let glob = GlobBuilder::new(pattern)
        .literal_separator(true)
        .build()
        .map_err(|e| CorruptError::precondition(pattern, format!("bad file pattern: {e}")))?;
    Ok(glob.compile_matcher())
}

/// Files under `dir` whose name matches `pattern`, excluding empty files and
/// files that already carry a record. Sorted for stable output.
pub fn collect_candidates(
    engine: &Engine,
    dir: &Path,
    pattern: &str,
    recursive: bool,
) -> CorruptResult<Vec<PathBuf>> {
    let dir = absolute_path(dir).map_err(|e| CorruptError::io(dir, e))?;
    if !dir.is_dir() {
        return Err(CorruptError::precondition(&dir, "directory does not exist"));
    }
    let matcher = name_matcher(pattern)?;
    info!("filename pattern = {pattern}");
    info!("recursive = {recursive}");

    let walker = WalkDir::new(&dir).min_depth(1).max_depth(if recursive { usize::MAX } else { 1 });
    let mut files = vec![];
    for ent in walker {
        let ent = match ent {
            Ok(ent) => ent,
            Err(e) => {
                warn!("skipping unreadable entry under {}: {e}", dir.display());
                continue;
            }
        };
        if !ent.file_type().is_file() {
            continue;
        }
        if !matcher.is_match(ent.file_name()) {
            continue;
        }
        let size = match ent.metadata() {
            Ok(m) => m.len(),
            Err(e) => {
                warn!("skipping {}: {e}", ent.path().display());
                continue;
            }
        };
        if size == 0 || engine.has_been_corrupted(ent.path())? {
            continue;
        }
        files.push(ent.path().to_path_buf());
    }
    files.sort();
    Ok(files)
}

/// Corrupt one eligible file under `dir`, chosen uniformly at random.
pub fn corrupt_from_directory(
    engine: &mut Engine,
    dir: &Path,
    pattern: &str,
    recursive: bool,
) -> CorruptResult<Selection> {
    let files = collect_candidates(engine, dir, pattern, recursive)?;
    let Some(victim) = files.choose(engine.rng_mut()).cloned() else {
        info!("no file to corrupt");
        return Ok(Selection::NoCandidates);
    };
    info!("files count = {}", files.len());
    info!("pick a victim: {}", victim.display());
    engine.corrupt(&victim).map(Selection::Corrupted)
}

/// Corrupt each listed file; every file gets its own result.
pub fn corrupt_files(
    engine: &mut Engine,
    files: &[PathBuf],
) -> Vec<(PathBuf, CorruptResult<CorruptionRecord>)> {
    files
        .iter()
        .map(|f| {
            let res = engine.corrupt(f);
            if let Err(e) = &res {
                if e.is_precondition() {
                    warn!("{e}");
                } else {
                    warn!("corrupting {} failed: {e}", f.display());
                }
            }
            (f.clone(), res)
        })
        .collect()
}
