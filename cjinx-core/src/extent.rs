//! Mapping a file to the device and physical blocks that back it.
//!
//! The production resolver asks `df` for the mount and `filefrag` for the
//! extent map, both in units of [`BLOCK_SIZE`](crate::device::BLOCK_SIZE).

use crate::command;
use crate::error::{CorruptError, CorruptResult};
use std::collections::HashMap;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Lines of `filefrag -e` output that are not extents: the filesystem type,
/// the file size, the column header and the trailing summary.
pub const FILEFRAG_EXTRA_LINES: usize = 4;

/// A contiguous run of physical blocks backing part of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Extent {
    pub index: usize,
    pub logical_start: u64,
    pub logical_end: u64,
    pub begin: u64,
    pub end: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileLocation {
    pub device: String,
    pub fs_type: String,
    pub extents: Vec<Extent>,
}

impl FileLocation {
    /// Extent 0; resolution guarantees it exists.
    pub fn first_extent(&self) -> Option<&Extent> {
        self.extents.first()
    }
}

pub trait ExtentResolver {
    fn resolve(&self, path: &Path) -> CorruptResult<FileLocation>;
}

/// Resolver that shells out to `df` and `filefrag`.
#[derive(Debug, Clone)]
pub struct CommandResolver {
    pub df: String,
    pub filefrag: String,
}

impl Default for CommandResolver {
    fn default() -> Self {
        Self { df: "df".into(), filefrag: "/usr/sbin/filefrag".into() }
    }
}

impl ExtentResolver for CommandResolver {
    fn resolve(&self, path: &Path) -> CorruptResult<FileLocation> {
        let path_arg = path.as_os_str();
        let df_out = command::run_checked(&self.df, [OsStr::new("-P"), OsStr::new("-T"), path_arg])
            .map_err(|detail| CorruptError::DeviceLookup { path: path.to_path_buf(), detail })?;
        let (device, fs_type) = parse_df_output(&df_out).map_err(|detail| {
            CorruptError::DeviceLookup { path: path.to_path_buf(), detail }
        })?;
        info!(disk = %device, fs_type = %fs_type, "resolved backing device");

        let frag_out = command::run_checked(
            &self.filefrag,
            [OsStr::new("-b4096"), OsStr::new("-s"), OsStr::new("-e"), path_arg],
        )
        .map_err(|detail| CorruptError::ExtentMap { path: path.to_path_buf(), detail })?;
        let extents = parse_filefrag_output(&frag_out)
            .map_err(|detail| CorruptError::ExtentMap { path: path.to_path_buf(), detail })?;

        Ok(FileLocation { device, fs_type, extents })
    }
}

/// Parse `df -P -T` output into `(device, fs_type)`.
///
/// ```text
/// Filesystem              Type  1024-blocks  Used Available Capacity Mounted on
/// /dev/mapper/centos-root xfs      17811456 1826880  15984576      11% /
/// ```
pub fn parse_df_output(output: &str) -> Result<(String, String), String> {
    let lines: Vec<&str> = output.lines().collect();
    if lines.len() < 2 || !lines[0].trim().starts_with("Filesystem") {
        return Err("unexpected df output".into());
    }
    let mut fields = lines[1].split_whitespace();
    match (fields.next(), fields.next()) {
        (Some(device), Some(fs_type)) => Ok((device.to_string(), fs_type.to_string())),
        _ => Err("unexpected df output".into()),
    }
}

/// Parse `filefrag -b4096 -s -e` output.
///
/// ```text
/// Filesystem type is: 58465342
/// File size of /tmp/testfile.txt is 10485760 (2560 blocks of 4096 bytes)
///  ext:     logical_offset:        physical_offset: length:   expected: flags:
///    0:        0..    2559:    1244591..   1247150:   2560:             eof
/// /tmp/testfile.txt: 1 extent found
/// ```
pub fn parse_filefrag_output(output: &str) -> Result<Vec<Extent>, String> {
    let lines: Vec<&str> = output.lines().collect();
    let count = lines.len().saturating_sub(FILEFRAG_EXTRA_LINES);
    if count == 0 {
        return Err("unexpected filefrag output".into());
    }
    let mut extents = Vec::with_capacity(count);
    for (i, line) in lines[3..3 + count].iter().enumerate() {
        let ext = parse_extent_line(line)
            .ok_or_else(|| format!("unexpected filefrag output: {:?}", line.trim()))?;
        debug!(ext = ext.index, begin = ext.begin, end = ext.end, "extent");
        if ext.index != i {
            return Err(format!("extent numbering not contiguous: found {} at {}", ext.index, i));
        }
        if ext.begin == 0 || ext.end == 0 {
            return Err(format!("extent {} reports physical block 0", i));
        }
        extents.push(ext);
    }
    Ok(extents)
}

fn parse_extent_line(line: &str) -> Option<Extent> {
    let mut fields = line.split(':').map(str::trim);
    let index = fields.next()?.parse().ok()?;
    let (logical_start, logical_end) = parse_range(fields.next()?)?;
    let (begin, end) = parse_range(fields.next()?)?;
    Some(Extent { index, logical_start, logical_end, begin, end })
}

fn parse_range(s: &str) -> Option<(u64, u64)> {
    let (a, b) = s.split_once("..")?;
    Some((a.trim().parse().ok()?, b.trim().parse().ok()?))
}

/// Resolver with fixed answers, for driving the engine without real devices.
/// Extents are handed out as given, block 0 included.
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    map: HashMap<PathBuf, FileLocation>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, path: impl Into<PathBuf>, device: &str, extents: &[(u64, u64)]) -> Self {
        self.insert(path, device, extents);
        self
    }

    pub fn insert(&mut self, path: impl Into<PathBuf>, device: &str, extents: &[(u64, u64)]) {
        let mut logical = 0u64;
        let extents = extents
            .iter()
            .enumerate()
            .map(|(index, &(begin, end))| {
                let len = end.saturating_sub(begin) + 1;
                let e = Extent { index, logical_start: logical, logical_end: logical + len - 1, begin, end };
                logical += len;
                e
            })
            .collect();
        self.map.insert(
            path.into(),
            FileLocation { device: device.to_string(), fs_type: "memory".into(), extents },
        );
    }
}

impl ExtentResolver for StaticResolver {
    fn resolve(&self, path: &Path) -> CorruptResult<FileLocation> {
        let loc = self.map.get(path).cloned().ok_or_else(|| CorruptError::DeviceLookup {
            path: path.to_path_buf(),
            detail: "no mount known for path".into(),
        })?;
        if loc.extents.is_empty() {
            return Err(CorruptError::ExtentMap {
                path: path.to_path_buf(),
                detail: "no extents".into(),
            });
        }
        Ok(loc)
    }
}
