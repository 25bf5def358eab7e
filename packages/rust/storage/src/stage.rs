//! Stage directory operations.
//!
//! Every file an agent publishes is first written under a hidden name
//! (leading `.`) and then renamed into place. Listings skip hidden names, so
//! readers only ever see complete files. Inputs are claimed the same way: a
//! rename to `.claim-<run id>-<name>` hides the file from every other runner.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use uuid::Uuid;

use khive_shared::{KhiveError, Result};

/// Prefix of claimed input files.
const CLAIM_PREFIX: &str = ".claim-";

// ---------------------------------------------------------------------------
// Bootstrap & listing
// ---------------------------------------------------------------------------

/// Create every directory that does not exist yet. Safe to call repeatedly.
pub fn bootstrap<P: AsRef<Path>>(dirs: &[P]) -> Result<()> {
    for dir in dirs {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir).map_err(|e| KhiveError::io(dir, e))?;
    }
    Ok(())
}

/// File name filter used by listings and transfers.
///
/// `*` matches any run of characters. A pattern without `*` matches any name
/// containing it, so `MANIFEST` and `*MANIFEST*` are equivalent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePattern {
    pattern: String,
}

impl FilePattern {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
        }
    }

    /// Match every file.
    pub fn any() -> Self {
        Self::new("*")
    }

    pub fn as_str(&self) -> &str {
        &self.pattern
    }

    pub fn matches(&self, name: &str) -> bool {
        if !self.pattern.contains('*') {
            return name.contains(self.pattern.as_str());
        }

        let parts: Vec<&str> = self.pattern.split('*').collect();
        let first = parts[0];
        let last = parts[parts.len() - 1];

        let Some(mut rest) = name.strip_prefix(first) else {
            return false;
        };
        for middle in &parts[1..parts.len() - 1] {
            match rest.find(middle) {
                Some(idx) => rest = &rest[idx + middle.len()..],
                None => return false,
            }
        }
        rest.ends_with(last)
    }
}

impl std::fmt::Display for FilePattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.pattern)
    }
}

fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

/// Regular, non-hidden files in `dir` matching `pattern`, sorted by name.
/// A missing directory lists as empty.
pub fn list_files(dir: &Path, pattern: &FilePattern) -> Result<Vec<PathBuf>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(KhiveError::io(dir, e)),
    };

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| KhiveError::io(dir, e))?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if is_hidden(name) || !pattern.matches(name) {
            continue;
        }
        let file_type = entry.file_type().map_err(|e| KhiveError::io(entry.path(), e))?;
        if file_type.is_file() {
            files.push(entry.path());
        }
    }

    files.sort();
    Ok(files)
}

/// The lexicographically last file matching `pattern`.
pub fn latest(dir: &Path, pattern: &FilePattern) -> Result<Option<PathBuf>> {
    Ok(list_files(dir, pattern)?.pop())
}

// ---------------------------------------------------------------------------
// Atomic writes
// ---------------------------------------------------------------------------

fn temp_path_for(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    target.with_file_name(format!(".{name}.tmp"))
}

/// Write `bytes` to a hidden temp file next to `path`, then rename it into place.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let temp = temp_path_for(path);

    std::fs::write(&temp, bytes).map_err(|e| KhiveError::io(&temp, e))?;

    if let Err(e) = std::fs::rename(&temp, path) {
        let _ = std::fs::remove_file(&temp);
        return Err(KhiveError::io(path, e));
    }

    debug!(path = %path.display(), size = bytes.len(), "published file");
    Ok(())
}

/// Pretty-printed JSON through [`write_atomic`].
pub fn write_json_atomic<T: Serialize>(path: &Path, data: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| KhiveError::validation(format!("JSON serialization failed: {e}")))?;
    write_atomic(path, json.as_bytes())
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path).map_err(|e| KhiveError::io(path, e))?;
    serde_json::from_str(&content)
        .map_err(|e| KhiveError::parse(format!("invalid {}: {e}", path.display())))
}

// ---------------------------------------------------------------------------
// Moving, copying, cleaning
// ---------------------------------------------------------------------------

/// First free name in `dir`: `name`, then `stem(1).ext`, `stem(2).ext`, ...
pub fn unique_name(dir: &Path, name: &str) -> PathBuf {
    let candidate = dir.join(name);
    if !candidate.exists() {
        return candidate;
    }

    let (stem, ext) = match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
        _ => (name, None),
    };

    let mut n = 1u32;
    loop {
        let next = match ext {
            Some(ext) => format!("{stem}({n}).{ext}"),
            None => format!("{stem}({n})"),
        };
        let candidate = dir.join(next);
        if !candidate.exists() {
            return candidate;
        }
        n += 1;
    }
}

/// Rename `src` to `dst`. Across filesystems, copy to a hidden temp next to
/// `dst`, rename it into place, then delete `src`.
pub fn move_file(src: &Path, dst: &Path) -> Result<()> {
    match std::fs::rename(src, dst) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::CrossesDevices => {
            debug!(src = %src.display(), dst = %dst.display(), "cross-device move, copying");
            let temp = temp_path_for(dst);
            std::fs::copy(src, &temp).map_err(|e| KhiveError::io(&temp, e))?;
            if let Err(e) = std::fs::rename(&temp, dst) {
                let _ = std::fs::remove_file(&temp);
                return Err(KhiveError::io(dst, e));
            }
            std::fs::remove_file(src).map_err(|e| KhiveError::io(src, e))
        }
        Err(e) => Err(KhiveError::io(src, e)),
    }
}

/// Copy every matching file from `src` into `dst`, publishing each atomically.
/// Returns the number of files copied; a missing `src` copies nothing.
pub fn copy_files(src: &Path, dst: &Path, pattern: &FilePattern) -> Result<usize> {
    let files = list_files(src, pattern)?;
    if files.is_empty() {
        return Ok(0);
    }

    std::fs::create_dir_all(dst).map_err(|e| KhiveError::io(dst, e))?;

    for file in &files {
        let Some(name) = file.file_name() else {
            continue;
        };
        let target = dst.join(name);
        let temp = temp_path_for(&target);
        std::fs::copy(file, &temp).map_err(|e| KhiveError::io(&temp, e))?;
        if let Err(e) = std::fs::rename(&temp, &target) {
            let _ = std::fs::remove_file(&temp);
            return Err(KhiveError::io(&target, e));
        }
    }

    debug!(
        src = %src.display(),
        dst = %dst.display(),
        pattern = %pattern,
        count = files.len(),
        "copied files"
    );
    Ok(files.len())
}

/// Move every matching file from `src` into `dst`. Each file is claimed
/// first, so two runners never take the same one. Returns the number moved;
/// a missing `src` moves nothing.
pub fn move_files(src: &Path, dst: &Path, pattern: &FilePattern, run_id: &str) -> Result<usize> {
    let files = list_files(src, pattern)?;
    if files.is_empty() {
        return Ok(0);
    }

    let mut moved = 0;
    for file in &files {
        if let Some(claim) = Claim::acquire(file, run_id)? {
            claim.finish_into(dst)?;
            moved += 1;
        }
    }

    debug!(
        src = %src.display(),
        dst = %dst.display(),
        pattern = %pattern,
        count = moved,
        "moved files"
    );
    Ok(moved)
}

/// Remove everything inside `dir`, keeping (or recreating) the directory.
/// Returns the number of entries removed.
pub fn clean_dir(dir: &Path) -> Result<usize> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            std::fs::create_dir_all(dir).map_err(|e| KhiveError::io(dir, e))?;
            return Ok(0);
        }
        Err(e) => return Err(KhiveError::io(dir, e)),
    };

    let mut removed = 0;
    for entry in entries {
        let entry = entry.map_err(|e| KhiveError::io(dir, e))?;
        let path = entry.path();
        let file_type = entry.file_type().map_err(|e| KhiveError::io(&path, e))?;
        let result = if file_type.is_dir() {
            std::fs::remove_dir_all(&path)
        } else {
            std::fs::remove_file(&path)
        };
        match result {
            Ok(()) => removed += 1,
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(KhiveError::io(&path, e)),
        }
    }

    Ok(removed)
}

/// Remove leftover claim and temp files from `dir`, leaving everything else.
pub fn sweep_hidden(dir: &Path) -> Result<usize> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(KhiveError::io(dir, e)),
    };

    let mut removed = 0;
    for entry in entries {
        let entry = entry.map_err(|e| KhiveError::io(dir, e))?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        let leftover = name.starts_with(CLAIM_PREFIX)
            || (is_hidden(&name) && (name.ends_with(".tmp") || name.contains(".part.")));
        if leftover && entry.path().is_file() {
            std::fs::remove_file(entry.path()).map_err(|e| KhiveError::io(entry.path(), e))?;
            removed += 1;
        }
    }
    Ok(removed)
}

// ---------------------------------------------------------------------------
// Claims
// ---------------------------------------------------------------------------

/// Exclusive ownership of an input file, held as a hidden rename.
///
/// A claim must end with [`Claim::finish_into`], [`Claim::consume`] or
/// [`Claim::release`]. A claim abandoned by a crashed agent stays hidden until
/// [`recover_stale_claims`] puts it back or the next clean removes it.
#[derive(Debug)]
#[must_use = "a claim hides its file until it is finished, consumed or released"]
pub struct Claim {
    original: PathBuf,
    claimed: PathBuf,
    name: String,
}

impl Claim {
    /// Try to take `path`. Returns `None` when another runner got there first.
    pub fn acquire(path: &Path, run_id: &str) -> Result<Option<Self>> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| KhiveError::validation(format!("not a file: {}", path.display())))?
            .to_string();
        let claimed = path.with_file_name(format!("{CLAIM_PREFIX}{run_id}-{name}"));

        match std::fs::rename(path, &claimed) {
            Ok(()) => {
                debug!(file = %name, "claimed input");
                Ok(Some(Self {
                    original: path.to_path_buf(),
                    claimed,
                    name,
                }))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(file = %name, "input already claimed elsewhere");
                Ok(None)
            }
            Err(e) => Err(KhiveError::io(path, e)),
        }
    }

    /// Current (hidden) location of the claimed file.
    pub fn path(&self) -> &Path {
        &self.claimed
    }

    /// Original file name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Move the file into `dir` under its original name (or the first free
    /// variant of it). Returns the final path.
    pub fn finish_into(self, dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir).map_err(|e| KhiveError::io(dir, e))?;
        let target = unique_name(dir, &self.name);
        move_file(&self.claimed, &target)?;
        Ok(target)
    }

    /// Delete the claimed file.
    pub fn consume(self) -> Result<()> {
        std::fs::remove_file(&self.claimed).map_err(|e| KhiveError::io(&self.claimed, e))
    }

    /// Put the file back where it was found.
    pub fn release(self) -> Result<()> {
        let target = match self.original.parent() {
            Some(parent) if self.original.exists() => {
                warn!(file = %self.name, "input reappeared while claimed, releasing under new name");
                unique_name(parent, &self.name)
            }
            _ => self.original.clone(),
        };
        std::fs::rename(&self.claimed, &target).map_err(|e| KhiveError::io(&target, e))
    }
}

/// Put back the files claimed in `dir` by runs older than `max_age`.
///
/// The run id in a claim name is a v7 uuid, so its age is known without
/// touching the file. A claim whose run id does not parse counts as stale.
/// Returns the restored paths.
pub fn recover_stale_claims(dir: &Path, max_age: Duration) -> Result<Vec<PathBuf>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(KhiveError::io(dir, e)),
    };
    let cutoff = SystemTime::now().checked_sub(max_age).unwrap_or(UNIX_EPOCH);

    let mut restored = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| KhiveError::io(dir, e))?;
        let file_name = entry.file_name();
        let Some((run_id, name)) = file_name
            .to_str()
            .and_then(|n| n.strip_prefix(CLAIM_PREFIX))
            .and_then(|rest| rest.split_once('-'))
        else {
            continue;
        };
        if name.is_empty() || !entry.path().is_file() {
            continue;
        }
        if claimed_at(run_id).is_some_and(|at| at >= cutoff) {
            continue;
        }

        let target = unique_name(dir, name);
        match std::fs::rename(entry.path(), &target) {
            Ok(()) => {
                warn!(file = %name, run = %run_id, "released stale claim");
                restored.push(target);
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(KhiveError::io(entry.path(), e)),
        }
    }
    restored.sort();
    Ok(restored)
}

fn claimed_at(run_id: &str) -> Option<SystemTime> {
    let (secs, nanos) = Uuid::parse_str(run_id).ok()?.get_timestamp()?.to_unix();
    UNIX_EPOCH.checked_add(Duration::new(secs, nanos))
}
