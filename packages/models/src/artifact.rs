//! Crash-safe artifact writes.
//!
//! Every stage decides whether to run by checking whether its output
//! already exists. For that check to be trustworthy an artifact must never
//! be observable half-written, so outputs are written to a temporary
//! sibling and renamed into place. External tools that write their own
//! outputs are pointed at a [`temp_sibling`] and guarded by a
//! [`UnitLock`] so that two concurrent retries of the same unit cannot
//! both produce it.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write as _};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Returns `true` if `path` is an existing, non-empty file.
#[must_use]
pub fn is_complete(path: &Path) -> bool {
    std::fs::metadata(path).is_ok_and(|meta| meta.is_file() && meta.len() > 0)
}

/// Unique temporary path next to `path` (same directory, so the final
/// rename stays on one filesystem).
///
/// The extension is kept last so that tools which pick an output format
/// from the file name still recognise it:
/// `clip/a.tif` becomes `clip/.a.<pid>.<seq>.tmp.tif`.
#[must_use]
pub fn temp_sibling(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map_or_else(|| "artifact".into(), |n| n.to_string_lossy().into_owned());
    let seq = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    let pid = std::process::id();
    let name = match path.extension() {
        Some(ext) => format!(".{stem}.{pid}.{seq}.tmp.{}", ext.to_string_lossy()),
        None => format!(".{stem}.{pid}.{seq}.tmp"),
    };
    path.with_file_name(name)
}

/// Moves a finished temporary file into its final place.
///
/// # Errors
///
/// Returns an I/O error if the rename fails; the temporary file is removed
/// in that case.
pub fn promote(temp: &Path, path: &Path) -> std::io::Result<()> {
    std::fs::rename(temp, path).inspect_err(|_| {
        let _ = std::fs::remove_file(temp);
    })
}

/// Writes `path` through a temporary sibling and renames it into place.
///
/// Parent directories are created as needed. On any error the temporary
/// file is removed and `path` is left untouched.
///
/// # Errors
///
/// Returns whatever the `write` closure returns, or an I/O error from
/// creating, syncing or renaming the file.
pub fn write_atomic<E, F>(path: &Path, write: F) -> Result<(), E>
where
    E: From<std::io::Error>,
    F: FnOnce(&mut BufWriter<File>) -> Result<(), E>,
{
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let temp = temp_sibling(path);
    match write_temp(&temp, write) {
        Ok(()) => Ok(promote(&temp, path)?),
        Err(e) => {
            let _ = std::fs::remove_file(&temp);
            Err(e)
        }
    }
}

fn write_temp<E, F>(temp: &Path, write: F) -> Result<(), E>
where
    E: From<std::io::Error>,
    F: FnOnce(&mut BufWriter<File>) -> Result<(), E>,
{
    let mut writer = BufWriter::new(File::create(temp)?);
    write(&mut writer)?;
    writer.flush()?;
    writer.get_ref().sync_all()?;
    Ok(())
}

/// Copies `from` to `to` through a temporary sibling.
///
/// # Errors
///
/// Returns an I/O error if the copy or rename fails.
pub fn copy_atomic(from: &Path, to: &Path) -> std::io::Result<()> {
    if let Some(parent) = to.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let temp = temp_sibling(to);
    if let Err(e) = std::fs::copy(from, &temp) {
        let _ = std::fs::remove_file(&temp);
        return Err(e);
    }
    promote(&temp, to)
}

/// Exclusive claim on producing one artifact, held as `<artifact>.lock`.
///
/// The lock file is created with `create_new`, so exactly one claimant
/// wins. It is removed when the guard is dropped.
#[derive(Debug)]
pub struct UnitLock {
    path: PathBuf,
}

impl UnitLock {
    /// Tries to claim `artifact`.
    ///
    /// Returns `Ok(None)` if another claimant currently holds the lock.
    ///
    /// # Errors
    ///
    /// Returns an I/O error for anything other than the lock already
    /// existing.
    pub fn try_acquire(artifact: &Path) -> std::io::Result<Option<Self>> {
        let mut name = artifact.as_os_str().to_owned();
        name.push(".lock");
        let path = PathBuf::from(name);

        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                let _ = writeln!(file, "{}", std::process::id());
                Ok(Some(Self { path }))
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(None),
            Err(e) => Err(e),
        }
    }
}

impl Drop for UnitLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

fn is_stale_claim(name: &str) -> bool {
    name.ends_with(".lock") || (name.starts_with('.') && name.contains(".tmp"))
}

/// Removes lock files and temporary siblings left under `dir` by an
/// interrupted run. Returns how many files were removed.
///
/// Only call this while no other claimant can be working under `dir`.
/// A missing `dir` is not an error.
///
/// # Errors
///
/// Returns an I/O error if a directory cannot be listed or a file cannot
/// be removed.
pub fn sweep_stale(dir: &Path) -> std::io::Result<usize> {
    if !dir.is_dir() {
        return Ok(0);
    }

    let mut removed = 0;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            removed += sweep_stale(&path)?;
        } else if is_stale_claim(&entry.file_name().to_string_lossy()) {
            std::fs::remove_file(&path)?;
            removed += 1;
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use super::*;

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "county_lights_artifact_{name}_{}",
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn write_atomic_creates_parents_and_content() {
        let dir = scratch("write");
        let path = dir.join("nested/out.txt");

        write_atomic::<std::io::Error, _>(&path, |w| w.write_all(b"hello")).unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello");
        assert!(is_complete(&path));
        let leftovers: Vec<_> = std::fs::read_dir(dir.join("nested"))
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().contains(".tmp"))
            .collect();
        assert!(leftovers.is_empty());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn failed_write_leaves_nothing() {
        let dir = scratch("fail");
        let path = dir.join("out.txt");

        let result = write_atomic::<std::io::Error, _>(&path, |w| {
            w.write_all(b"partial")?;
            Err(std::io::Error::other("boom"))
        });

        assert!(result.is_err());
        assert!(!path.exists());
        assert_eq!(std::fs::read_dir(&dir).unwrap().count(), 0);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn empty_file_is_not_complete() {
        let dir = scratch("empty");
        let path = dir.join("empty.tif");
        std::fs::write(&path, b"").unwrap();

        assert!(!is_complete(&path));
        assert!(!is_complete(&dir.join("missing.tif")));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn lock_is_exclusive_until_dropped() {
        let dir = scratch("lock");
        let artifact = dir.join("a.tif");

        let first = UnitLock::try_acquire(&artifact).unwrap();
        assert!(first.is_some());
        assert!(UnitLock::try_acquire(&artifact).unwrap().is_none());

        drop(first);
        assert!(UnitLock::try_acquire(&artifact).unwrap().is_some());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn sweep_removes_leftover_locks_and_temps_only() {
        let dir = scratch("sweep");
        let clip = dir.join("tile_h00v00/clip");
        std::fs::create_dir_all(&clip).unwrap();

        let artifact = clip.join("a_clip_filtered.tif");
        std::fs::write(&artifact, b"raster").unwrap();
        std::fs::write(clip.join("b_clip_filtered.tif.lock"), b"4242\n").unwrap();
        std::fs::write(temp_sibling(&clip.join("c_clip_filtered.tif")), b"half").unwrap();
        std::fs::write(dir.join("06001.geojson"), b"{}").unwrap();

        assert_eq!(sweep_stale(&dir).unwrap(), 2);

        let mut left: Vec<String> = std::fs::read_dir(&clip)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        left.sort();
        assert_eq!(left, vec!["a_clip_filtered.tif"]);
        assert!(dir.join("06001.geojson").exists());
        assert!(UnitLock::try_acquire(&clip.join("b_clip_filtered.tif")).unwrap().is_some());

        assert_eq!(sweep_stale(&dir.join("missing")).unwrap(), 0);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn temp_siblings_are_unique() {
        let path = Path::new("/data/out.csv");
        let a = temp_sibling(path);
        let b = temp_sibling(path);
        assert_ne!(a, b);
        assert_eq!(a.parent(), path.parent());
        assert_eq!(a.extension().and_then(|e| e.to_str()), Some("csv"));
    }
}
