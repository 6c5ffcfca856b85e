//! Append-only record of completed counties.

use std::collections::BTreeSet;
use std::fs::OpenOptions;
use std::io::{Read as _, Seek as _, SeekFrom, Write as _};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use county_lights_models::CountyCode;

use crate::PipelineError;

/// One county code per line in a text file.
///
/// The file is read once at start and only ever appended to. A county
/// listed here is skipped by later runs even if its outputs were removed;
/// delete its line to redo it.
pub struct ProgressStore {
    path: PathBuf,
    append: Mutex<()>,
}

impl ProgressStore {
    /// Creates a store backed by `path`. The file need not exist yet.
    #[must_use]
    pub const fn new(path: PathBuf) -> Self {
        Self {
            path,
            append: Mutex::new(()),
        }
    }

    /// Backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the set of completed counties.
    ///
    /// Blank lines are ignored; malformed lines are ignored with a warning.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Io`] if the file exists but cannot be read.
    pub fn load_done_set(&self) -> Result<BTreeSet<CountyCode>, PipelineError> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeSet::new()),
            Err(e) => return Err(e.into()),
        };

        let mut done = BTreeSet::new();
        for (i, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match CountyCode::parse(line) {
                Ok(code) => {
                    done.insert(code);
                }
                Err(e) => log::warn!("{}:{}: {e}", self.path.display(), i + 1),
            }
        }
        Ok(done)
    }

    /// Appends `code` and syncs the file before returning.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Io`] if the append fails.
    pub fn mark_done(&self, code: &CountyCode) -> Result<(), PipelineError> {
        let _guard = self
            .append
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)?;

        // A hand-edited file may lack its final newline.
        let len = file.metadata()?.len();
        if len > 0 {
            let mut last = [0_u8];
            file.seek(SeekFrom::Start(len - 1))?;
            file.read_exact(&mut last)?;
            if last[0] != b'\n' {
                writeln!(file)?;
            }
        }
        writeln!(file, "{code}")?;
        file.flush()?;
        file.sync_all()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "county_lights_store_{name}_{}",
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn missing_file_is_empty_set() {
        let dir = scratch("missing");
        let store = ProgressStore::new(dir.join("progress.txt"));
        assert!(store.load_done_set().unwrap().is_empty());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn marks_are_appended_and_reloaded() {
        let dir = scratch("append");
        let path = dir.join("progress.txt");
        std::fs::write(&path, "06075\n\nnot-a-code\n6079\n").unwrap();

        let store = ProgressStore::new(path.clone());
        store.mark_done(&CountyCode::parse("06081").unwrap()).unwrap();

        let done = store.load_done_set().unwrap();
        let codes: Vec<&str> = done.iter().map(CountyCode::as_str).collect();
        assert_eq!(codes, vec!["06075", "06079", "06081"]);
        assert!(
            std::fs::read_to_string(&path)
                .unwrap()
                .starts_with("06075\n\nnot-a-code\n6079\n")
        );

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn mark_after_missing_final_newline_keeps_codes_apart() {
        let dir = scratch("newline");
        let path = dir.join("progress.txt");
        std::fs::write(&path, "06075").unwrap();

        let store = ProgressStore::new(path.clone());
        store.mark_done(&CountyCode::parse("06081").unwrap()).unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "06075\n06081\n");
        let done = store.load_done_set().unwrap();
        let codes: Vec<&str> = done.iter().map(CountyCode::as_str).collect();
        assert_eq!(codes, vec!["06075", "06081"]);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn concurrent_marks_do_not_interleave() {
        let dir = scratch("concurrent");
        let store = std::sync::Arc::new(ProgressStore::new(dir.join("progress.txt")));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = std::sync::Arc::clone(&store);
                std::thread::spawn(move || {
                    let code = CountyCode::parse(&format!("0600{i}")).unwrap();
                    store.mark_done(&code).unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.load_done_set().unwrap().len(), 8);
        let text = std::fs::read_to_string(store.path()).unwrap();
        assert!(text.lines().all(|l| l.len() == 5));

        let _ = std::fs::remove_dir_all(&dir);
    }
}
