//! Persistent feedback history (`.cortex/feedback_history.json`).
//!
//! The store is "load all, append one, save all". Writers are serialized by an
//! in-process mutex plus an exclusive advisory lock on a sibling `.lock` file,
//! held across the whole cycle. The data file itself is replaced atomically so
//! readers never observe a partial write.

use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use fs2::FileExt;
use tracing::{debug, instrument};

use crate::core::types::FeedbackEntry;

const LOCK_MAX_RETRIES: usize = 50;
const LOCK_RETRY_MS: u64 = 100;

#[derive(Debug)]
pub struct FeedbackStore {
    path: PathBuf,
    writer: Mutex<()>,
}

impl FeedbackStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            writer: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_path(&self) -> PathBuf {
        self.path.with_extension("json.lock")
    }

    /// Load every stored entry. A missing file is an empty history.
    pub fn load_all(&self) -> Result<Vec<FeedbackEntry>> {
        read_entries(&self.path)
    }

    /// Append one entry and persist the full history. Returns the new length.
    #[instrument(skip_all, fields(path = %self.path.display(), stage = %entry.stage))]
    pub fn append(&self, entry: &FeedbackEntry) -> Result<usize> {
        let _guard = self
            .writer
            .lock()
            .map_err(|_| anyhow!("feedback store writer mutex poisoned"))?;

        let lock_file = open_lock_file(&self.lock_path())?;
        lock_exclusive_with_retry(&lock_file)
            .with_context(|| format!("lock feedback store {}", self.path.display()))?;

        let result = (|| {
            let mut entries = read_entries(&self.path)?;
            entries.push(entry.clone());
            let mut buf = serde_json::to_string_pretty(&entries).context("serialize feedback")?;
            buf.push('\n');
            write_atomic(&self.path, &buf)?;
            Ok(entries.len())
        })();

        if let Err(e) = FileExt::unlock(&lock_file) {
            debug!(err = %e, "unlock feedback store failed; lock released on close");
        }
        if let Ok(len) = &result {
            debug!(entries = len, "feedback appended");
        }
        result
    }
}

fn read_entries(path: &Path) -> Result<Vec<FeedbackEntry>> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e).with_context(|| format!("read feedback {}", path.display())),
    };
    if contents.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(&contents).with_context(|| format!("parse feedback {}", path.display()))
}

fn open_lock_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(path)
        .with_context(|| format!("open lock file {}", path.display()))
}

fn lock_exclusive_with_retry(file: &File) -> std::io::Result<()> {
    for _ in 0..LOCK_MAX_RETRIES {
        match file.try_lock_exclusive() {
            Ok(()) => return Ok(()),
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(LOCK_RETRY_MS));
            }
            Err(e) => return Err(e),
        }
    }
    Err(std::io::Error::new(
        ErrorKind::WouldBlock,
        "feedback store: lock timeout",
    ))
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("feedback path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp feedback {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace feedback {}", path.display()))?;
    Ok(())
}
