//! Archive of finished runs (`.cortex/runs/<run_id>.json`).

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tracing::debug;

use crate::core::state::RunState;

/// Path of the archive file for `run_id` under `runs_dir`.
pub fn archive_path(runs_dir: &Path, run_id: &str) -> PathBuf {
    runs_dir.join(format!("{run_id}.json"))
}

/// Load an archived run.
pub fn load_run_archive(path: &Path) -> Result<RunState> {
    debug!(path = %path.display(), "loading run archive");
    let contents =
        fs::read_to_string(path).with_context(|| format!("read run archive {}", path.display()))?;
    let state: RunState = serde_json::from_str(&contents)
        .with_context(|| format!("parse run archive {}", path.display()))?;
    Ok(state)
}

/// Atomically write a finished run to `runs_dir` (temp file + rename).
///
/// Returns the archive path.
pub fn write_run_archive(runs_dir: &Path, state: &RunState) -> Result<PathBuf> {
    if state.run_id().trim().is_empty() {
        return Err(anyhow!("cannot archive a run without a run id"));
    }
    let path = archive_path(runs_dir, state.run_id());
    debug!(path = %path.display(), run_id = state.run_id(), "writing run archive");
    let mut buf = serde_json::to_string_pretty(state).context("serialize run state")?;
    buf.push('\n');
    write_atomic(&path, &buf)?;
    Ok(path)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("run archive path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp run archive {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path)
        .with_context(|| format!("replace run archive {}", path.display()))?;
    Ok(())
}
