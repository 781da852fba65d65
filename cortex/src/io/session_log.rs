//! Session log: one JSON record per stage attempt under `.cortex/sessions/`.
//!
//! The log is a product artifact for audit; it is written during a run and
//! never read back by the engine.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::delegation::ParseTrace;
use crate::core::types::{StageId, StageOutcome};

/// Audit record for a single stage attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub run_id: String,
    /// 1-based position of the attempt within the run (planner is 1).
    pub index: u32,
    pub stage: StageId,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub outcome: StageOutcome,
}

/// Receives per-attempt records. Implementations must not affect the run.
pub trait SessionSink {
    fn record_attempt(&self, record: &AttemptRecord) -> Result<()>;

    /// Called once after the planner's output has been parsed.
    fn record_plan(&self, _run_id: &str, _trace: &ParseTrace) -> Result<()> {
        Ok(())
    }
}

/// Sink that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSessionSink;

impl SessionSink for NullSessionSink {
    fn record_attempt(&self, _record: &AttemptRecord) -> Result<()> {
        Ok(())
    }
}

/// Directory-backed sink writing `<sessions_dir>/<run_id>/<n>-<stage>.json`.
#[derive(Debug, Clone)]
pub struct SessionLog {
    sessions_dir: PathBuf,
}

impl SessionLog {
    pub fn new(sessions_dir: impl Into<PathBuf>) -> Self {
        Self {
            sessions_dir: sessions_dir.into(),
        }
    }

    pub fn run_dir(&self, run_id: &str) -> PathBuf {
        self.sessions_dir.join(run_id)
    }

    pub fn attempt_path(&self, run_id: &str, index: u32, stage: StageId) -> PathBuf {
        self.run_dir(run_id).join(format!("{index}-{stage}.json"))
    }

    pub fn plan_path(&self, run_id: &str) -> PathBuf {
        self.run_dir(run_id).join("plan.json")
    }
}

impl SessionSink for SessionLog {
    fn record_attempt(&self, record: &AttemptRecord) -> Result<()> {
        let path = self.attempt_path(&record.run_id, record.index, record.stage);
        write_json(&path, record)
    }

    fn record_plan(&self, run_id: &str, trace: &ParseTrace) -> Result<()> {
        write_json(&self.plan_path(run_id), trace)
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create session dir {}", parent.display()))?;
    }
    let mut buf = serde_json::to_string_pretty(value)?;
    buf.push('\n');
    fs::write(path, buf).with_context(|| format!("write {}", path.display()))
}
