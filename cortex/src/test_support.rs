//! Test-only collaborators: a scripted generator and a recording session sink.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use anyhow::Result;

use crate::core::delegation::ParseTrace;
use crate::core::types::StageId;
use crate::io::generator::{GenerateError, GenerateRequest, TextGenerator};
use crate::io::session_log::{AttemptRecord, SessionSink};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Clone)]
enum Scripted {
    Reply(String),
    Error(GenerateError),
    /// Fire the request's cancel token, as Ctrl-C would mid-call.
    CancelRun,
}

/// Generator returning predetermined replies per stage.
///
/// Each stage has a queue; an exhausted or unscripted stage replies with
/// `"<AGENT> output"`. Every request is captured for inspection.
#[derive(Debug, Default)]
pub struct ScriptedGenerator {
    scripts: Mutex<HashMap<StageId, VecDeque<Scripted>>>,
    requests: Mutex<Vec<GenerateRequest>>,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(self, stage: StageId, item: Scripted) -> Self {
        lock(&self.scripts).entry(stage).or_default().push_back(item);
        self
    }

    pub fn reply(self, stage: StageId, text: impl Into<String>) -> Self {
        self.push(stage, Scripted::Reply(text.into()))
    }

    pub fn fail(self, stage: StageId, error: GenerateError) -> Self {
        self.push(stage, Scripted::Error(error))
    }

    pub fn cancel_during(self, stage: StageId) -> Self {
        self.push(stage, Scripted::CancelRun)
    }

    pub fn requests(&self) -> Vec<GenerateRequest> {
        lock(&self.requests).clone()
    }

    /// Stages in the order they were invoked.
    pub fn invoked_stages(&self) -> Vec<StageId> {
        lock(&self.requests).iter().map(|r| r.stage).collect()
    }
}

impl TextGenerator for ScriptedGenerator {
    fn generate(&self, request: &GenerateRequest) -> Result<String, GenerateError> {
        lock(&self.requests).push(request.clone());
        let next = lock(&self.scripts)
            .get_mut(&request.stage)
            .and_then(VecDeque::pop_front);
        match next {
            Some(Scripted::Reply(text)) => Ok(text),
            Some(Scripted::Error(error)) => Err(error),
            Some(Scripted::CancelRun) => {
                request.cancel.cancel();
                Err(GenerateError::Cancelled)
            }
            None => Ok(format!("{} output", request.stage.agent_name())),
        }
    }
}

/// Session sink that keeps everything in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    attempts: Mutex<Vec<AttemptRecord>>,
    plans: Mutex<Vec<ParseTrace>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attempts(&self) -> Vec<AttemptRecord> {
        lock(&self.attempts).clone()
    }

    pub fn plans(&self) -> Vec<ParseTrace> {
        lock(&self.plans).clone()
    }
}

impl SessionSink for RecordingSink {
    fn record_attempt(&self, record: &AttemptRecord) -> Result<()> {
        lock(&self.attempts).push(record.clone());
        Ok(())
    }

    fn record_plan(&self, _run_id: &str, trace: &ParseTrace) -> Result<()> {
        lock(&self.plans).push(trace.clone());
        Ok(())
    }
}

/// Sink whose every write fails; the run must not notice.
#[derive(Debug, Default, Clone, Copy)]
pub struct FailingSink;

impl SessionSink for FailingSink {
    fn record_attempt(&self, _record: &AttemptRecord) -> Result<()> {
        Err(anyhow::anyhow!("disk full"))
    }

    fn record_plan(&self, _run_id: &str, _trace: &ParseTrace) -> Result<()> {
        Err(anyhow::anyhow!("disk full"))
    }
}
