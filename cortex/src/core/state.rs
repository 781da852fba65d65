//! The mutable record threaded through one run.

use serde::{Deserialize, Serialize};

use crate::core::invariants::validate_plan;
use crate::core::progress::Progress;
use crate::core::types::{ErrorRecord, FeedbackEntry, StageId, StageOutcome, StageResult};

/// State of a single run, owned exclusively by the driver.
///
/// Fields are private so the write-once rules hold: the task never changes,
/// the plan is frozen once, progress only grows, and the first systemic
/// error wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunState {
    run_id: String,
    task: String,
    planning: Option<StageOutcome>,
    delegation_plan: Vec<StageId>,
    progress: Progress,
    last_response: String,
    feedback_history: Vec<FeedbackEntry>,
    feedback: Option<String>,
    previous_response: Option<String>,
    run_error: Option<ErrorRecord>,
}

/// Caller-facing result of a finished run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunResult {
    /// The integrator produced the final recommendation.
    Integrated(String),
    /// The integrator ran and failed; carries its failure reason.
    IntegrationFailed(String),
    /// A systemic failure ended the run.
    Aborted(ErrorRecord),
    /// The run has not reached the integrator yet.
    Incomplete,
}

impl RunState {
    pub fn new(
        run_id: impl Into<String>,
        task: impl Into<String>,
        feedback_history: Vec<FeedbackEntry>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            task: task.into(),
            planning: None,
            delegation_plan: Vec::new(),
            progress: Progress::default(),
            last_response: String::new(),
            feedback_history,
            feedback: None,
            previous_response: None,
            run_error: None,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn task(&self) -> &str {
        &self.task
    }

    pub fn planning(&self) -> Option<&StageOutcome> {
        self.planning.as_ref()
    }

    pub fn delegation_plan(&self) -> &[StageId] {
        &self.delegation_plan
    }

    pub fn progress(&self) -> &Progress {
        &self.progress
    }

    pub fn last_response(&self) -> &str {
        &self.last_response
    }

    pub fn feedback_history(&self) -> &[FeedbackEntry] {
        &self.feedback_history
    }

    pub fn feedback(&self) -> Option<&str> {
        self.feedback.as_deref()
    }

    pub fn previous_response(&self) -> Option<&str> {
        self.previous_response.as_deref()
    }

    pub fn run_error(&self) -> Option<&ErrorRecord> {
        self.run_error.as_ref()
    }

    /// Record the planner's own outcome. Allowed exactly once.
    pub fn record_planning(&mut self, outcome: StageOutcome) -> Result<(), String> {
        if outcome.stage != StageId::Planning {
            return Err(format!("expected planning outcome, got '{}'", outcome.stage));
        }
        if self.planning.is_some() {
            return Err("planning outcome already recorded".to_string());
        }
        self.apply_response(&outcome.result);
        self.planning = Some(outcome);
        Ok(())
    }

    /// Freeze the delegation plan. Allowed once, after planning was attempted.
    pub fn freeze_plan(&mut self, plan: Vec<StageId>) -> Result<(), String> {
        if self.planning.is_none() {
            return Err("cannot freeze plan before planning stage".to_string());
        }
        if !self.delegation_plan.is_empty() {
            return Err("delegation plan already frozen".to_string());
        }
        let errors = validate_plan(&plan);
        if !errors.is_empty() {
            return Err(errors.join("; "));
        }
        self.delegation_plan = plan;
        Ok(())
    }

    /// Record the outcome of a delegated stage into progress.
    ///
    /// Successful content replaces `last_response`; failures leave it alone.
    pub fn record_outcome(&mut self, outcome: StageOutcome) -> Result<(), String> {
        let result = outcome.result.clone();
        self.progress.record(&self.delegation_plan, outcome)?;
        self.apply_response(&result);
        Ok(())
    }

    /// Set the run-level error. The first error is kept.
    pub fn fail_run(&mut self, error: ErrorRecord) {
        if self.run_error.is_none() {
            self.run_error = Some(error);
        }
    }

    pub(crate) fn push_feedback(&mut self, entry: FeedbackEntry) {
        self.previous_response = Some(entry.prior_response.clone());
        self.feedback = Some(entry.feedback_text.clone());
        self.feedback_history.push(entry);
    }

    /// Map the finished state to its caller-facing result.
    pub fn result(&self) -> RunResult {
        if let Some(error) = &self.run_error {
            return RunResult::Aborted(error.clone());
        }
        match self.progress.get(StageId::Integrator).map(|o| &o.result) {
            Some(StageResult::Succeeded { content }) => RunResult::Integrated(content.clone()),
            Some(StageResult::Failed { reason }) => RunResult::IntegrationFailed(reason.clone()),
            None => RunResult::Incomplete,
        }
    }

    fn apply_response(&mut self, result: &StageResult) {
        if let StageResult::Succeeded { content } = result {
            self.last_response = content.clone();
        }
    }
}
