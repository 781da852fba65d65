//! Run driver: asks the sequencer what runs next until it reports completion.
//!
//! The driver owns the `RunState` for one run. It never decides the order of
//! stages itself; that is derived from the frozen plan and progress. It only
//! enforces the iteration bound, reacts to cancellation, and reports each
//! attempt to the session sink.

use std::time::Instant;

use chrono::Utc;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::cancel::CancelToken;
use crate::core::delegation::{describe_plan, parse_with_trace};
use crate::core::invariants::validate_run_state;
use crate::core::sequencer::{Next, iteration_bound, next_stage};
use crate::core::state::RunState;
use crate::core::types::{ErrorKind, ErrorRecord, FeedbackEntry, StageId, StageOutcome};
use crate::io::config::CortexConfig;
use crate::io::generator::TextGenerator;
use crate::io::session_log::{AttemptRecord, SessionSink};
use crate::stage::{StageProcessor, record};

/// Collaborators and settings shared by every run.
pub struct Engine<'a, G: TextGenerator + ?Sized, S: SessionSink + ?Sized> {
    generator: &'a G,
    sink: &'a S,
    config: &'a CortexConfig,
    cancel: CancelToken,
}

impl<'a, G: TextGenerator + ?Sized, S: SessionSink + ?Sized> Engine<'a, G, S> {
    pub fn new(generator: &'a G, sink: &'a S, config: &'a CortexConfig, cancel: CancelToken) -> Self {
        Self {
            generator,
            sink,
            config,
            cancel,
        }
    }

    /// Run `task` to completion under a fresh run id.
    pub fn run_task(&self, task: &str, prior_feedback: Vec<FeedbackEntry>) -> RunState {
        self.run_task_with_id(&Uuid::new_v4().to_string(), task, prior_feedback)
    }

    /// Run `task` to completion.
    ///
    /// Always returns the final state; systemic failures are carried in
    /// `run_error` rather than returned as errors.
    #[instrument(skip_all, fields(run_id = %run_id))]
    pub fn run_task_with_id(
        &self,
        run_id: &str,
        task: &str,
        prior_feedback: Vec<FeedbackEntry>,
    ) -> RunState {
        let mut state = RunState::new(run_id, task, prior_feedback);
        let processor = StageProcessor::new(self.generator, self.config, self.cancel.clone());
        let mut attempts = 0usize;

        while self.step(&processor, &mut state, &mut attempts) {}

        enforce_invariants(&mut state);
        info!(
            stages = state.progress().len(),
            error = ?state.run_error().map(|e| e.kind),
            "run finished"
        );
        state
    }

    /// Attempt the next stage, if there is one.
    ///
    /// Returns `false` once the sequencer reports completion or a run error
    /// ends the run; `state` is left as the final state in that case.
    fn step(
        &self,
        processor: &StageProcessor<'_, G>,
        state: &mut RunState,
        attempts: &mut usize,
    ) -> bool {
        let stage = match next_stage(state) {
            Ok(Next::Run(stage)) => stage,
            Ok(Next::Done) => return false,
            Err(err) => {
                error!(%err, "sequencer refused to continue");
                state.fail_run(err);
                return false;
            }
        };

        let bound = iteration_bound(state.delegation_plan().len());
        if *attempts >= bound {
            error!(attempts = *attempts, bound, "iteration bound exceeded");
            state.fail_run(ErrorRecord::new(
                ErrorKind::Stalled,
                format!("exceeded {bound} iterations at stage {stage}"),
            ));
            return false;
        }
        *attempts += 1;

        let started_at = Utc::now();
        let clock = Instant::now();
        let outcome = processor.run(stage, state);
        let ended_at = Utc::now();
        let duration_ms = u64::try_from(clock.elapsed().as_millis()).unwrap_or(u64::MAX);

        self.report_attempt(&AttemptRecord {
            run_id: state.run_id().to_string(),
            index: u32::try_from(*attempts).unwrap_or(u32::MAX),
            stage,
            started_at,
            ended_at,
            duration_ms,
            outcome: outcome.clone(),
        });

        if let Err(err) = record(state, outcome.clone()) {
            error!(%err, "could not record stage outcome");
            state.fail_run(err);
            return false;
        }

        if self.cancel.is_cancelled() {
            warn!(%stage, "run cancelled");
            state.fail_run(ErrorRecord::new(
                ErrorKind::Cancelled,
                format!("cancelled during {stage}"),
            ));
            return false;
        }

        if stage == StageId::Planning {
            self.freeze_plan(state, &outcome);
        }
        true
    }

    /// Parse the planner output and freeze the plan. A failed planner parses
    /// as empty text, which yields the fallback plan.
    fn freeze_plan(&self, state: &mut RunState, planning: &StageOutcome) {
        let trace = parse_with_trace(planning.content().unwrap_or_default());
        debug!(
            plan = %describe_plan(&trace.plan),
            used_fallback = trace.used_fallback,
            matches = ?trace.matches,
            "parsed delegation plan"
        );
        if let Err(e) = self.sink.record_plan(state.run_id(), &trace) {
            warn!(err = %format!("{e:#}"), "session sink failed to record plan");
        }
        if let Err(message) = state.freeze_plan(trace.plan) {
            error!(%message, "delegation plan rejected");
            state.fail_run(ErrorRecord::new(ErrorKind::InvalidPlan, message));
            return;
        }
        info!(plan = %describe_plan(state.delegation_plan()), "delegation plan frozen");
    }

    fn report_attempt(&self, attempt: &AttemptRecord) {
        if let Err(e) = self.sink.record_attempt(attempt) {
            warn!(
                stage = %attempt.stage,
                err = %format!("{e:#}"),
                "session sink failed to record attempt"
            );
        }
    }
}

/// Turn any invariant violation in the finished state into a run error.
fn enforce_invariants(state: &mut RunState) {
    let violations = validate_run_state(state);
    if violations.is_empty() {
        return;
    }
    error!(?violations, "run state invariants violated");
    state.fail_run(ErrorRecord::new(
        ErrorKind::ProgressCorrupted,
        violations.join("; "),
    ));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::sequencer::{Phase, phase};
    use crate::core::state::RunResult;
    use crate::core::types::StageStatus;
    use crate::io::generator::GenerateError;
    use crate::io::session_log::NullSessionSink;
    use crate::test_support::{FailingSink, RecordingSink, ScriptedGenerator};

    fn failure() -> GenerateError {
        GenerateError::Failed("backend unavailable".to_string())
    }

    /// End-to-end: the planner names two analyzers, one of them fails, and the
    /// integrator still produces the final answer.
    #[test]
    fn schedule_conflict_scenario() {
        let generator = ScriptedGenerator::new()
            .reply(
                StageId::Planning,
                "AGENT DELEGATION:\n- VMPFC Agent: stress of double booking\n- ACC Agent: the clash itself",
            )
            .reply(StageId::AnalyzerA, "Low risk; people will understand.")
            .fail(StageId::AnalyzerC, failure())
            .reply(StageId::Integrator, "Move the 2pm meeting to Thursday.");
        let sink = RecordingSink::new();
        let cfg = CortexConfig::default();
        let engine = Engine::new(&generator, &sink, &cfg, CancelToken::new());

        let state = engine.run_task_with_id(
            "run-e2e",
            "schedule conflict between two meetings",
            Vec::new(),
        );

        assert_eq!(
            state.delegation_plan(),
            &[StageId::AnalyzerA, StageId::AnalyzerC, StageId::Integrator]
        );
        assert_eq!(state.progress().len(), 3);
        assert_eq!(phase(&state), Phase::Done);
        assert!(state.run_error().is_none());
        assert_eq!(state.last_response(), "Move the 2pm meeting to Thursday.");
        assert_eq!(
            state.result(),
            RunResult::Integrated("Move the 2pm meeting to Thursday.".to_string())
        );
        assert_eq!(
            state
                .progress()
                .get(StageId::AnalyzerC)
                .map(StageOutcome::status),
            Some(StageStatus::Failed)
        );

        let integrator_request = generator
            .requests()
            .into_iter()
            .find(|r| r.stage == StageId::Integrator)
            .expect("integrator ran");
        assert!(
            integrator_request
                .instruction
                .contains("[unavailable: backend unavailable]")
        );
        assert_eq!(sink.plans().len(), 1);
    }

    /// Progress grows by exactly one entry on every plan-stage iteration.
    #[test]
    fn progress_grows_by_one_per_attempt() {
        let generator = ScriptedGenerator::new()
            .reply(StageId::Planning, "nothing relevant")
            .fail(StageId::AnalyzerB, failure());
        let sink = RecordingSink::new();
        let cfg = CortexConfig::default();
        let engine = Engine::new(&generator, &sink, &cfg, CancelToken::new());
        let processor = StageProcessor::new(&generator, &cfg, CancelToken::new());
        let mut state = RunState::new("run-1", "task", Vec::new());
        let mut attempts = 0usize;

        assert!(engine.step(&processor, &mut state, &mut attempts));
        assert!(state.planning().is_some());
        assert!(state.progress().is_empty());

        let mut deltas = Vec::new();
        loop {
            let before = state.progress().len();
            if !engine.step(&processor, &mut state, &mut attempts) {
                assert_eq!(state.progress().len(), before, "final step adds nothing");
                break;
            }
            deltas.push(state.progress().len() - before);
        }

        assert_eq!(deltas, vec![1, 1, 1, 1]);
        assert_eq!(attempts, 5);
        let indices: Vec<u32> = sink.attempts().iter().map(|a| a.index).collect();
        assert_eq!(indices, vec![1, 2, 3, 4, 5]);
        assert_eq!(
            generator.invoked_stages(),
            vec![
                StageId::Planning,
                StageId::AnalyzerA,
                StageId::AnalyzerB,
                StageId::AnalyzerC,
                StageId::Integrator,
            ]
        );
    }

    /// A plan of length k reaches Done after k stage attempts even when every
    /// stage fails.
    #[test]
    fn terminates_when_every_stage_fails() {
        let mut generator = ScriptedGenerator::new().fail(StageId::Planning, failure());
        for stage in [
            StageId::AnalyzerA,
            StageId::AnalyzerB,
            StageId::AnalyzerC,
            StageId::Integrator,
        ] {
            generator = generator.fail(stage, failure());
        }
        let cfg = CortexConfig::default();
        let engine = Engine::new(&generator, &NullSessionSink, &cfg, CancelToken::new());

        let state = engine.run_task_with_id("run-1", "task", Vec::new());

        assert_eq!(state.delegation_plan().len(), 4);
        assert_eq!(state.progress().len(), 4);
        assert_eq!(phase(&state), Phase::Done);
        assert!(state.run_error().is_none());
        assert_eq!(
            state.result(),
            RunResult::IntegrationFailed("backend unavailable".to_string())
        );
        assert_eq!(state.last_response(), "");
    }

    #[test]
    fn analyzer_failure_does_not_stop_integration() {
        let generator = ScriptedGenerator::new()
            .reply(StageId::Planning, "OFC agent: costs\nACC: conflicts")
            .fail(StageId::AnalyzerB, failure());
        let cfg = CortexConfig::default();
        let engine = Engine::new(&generator, &NullSessionSink, &cfg, CancelToken::new());

        let state = engine.run_task_with_id("run-1", "task", Vec::new());

        assert!(generator.invoked_stages().contains(&StageId::Integrator));
        assert!(matches!(state.result(), RunResult::Integrated(_)));
    }

    /// A planner failure is stage-local: the fallback plan runs in full.
    #[test]
    fn planner_failure_uses_fallback_plan() {
        let generator = ScriptedGenerator::new().fail(
            StageId::Planning,
            GenerateError::TimedOut(std::time::Duration::from_secs(30)),
        );
        let sink = RecordingSink::new();
        let cfg = CortexConfig::default();
        let engine = Engine::new(&generator, &sink, &cfg, CancelToken::new());

        let state = engine.run_task_with_id("run-1", "task", Vec::new());

        assert_eq!(
            state.delegation_plan(),
            &[
                StageId::AnalyzerA,
                StageId::AnalyzerB,
                StageId::AnalyzerC,
                StageId::Integrator,
            ]
        );
        assert_eq!(
            state.planning().and_then(StageOutcome::failure_reason),
            Some("timed out after 30s")
        );
        assert!(sink.plans()[0].used_fallback);
        assert!(matches!(state.result(), RunResult::Integrated(_)));
    }

    #[test]
    fn cancellation_mid_stage_ends_the_run() {
        let generator = ScriptedGenerator::new()
            .reply(StageId::Planning, "VMPFC agent\nOFC agent")
            .cancel_during(StageId::AnalyzerA);
        let cfg = CortexConfig::default();
        let engine = Engine::new(&generator, &NullSessionSink, &cfg, CancelToken::new());

        let state = engine.run_task_with_id("run-1", "task", Vec::new());

        assert_eq!(
            state
                .progress()
                .get(StageId::AnalyzerA)
                .and_then(StageOutcome::failure_reason),
            Some("cancelled")
        );
        assert_eq!(state.progress().len(), 1);
        assert_eq!(
            state.run_error().map(|e| e.kind),
            Some(ErrorKind::Cancelled)
        );
        assert!(!generator.invoked_stages().contains(&StageId::AnalyzerB));
        assert!(matches!(state.result(), RunResult::Aborted(_)));
    }

    #[test]
    fn prior_feedback_reaches_the_planner() {
        let entry = FeedbackEntry {
            stage: StageId::Integrator,
            prior_response: "Cancel both meetings.".to_string(),
            feedback_text: "too drastic".to_string(),
            timestamp: Utc::now(),
        };
        let generator = ScriptedGenerator::new();
        let cfg = CortexConfig::default();
        let engine = Engine::new(&generator, &NullSessionSink, &cfg, CancelToken::new());

        let state = engine.run_task("task", vec![entry]);

        assert_eq!(state.feedback_history().len(), 1);
        assert!(!state.run_id().is_empty());
        let planner = &generator.requests()[0];
        assert!(planner.instruction.contains("too drastic"));
    }

    #[test]
    fn sink_failures_do_not_affect_the_run() {
        let generator = ScriptedGenerator::new();
        let cfg = CortexConfig::default();
        let engine = Engine::new(&generator, &FailingSink, &cfg, CancelToken::new());

        let state = engine.run_task_with_id("run-1", "task", Vec::new());

        assert!(state.run_error().is_none());
        assert!(matches!(state.result(), RunResult::Integrated(_)));
    }

    /// A finished state whose progress disagrees with its plan is reported
    /// as aborted rather than integrated.
    #[test]
    fn invariant_violations_abort_the_run() {
        let generator = ScriptedGenerator::new().reply(StageId::Planning, "assign the OFC");
        let cfg = CortexConfig::default();
        let engine = Engine::new(&generator, &NullSessionSink, &cfg, CancelToken::new());
        let finished = engine.run_task_with_id("run-1", "task", Vec::new());
        assert!(matches!(finished.result(), RunResult::Integrated(_)));

        let mut value = serde_json::to_value(&finished).expect("serialize");
        value["delegation_plan"] = serde_json::json!(["analyzer_a", "integrator"]);
        let mut state: RunState = serde_json::from_value(value).expect("deserialize");

        enforce_invariants(&mut state);

        let err = state.run_error().expect("run error");
        assert_eq!(err.kind, ErrorKind::ProgressCorrupted);
        assert!(err.message.contains("analyzer_b"), "{}", err.message);
        assert!(matches!(state.result(), RunResult::Aborted(_)));
    }

    #[test]
    fn consistent_state_passes_the_final_check() {
        let generator = ScriptedGenerator::new();
        let cfg = CortexConfig::default();
        let engine = Engine::new(&generator, &NullSessionSink, &cfg, CancelToken::new());
        let mut state = engine.run_task_with_id("run-1", "task", Vec::new());

        enforce_invariants(&mut state);

        assert!(state.run_error().is_none());
    }

    #[test]
    fn finished_state_satisfies_invariants() {
        let generator = ScriptedGenerator::new()
            .reply(StageId::Planning, "assign the OFC")
            .fail(StageId::Integrator, failure());
        let cfg = CortexConfig::default();
        let engine = Engine::new(&generator, &NullSessionSink, &cfg, CancelToken::new());

        let state = engine.run_task_with_id("run-1", "task", Vec::new());

        assert!(validate_run_state(&state).is_empty());
        assert_eq!(
            state.delegation_plan(),
            &[StageId::AnalyzerB, StageId::Integrator]
        );
    }
}
