//! Sequencer: the next stage as a pure function of plan and progress.
//!
//! No stage ever names its successor. The position in the run is derived
//! from how many plan stages have a recorded outcome, so a stage that fails
//! still advances the run as long as its outcome is recorded.

use crate::core::invariants::validate_plan;
use crate::core::state::RunState;
use crate::core::types::{ErrorKind, ErrorRecord, StageId};

/// Position of a run in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// The planner has not been attempted; no plan exists yet.
    Planning,
    /// `n` plan stages have been attempted so far.
    Pending(usize),
    /// Terminal: every plan stage was attempted or a run error is set.
    Done,
}

/// What the driver should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Next {
    Run(StageId),
    Done,
}

/// Derive the current phase from state.
pub fn phase(state: &RunState) -> Phase {
    if state.run_error().is_some() {
        return Phase::Done;
    }
    if state.planning().is_none() {
        return Phase::Planning;
    }
    let attempted = state.progress().len();
    if attempted >= state.delegation_plan().len() {
        return Phase::Done;
    }
    Phase::Pending(attempted)
}

/// Compute the next stage to run.
///
/// Returns an error record when a plan that is empty or otherwise invalid
/// reaches the sequencer after planning; the caller must treat it as a
/// systemic failure.
pub fn next_stage(state: &RunState) -> Result<Next, ErrorRecord> {
    if state.run_error().is_some() {
        return Ok(Next::Done);
    }
    if state.planning().is_none() {
        return Ok(Next::Run(StageId::Planning));
    }

    let plan = state.delegation_plan();
    let errors = validate_plan(plan);
    if !errors.is_empty() {
        return Err(ErrorRecord::new(ErrorKind::InvalidPlan, errors.join("; ")));
    }

    match phase(state) {
        Phase::Pending(attempted) => Ok(Next::Run(plan[attempted])),
        Phase::Planning => Ok(Next::Run(StageId::Planning)),
        Phase::Done => Ok(Next::Done),
    }
}

/// Upper bound on driver iterations for a run whose plan has `plan_len` stages.
///
/// One iteration for the planner plus one per plan stage.
pub fn iteration_bound(plan_len: usize) -> usize {
    plan_len + 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::StageOutcome;

    fn planned(plan: Vec<StageId>) -> RunState {
        let mut state = RunState::new("run-1", "task", Vec::new());
        state
            .record_planning(StageOutcome::succeeded(StageId::Planning, "p"))
            .expect("planning");
        state.freeze_plan(plan).expect("freeze");
        state
    }

    #[test]
    fn fresh_state_runs_planning_first() {
        let state = RunState::new("run-1", "task", Vec::new());
        assert_eq!(phase(&state), Phase::Planning);
        assert_eq!(next_stage(&state), Ok(Next::Run(StageId::Planning)));
    }

    #[test]
    fn walks_plan_by_attempt_count() {
        let plan = vec![StageId::AnalyzerA, StageId::AnalyzerC, StageId::Integrator];
        let mut state = planned(plan.clone());

        for (idx, stage) in plan.iter().enumerate() {
            assert_eq!(phase(&state), Phase::Pending(idx));
            assert_eq!(next_stage(&state), Ok(Next::Run(*stage)));
            state
                .record_outcome(StageOutcome::failed(*stage, "failed"))
                .expect("record");
        }

        assert_eq!(phase(&state), Phase::Done);
        assert_eq!(next_stage(&state), Ok(Next::Done));
    }

    #[test]
    fn run_error_forces_done() {
        let mut state = planned(vec![StageId::AnalyzerB, StageId::Integrator]);
        state.fail_run(ErrorRecord::new(ErrorKind::Cancelled, "cancelled"));
        assert_eq!(phase(&state), Phase::Done);
        assert_eq!(next_stage(&state), Ok(Next::Done));
    }

    #[test]
    fn missing_plan_after_planning_is_systemic() {
        let mut state = RunState::new("run-1", "task", Vec::new());
        state
            .record_planning(StageOutcome::succeeded(StageId::Planning, "p"))
            .expect("planning");
        let err = next_stage(&state).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidPlan);
        assert!(err.message.contains("empty"));
    }

    #[test]
    fn iteration_bound_counts_planner() {
        assert_eq!(iteration_bound(3), 4);
    }
}
