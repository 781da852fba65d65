//! Semantic invariants for delegation plans and run state.

use std::collections::HashSet;

use crate::core::state::RunState;
use crate::core::types::StageId;

/// Check delegation plan invariants:
/// - Plan is non-empty
/// - No duplicate stages
/// - `Planning` never appears
/// - Ends with `Integrator`, which appears nowhere else
pub fn validate_plan(plan: &[StageId]) -> Vec<String> {
    let mut errors = Vec::new();
    let Some(last) = plan.last() else {
        errors.push("delegation plan is empty".to_string());
        return errors;
    };

    let mut seen = HashSet::new();
    for (idx, stage) in plan.iter().enumerate() {
        if !seen.insert(*stage) {
            errors.push(format!("duplicate stage '{stage}' at position {idx}"));
        }
        if *stage == StageId::Planning {
            errors.push(format!("planning stage at position {idx}"));
        }
    }

    if *last != StageId::Integrator {
        errors.push(format!("plan must end with integrator, ends with '{last}'"));
    }

    errors
}

/// Check run-state invariants that must hold between driver iterations:
/// - A frozen plan satisfies [`validate_plan`] (a run aborted before freezing has none)
/// - Every progress key belongs to the plan
/// - Progress keys form a prefix of the plan (no gaps, no reordering)
/// - Each outcome is stored under its own stage id
pub fn validate_run_state(state: &RunState) -> Vec<String> {
    let mut errors = Vec::new();
    let plan = state.delegation_plan();

    let aborted_before_freeze = plan.is_empty() && state.run_error().is_some();
    if state.planning().is_some() && !aborted_before_freeze {
        errors.extend(validate_plan(plan));
    } else if !plan.is_empty() {
        errors.push("plan frozen before planning stage was attempted".to_string());
    }

    for (stage, outcome) in state.progress().iter() {
        if !plan.contains(stage) {
            errors.push(format!("progress key '{stage}' is not in the plan"));
        }
        if outcome.stage != *stage {
            errors.push(format!(
                "progress key '{stage}' holds outcome for '{}'",
                outcome.stage
            ));
        }
    }

    let attempted = state.progress().len().min(plan.len());
    for stage in &plan[..attempted] {
        if !state.progress().contains(*stage) {
            errors.push(format!("stage '{stage}' skipped before later stages ran"));
        }
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{ErrorKind, ErrorRecord, StageOutcome};

    #[test]
    fn valid_plan_has_no_errors() {
        let plan = [StageId::AnalyzerB, StageId::Integrator];
        assert!(validate_plan(&plan).is_empty());
    }

    #[test]
    fn integrator_only_plan_is_valid() {
        assert!(validate_plan(&[StageId::Integrator]).is_empty());
    }

    #[test]
    fn reports_every_violation() {
        let plan = [
            StageId::Planning,
            StageId::AnalyzerA,
            StageId::AnalyzerA,
            StageId::AnalyzerC,
        ];
        let errors = validate_plan(&plan);
        assert!(errors.iter().any(|err| err.contains("duplicate stage")));
        assert!(errors.iter().any(|err| err.contains("planning stage")));
        assert!(errors.iter().any(|err| err.contains("must end with integrator")));
    }

    #[test]
    fn integrator_in_the_middle_is_a_duplicate_or_bad_tail() {
        let plan = [StageId::Integrator, StageId::AnalyzerA];
        let errors = validate_plan(&plan);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("ends with 'analyzer_a'"));
    }

    #[test]
    fn run_aborted_before_freeze_is_consistent() {
        let mut state = RunState::new("run-1", "task", Vec::new());
        state
            .record_planning(StageOutcome::failed(StageId::Planning, "cancelled"))
            .expect("planning");
        assert!(!validate_run_state(&state).is_empty());

        state.fail_run(ErrorRecord::new(ErrorKind::Cancelled, "cancelled"));
        assert!(validate_run_state(&state).is_empty());
    }

    #[test]
    fn empty_plan_is_rejected() {
        assert_eq!(validate_plan(&[]), vec!["delegation plan is empty".to_string()]);
    }
}
