//! Feedback recorder: append-only human feedback on run responses.

use chrono::{DateTime, Utc};

use crate::core::state::RunState;
use crate::core::types::{FeedbackEntry, StageId};

/// Stage whose response the user is most likely reacting to.
///
/// The last attempted plan stage, or `Planning` when no plan stage ran yet.
pub fn last_completed_stage(state: &RunState) -> StageId {
    let attempted = state.progress().len();
    attempted
        .checked_sub(1)
        .and_then(|idx| state.delegation_plan().get(idx).copied())
        .unwrap_or(StageId::Planning)
}

/// Append one feedback entry built from the current response.
///
/// Existing entries, progress and the plan are left untouched. `recorded_at`
/// is supplied by the caller so this stays deterministic.
pub fn record_feedback(
    mut state: RunState,
    feedback_text: &str,
    recorded_at: DateTime<Utc>,
) -> RunState {
    let entry = FeedbackEntry {
        stage: last_completed_stage(&state),
        prior_response: state.last_response().to_string(),
        feedback_text: feedback_text.to_string(),
        timestamp: recorded_at,
    };
    state.push_feedback(entry);
    state
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::StageOutcome;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).single().expect("timestamp")
    }

    fn finished_state() -> RunState {
        let mut state = RunState::new("run-1", "task", Vec::new());
        state
            .record_planning(StageOutcome::succeeded(StageId::Planning, "plan"))
            .expect("planning");
        state
            .freeze_plan(vec![StageId::AnalyzerB, StageId::Integrator])
            .expect("freeze");
        state
            .record_outcome(StageOutcome::succeeded(StageId::AnalyzerB, "costs"))
            .expect("b");
        state
            .record_outcome(StageOutcome::succeeded(StageId::Integrator, "decide"))
            .expect("integrator");
        state
    }

    #[test]
    fn appends_exactly_one_entry_and_keeps_prior_ones() {
        let state = record_feedback(finished_state(), "more detail please", at(10));
        let before = state.feedback_history().to_vec();

        let state = record_feedback(state, "shorter next time", at(20));

        assert_eq!(state.feedback_history().len(), before.len() + 1);
        assert_eq!(&state.feedback_history()[..before.len()], before.as_slice());
        let last = state.feedback_history().last().expect("entry");
        assert_eq!(last.stage, StageId::Integrator);
        assert_eq!(last.prior_response, "decide");
        assert_eq!(last.feedback_text, "shorter next time");
        assert_eq!(last.timestamp, at(20));
    }

    #[test]
    fn does_not_touch_progress_or_plan() {
        let state = finished_state();
        let plan = state.delegation_plan().to_vec();
        let progress = state.progress().clone();

        let state = record_feedback(state, "ok", at(1));

        assert_eq!(state.delegation_plan(), plan.as_slice());
        assert_eq!(state.progress(), &progress);
        assert_eq!(state.feedback(), Some("ok"));
        assert_eq!(state.previous_response(), Some("decide"));
    }

    #[test]
    fn falls_back_to_planning_before_any_plan_stage() {
        let state = RunState::new("run-1", "task", Vec::new());
        assert_eq!(last_completed_stage(&state), StageId::Planning);
    }
}
