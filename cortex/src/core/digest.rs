//! Condensed digest of recorded stage outcomes for the integrator.

use crate::core::state::RunState;
use crate::core::types::{StageId, StageResult};

/// Render every recorded plan outcome (integrator excluded) in plan order.
///
/// Content is cut to `max_chars` characters per stage. Failed stages render
/// as an explicit `[unavailable: ...]` placeholder so the integrator can tell
/// missing analysis from empty analysis.
pub fn integration_digest(state: &RunState, max_chars: usize) -> String {
    let plan = state.delegation_plan();
    let mut lines = Vec::new();
    for outcome in state.progress().in_plan_order(plan) {
        if outcome.stage == StageId::Integrator {
            continue;
        }
        let body = match &outcome.result {
            StageResult::Succeeded { content } => truncate_chars(content.trim(), max_chars),
            StageResult::Failed { reason } => format!("[unavailable: {}]", reason.trim()),
        };
        lines.push(format!(
            "- {} ({}): {}",
            outcome.stage.agent_name(),
            outcome.stage.role(),
            body
        ));
    }
    if lines.is_empty() {
        return "No analyzer output was recorded.".to_string();
    }
    lines.join("\n")
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{} [truncated]", &text[..cut]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::StageOutcome;

    fn state_with(outcomes: Vec<StageOutcome>) -> RunState {
        let mut plan: Vec<StageId> = outcomes.iter().map(|o| o.stage).collect();
        if !plan.contains(&StageId::Integrator) {
            plan.push(StageId::Integrator);
        }
        let mut state = RunState::new("run-1", "task", Vec::new());
        state
            .record_planning(StageOutcome::succeeded(StageId::Planning, "p"))
            .expect("planning");
        state.freeze_plan(plan).expect("freeze");
        for outcome in outcomes {
            state.record_outcome(outcome).expect("record");
        }
        state
    }

    #[test]
    fn renders_successes_and_failure_placeholders() {
        let state = state_with(vec![
            StageOutcome::succeeded(StageId::AnalyzerA, "  Team is stressed.  "),
            StageOutcome::failed(StageId::AnalyzerC, "timed out after 30s"),
        ]);
        let digest = integration_digest(&state, 100);
        let lines: Vec<&str> = digest.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("- VMPFC"));
        assert!(lines[0].ends_with("Team is stressed."));
        assert!(lines[1].contains("[unavailable: timed out after 30s]"));
    }

    #[test]
    fn truncates_long_content_on_char_boundary() {
        let state = state_with(vec![StageOutcome::succeeded(StageId::AnalyzerB, "ééééé")]);
        let digest = integration_digest(&state, 2);
        assert!(digest.ends_with("éé [truncated]"));
    }

    #[test]
    fn empty_progress_has_placeholder_line() {
        let state = state_with(Vec::new());
        assert_eq!(
            integration_digest(&state, 10),
            "No analyzer output was recorded."
        );
    }
}
