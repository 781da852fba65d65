//! Progress tracker: one completion record per attempted stage.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::types::{StageId, StageOutcome};

/// Mapping from stage to the outcome of its single attempt.
///
/// Only the cardinality and key membership are consulted by the sequencer;
/// iteration order carries no meaning (use [`Progress::in_plan_order`]).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Progress {
    entries: BTreeMap<StageId, StageOutcome>,
}

impl Progress {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, stage: StageId) -> bool {
        self.entries.contains_key(&stage)
    }

    pub fn get(&self, stage: StageId) -> Option<&StageOutcome> {
        self.entries.get(&stage)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&StageId, &StageOutcome)> {
        self.entries.iter()
    }

    /// Outcomes ordered by their position in `plan`.
    pub fn in_plan_order<'a>(
        &'a self,
        plan: &'a [StageId],
    ) -> impl Iterator<Item = &'a StageOutcome> + 'a {
        plan.iter().filter_map(|stage| self.entries.get(stage))
    }

    /// Record the outcome of the stage the plan expects next.
    ///
    /// Rejects outcomes for stages outside the plan, repeated stages, and
    /// stages attempted out of plan order. On error nothing is recorded.
    pub fn record(&mut self, plan: &[StageId], outcome: StageOutcome) -> Result<(), String> {
        let stage = outcome.stage;
        if !plan.contains(&stage) {
            return Err(format!("stage '{stage}' is not in the delegation plan"));
        }
        if self.entries.contains_key(&stage) {
            return Err(format!("stage '{stage}' already has a recorded outcome"));
        }
        match plan.get(self.entries.len()) {
            Some(expected) if *expected == stage => {}
            Some(expected) => {
                return Err(format!(
                    "stage '{stage}' recorded out of order (expected '{expected}')"
                ));
            }
            None => return Err("delegation plan already complete".to_string()),
        }
        self.entries.insert(stage, outcome);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLAN: [StageId; 3] = [StageId::AnalyzerA, StageId::AnalyzerC, StageId::Integrator];

    #[test]
    fn records_in_plan_order() {
        let mut progress = Progress::default();
        progress
            .record(&PLAN, StageOutcome::succeeded(StageId::AnalyzerA, "calm"))
            .expect("record a");
        progress
            .record(&PLAN, StageOutcome::failed(StageId::AnalyzerC, "timeout"))
            .expect("record c");
        assert_eq!(progress.len(), 2);
        assert!(progress.contains(StageId::AnalyzerC));
        assert!(!progress.contains(StageId::Integrator));
    }

    #[test]
    fn rejects_stage_outside_plan() {
        let mut progress = Progress::default();
        let err = progress
            .record(&PLAN, StageOutcome::succeeded(StageId::AnalyzerB, "x"))
            .unwrap_err();
        assert!(err.contains("not in the delegation plan"));
        assert!(progress.is_empty());
    }

    #[test]
    fn rejects_duplicate_stage() {
        let mut progress = Progress::default();
        progress
            .record(&PLAN, StageOutcome::succeeded(StageId::AnalyzerA, "x"))
            .expect("first");
        let err = progress
            .record(&PLAN, StageOutcome::failed(StageId::AnalyzerA, "again"))
            .unwrap_err();
        assert!(err.contains("already has a recorded outcome"));
        assert_eq!(progress.len(), 1);
    }

    #[test]
    fn rejects_out_of_order_stage() {
        let mut progress = Progress::default();
        let err = progress
            .record(&PLAN, StageOutcome::succeeded(StageId::Integrator, "x"))
            .unwrap_err();
        assert!(err.contains("out of order"));
    }

    #[test]
    fn in_plan_order_follows_plan_not_key_order() {
        let plan = [StageId::AnalyzerC, StageId::AnalyzerA, StageId::Integrator];
        let mut progress = Progress::default();
        progress
            .record(&plan, StageOutcome::succeeded(StageId::AnalyzerC, "c"))
            .expect("c");
        progress
            .record(&plan, StageOutcome::succeeded(StageId::AnalyzerA, "a"))
            .expect("a");
        let order: Vec<StageId> = progress.in_plan_order(&plan).map(|o| o.stage).collect();
        assert_eq!(order, vec![StageId::AnalyzerC, StageId::AnalyzerA]);
    }
}
