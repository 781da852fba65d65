//! Stage processor: one collaborator call turned into a `StageOutcome`.
//!
//! A stage never raises. Every failure mode (instruction rendering, timeout,
//! cancellation, transport errors, blank replies) becomes a `Failed` outcome
//! that the driver records like any other result.

use std::time::Duration;

use tracing::{info, instrument, warn};

use crate::cancel::CancelToken;
use crate::core::state::RunState;
use crate::core::types::{ErrorKind, ErrorRecord, StageId, StageOutcome};
use crate::io::config::CortexConfig;
use crate::io::generator::{GenerateError, GenerateRequest, TextGenerator};
use crate::io::prompt::{PromptBuilder, PromptInputs};

/// Failure reason recorded for a stage whose call was cancelled.
pub const CANCELLED_REASON: &str = "cancelled";
/// Failure reason recorded for a blank reply.
pub const EMPTY_RESPONSE_REASON: &str = "empty response";

pub struct StageProcessor<'a, G: TextGenerator + ?Sized> {
    generator: &'a G,
    config: &'a CortexConfig,
    cancel: CancelToken,
}

impl<'a, G: TextGenerator + ?Sized> StageProcessor<'a, G> {
    pub fn new(generator: &'a G, config: &'a CortexConfig, cancel: CancelToken) -> Self {
        Self {
            generator,
            config,
            cancel,
        }
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.config.stage_timeout_secs)
    }

    /// Invoke the collaborator for `stage` against the current state.
    #[instrument(skip_all, fields(stage = %stage, run_id = state.run_id()))]
    pub fn run(&self, stage: StageId, state: &RunState) -> StageOutcome {
        info!(agent = stage.agent_name(), "stage started");

        let inputs = PromptInputs::from_state(stage, state, self.config.digest_chars_per_stage);
        let instruction = match PromptBuilder::new(self.config.prompt_budget_bytes).build(&inputs)
        {
            Ok(pack) => pack.render(),
            Err(e) => {
                warn!(err = %format!("{e:#}"), "instruction build failed");
                return StageOutcome::failed(stage, format!("instruction build failed: {e:#}"));
            }
        };

        let request = GenerateRequest {
            stage,
            instruction,
            model: self.config.models.get(stage).map(str::to_string),
            timeout: self.timeout(),
            cancel: self.cancel.clone(),
        };

        let outcome = match self.generator.generate(&request) {
            Ok(reply) if reply.trim().is_empty() => {
                StageOutcome::failed(stage, EMPTY_RESPONSE_REASON)
            }
            Ok(reply) => StageOutcome::succeeded(stage, reply.trim()),
            Err(GenerateError::Cancelled) => StageOutcome::failed(stage, CANCELLED_REASON),
            Err(GenerateError::TimedOut(after)) => {
                StageOutcome::failed(stage, format!("timed out after {}s", after.as_secs()))
            }
            Err(GenerateError::Failed(message)) => StageOutcome::failed(stage, message),
        };

        match outcome.failure_reason() {
            None => info!(
                bytes = outcome.content().map_or(0, str::len),
                "stage succeeded"
            ),
            Some(reason) => warn!(reason, "stage failed"),
        }
        outcome
    }

    /// Run `stage` and record its outcome into `state`.
    ///
    /// The planner's outcome goes to `state.planning`; every other stage goes
    /// to progress. A recording error is systemic.
    pub fn process(
        &self,
        stage: StageId,
        state: &mut RunState,
    ) -> Result<StageOutcome, ErrorRecord> {
        let outcome = self.run(stage, state);
        record(state, outcome.clone())?;
        Ok(outcome)
    }
}

/// Merge an outcome into the run state.
pub fn record(state: &mut RunState, outcome: StageOutcome) -> Result<(), ErrorRecord> {
    let stage = outcome.stage;
    let recorded = if stage == StageId::Planning {
        state.record_planning(outcome)
    } else {
        state.record_outcome(outcome)
    };
    recorded.map_err(|message| {
        ErrorRecord::new(
            ErrorKind::ProgressCorrupted,
            format!("cannot record {stage}: {message}"),
        )
    })
}
