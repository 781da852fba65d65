//! Text-generation collaborator.
//!
//! The [`TextGenerator`] trait decouples stage processing from the actual
//! model backend (by default `codex exec`). Tests use scripted generators that
//! return predetermined replies without spawning processes.

use std::process::Command;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::cancel::CancelToken;
use crate::core::types::StageId;
use crate::io::config::CortexConfig;
use crate::io::process::run_command_with_timeout;

/// Bytes of stderr kept in a failure message.
const STDERR_EXCERPT_BYTES: usize = 400;

/// Parameters for one generation call.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    /// Stage the instruction was built for.
    pub stage: StageId,
    /// Fully rendered instruction text.
    pub instruction: String,
    /// Model override for this stage, if any.
    pub model: Option<String>,
    /// Wall-clock budget for the whole call, retries included.
    pub timeout: Duration,
    /// Checked while waiting on the backend.
    pub cancel: CancelToken,
}

/// Failure of a generation call as seen by the stage processor.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GenerateError {
    #[error("timed out after {0:?}")]
    TimedOut(Duration),
    #[error("cancelled")]
    Cancelled,
    #[error("{0}")]
    Failed(String),
}

/// Abstraction over text-generation backends.
pub trait TextGenerator {
    /// Produce a reply for `request.instruction`.
    fn generate(&self, request: &GenerateRequest) -> Result<String, GenerateError>;
}

/// Generator that spawns a configurable command, writes the instruction to
/// stdin and reads the reply from stdout.
#[derive(Debug, Clone)]
pub struct CommandGenerator {
    command: Vec<String>,
    model_flag: String,
    max_retries: u32,
    output_limit_bytes: usize,
}

impl CommandGenerator {
    pub fn new(
        command: Vec<String>,
        model_flag: impl Into<String>,
        max_retries: u32,
        output_limit_bytes: usize,
    ) -> Self {
        Self {
            command,
            model_flag: model_flag.into(),
            max_retries,
            output_limit_bytes,
        }
    }

    pub fn from_config(cfg: &CortexConfig) -> Self {
        Self::new(
            cfg.generator.command.clone(),
            cfg.generator.model_flag.clone(),
            cfg.max_retries,
            cfg.output_limit_bytes,
        )
    }

    /// Arguments after the program name, with the model flag spliced in.
    ///
    /// When the command ends with `-` (read prompt from stdin), the flag goes
    /// right before it so the backend still sees `-` last.
    fn args(&self, model: Option<&str>) -> Vec<String> {
        let mut args: Vec<String> = self.command.iter().skip(1).cloned().collect();
        if let Some(model) = model.filter(|m| !m.trim().is_empty()) {
            let at = if args.last().is_some_and(|a| a == "-") {
                args.len() - 1
            } else {
                args.len()
            };
            args.insert(at, self.model_flag.clone());
            args.insert(at + 1, model.to_string());
        }
        args
    }

    fn attempt(
        &self,
        request: &GenerateRequest,
        remaining: Duration,
    ) -> Result<String, AttemptError> {
        let program = self
            .command
            .first()
            .ok_or_else(|| AttemptError::Fatal(GenerateError::Failed("empty command".into())))?;
        let mut cmd = Command::new(program);
        cmd.args(self.args(request.model.as_deref()));

        let output = run_command_with_timeout(
            cmd,
            Some(request.instruction.as_bytes()),
            remaining,
            self.output_limit_bytes,
            &request.cancel,
        )
        .map_err(|e| AttemptError::Retryable(format!("{e:#}")))?;

        if output.cancelled {
            return Err(AttemptError::Fatal(GenerateError::Cancelled));
        }
        if output.timed_out {
            return Err(AttemptError::Fatal(GenerateError::TimedOut(request.timeout)));
        }
        if !output.status.success() {
            let stderr = output.stderr_excerpt(STDERR_EXCERPT_BYTES);
            let mut message = format!("{program} exited with status {:?}", output.status.code());
            if !stderr.is_empty() {
                message.push_str(": ");
                message.push_str(&stderr);
            }
            return Err(AttemptError::Retryable(message));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

enum AttemptError {
    Retryable(String),
    Fatal(GenerateError),
}

impl TextGenerator for CommandGenerator {
    #[instrument(skip_all, fields(stage = %request.stage, timeout_secs = request.timeout.as_secs(), model = ?request.model))]
    fn generate(&self, request: &GenerateRequest) -> Result<String, GenerateError> {
        let deadline = Instant::now() + request.timeout;
        let attempts = self.max_retries + 1;
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            if request.cancel.is_cancelled() {
                return Err(GenerateError::Cancelled);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(GenerateError::TimedOut(request.timeout));
            }

            debug!(attempt, attempts, "invoking generator command");
            match self.attempt(request, remaining) {
                Ok(reply) => {
                    info!(attempt, bytes = reply.len(), "generator replied");
                    return Ok(reply);
                }
                Err(AttemptError::Fatal(err)) => {
                    warn!(attempt, err = %err, "generator call aborted");
                    return Err(err);
                }
                Err(AttemptError::Retryable(message)) => {
                    warn!(attempt, attempts, err = %message, "generator attempt failed");
                    last_error = message;
                }
            }
        }

        Err(GenerateError::Failed(format!(
            "{last_error} (after {attempts} attempts)"
        )))
    }
}
