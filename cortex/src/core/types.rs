//! Shared deterministic types for the delegation engine.
//!
//! These types define stable contracts between core components. They do not
//! depend on external state or I/O and serialize to a stable JSON shape so
//! session logs and run archives stay diffable across runs.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of a processing stage.
///
/// The enumeration is closed. Declaration order is the canonical order used
/// when sorting stages (`Ord`), which matches the order analyzers are
/// appended to a delegation plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageId {
    /// Breaks the task down and decides which analyzers run (DLPFC).
    Planning,
    /// Emotional regulation and risk assessment (VMPFC).
    AnalyzerA,
    /// Reward, cost and outcome evaluation (OFC).
    AnalyzerB,
    /// Conflict detection and resolution (ACC).
    AnalyzerC,
    /// Value-based integration and final recommendation (MPFC).
    Integrator,
}

impl StageId {
    /// Analyzers in canonical priority order.
    pub const ANALYZERS: [StageId; 3] = [StageId::AnalyzerA, StageId::AnalyzerB, StageId::AnalyzerC];

    /// Every stage, planner first.
    pub const ALL: [StageId; 5] = [
        StageId::Planning,
        StageId::AnalyzerA,
        StageId::AnalyzerB,
        StageId::AnalyzerC,
        StageId::Integrator,
    ];

    /// Stable machine name (matches the serde representation).
    pub fn as_str(self) -> &'static str {
        match self {
            StageId::Planning => "planning",
            StageId::AnalyzerA => "analyzer_a",
            StageId::AnalyzerB => "analyzer_b",
            StageId::AnalyzerC => "analyzer_c",
            StageId::Integrator => "integrator",
        }
    }

    /// Agent name the planner uses when it delegates work.
    pub fn agent_name(self) -> &'static str {
        match self {
            StageId::Planning => "DLPFC",
            StageId::AnalyzerA => "VMPFC",
            StageId::AnalyzerB => "OFC",
            StageId::AnalyzerC => "ACC",
            StageId::Integrator => "MPFC",
        }
    }

    /// One-line description of what the stage is responsible for.
    pub fn role(self) -> &'static str {
        match self {
            StageId::Planning => "task breakdown and delegation",
            StageId::AnalyzerA => "emotional regulation and risk assessment",
            StageId::AnalyzerB => "reward, cost and outcome evaluation",
            StageId::AnalyzerC => "conflict detection and resolution",
            StageId::Integrator => "value-based integration and final recommendation",
        }
    }

    pub fn is_analyzer(self) -> bool {
        Self::ANALYZERS.contains(&self)
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse status of a stage attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Succeeded,
    Failed,
}

/// Payload of a stage attempt: content on success, a reason on failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum StageResult {
    Succeeded { content: String },
    Failed { reason: String },
}

/// Result of one attempt to run a stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageOutcome {
    pub stage: StageId,
    #[serde(flatten)]
    pub result: StageResult,
}

impl StageOutcome {
    pub fn succeeded(stage: StageId, content: impl Into<String>) -> Self {
        Self {
            stage,
            result: StageResult::Succeeded {
                content: content.into(),
            },
        }
    }

    pub fn failed(stage: StageId, reason: impl Into<String>) -> Self {
        Self {
            stage,
            result: StageResult::Failed {
                reason: reason.into(),
            },
        }
    }

    pub fn status(&self) -> StageStatus {
        match self.result {
            StageResult::Succeeded { .. } => StageStatus::Succeeded,
            StageResult::Failed { .. } => StageStatus::Failed,
        }
    }

    pub fn content(&self) -> Option<&str> {
        match &self.result {
            StageResult::Succeeded { content } => Some(content),
            StageResult::Failed { .. } => None,
        }
    }

    pub fn failure_reason(&self) -> Option<&str> {
        match &self.result {
            StageResult::Succeeded { .. } => None,
            StageResult::Failed { reason } => Some(reason),
        }
    }
}

/// Human feedback captured after a stage produced a response.
///
/// Entries are created only by the feedback recorder and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackEntry {
    pub stage: StageId,
    pub prior_response: String,
    pub feedback_text: String,
    pub timestamp: DateTime<Utc>,
}

/// Category of a systemic failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The delegation plan violated its invariants.
    InvalidPlan,
    /// An outcome could not be recorded without breaking progress invariants.
    ProgressCorrupted,
    /// The driver exceeded the iteration bound for the frozen plan.
    Stalled,
    /// The run was cancelled while a stage was in flight.
    Cancelled,
}

/// Run-level error. Presence ends the run immediately.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub kind: ErrorKind,
    pub message: String,
}

impl ErrorRecord {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}
