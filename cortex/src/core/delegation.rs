//! Delegation parsing: planner free text to an ordered stage plan.
//!
//! The parser is total. Any input, including empty or garbled text, yields a
//! non-empty, duplicate-free plan that ends with [`StageId::Integrator`].

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::core::types::StageId;

/// Surface patterns meaning "this analyzer is assigned". `{name}` is replaced
/// by the lower-cased agent name. `.` never crosses a line break.
const PATTERN_TEMPLATES: [&str; 5] = [
    r"\b{name} agent\b",
    r"\b{name}\s*:",
    r"\bassign\w*\b.*\b{name}\b",
    r"\bdelegat\w*\b.*\b{name}\b",
    r"\b{name}\b.*\bagent\b",
];

struct AnalyzerPatterns {
    stage: StageId,
    patterns: Vec<Regex>,
}

static ANALYZER_PATTERNS: LazyLock<Vec<AnalyzerPatterns>> = LazyLock::new(|| {
    StageId::ANALYZERS
        .into_iter()
        .map(|stage| {
            let name = regex::escape(&stage.agent_name().to_lowercase());
            let patterns = PATTERN_TEMPLATES
                .iter()
                .map(|template| Regex::new(&template.replace("{name}", &name)).unwrap())
                .collect();
            AnalyzerPatterns { stage, patterns }
        })
        .collect()
});

/// Why a given analyzer was (or was not) placed on the plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnalyzerMatch {
    pub stage: StageId,
    /// Index into the pattern list of the first pattern that matched.
    pub pattern: Option<usize>,
}

/// Plan plus the matching details that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParseTrace {
    pub plan: Vec<StageId>,
    pub matches: Vec<AnalyzerMatch>,
    /// True when no analyzer matched and the full analyzer set was used.
    pub used_fallback: bool,
}

/// Parse planner output into a delegation plan.
pub fn parse(planner_output: &str) -> Vec<StageId> {
    parse_with_trace(planner_output).plan
}

/// Parse planner output and report which pattern selected each analyzer.
pub fn parse_with_trace(planner_output: &str) -> ParseTrace {
    let text = planner_output.to_lowercase();

    let matches: Vec<AnalyzerMatch> = ANALYZER_PATTERNS
        .iter()
        .map(|entry| AnalyzerMatch {
            stage: entry.stage,
            pattern: entry.patterns.iter().position(|re| re.is_match(&text)),
        })
        .collect();

    // Canonical order comes from ANALYZER_PATTERNS, never from text position.
    let mut plan: Vec<StageId> = matches
        .iter()
        .filter(|m| m.pattern.is_some())
        .map(|m| m.stage)
        .collect();

    let used_fallback = plan.is_empty();
    if used_fallback {
        plan = StageId::ANALYZERS.to_vec();
    }
    if !plan.contains(&StageId::Integrator) {
        plan.push(StageId::Integrator);
    }

    ParseTrace {
        plan,
        matches,
        used_fallback,
    }
}

/// Render a plan as `a -> b -> c` for logs and CLI output.
pub fn describe_plan(plan: &[StageId]) -> String {
    plan.iter()
        .map(|stage| stage.as_str())
        .collect::<Vec<_>>()
        .join(" -> ")
}
