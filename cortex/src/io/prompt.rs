//! Stage instruction builder.
//!
//! Instructions are rendered from embedded minijinja templates whose sections
//! are delimited by `<!-- section:KEY required|droppable -->` markers. When the
//! rendered text exceeds the byte budget, droppable sections are removed in a
//! fixed order and the last remaining section is truncated as a last resort.

use std::borrow::Cow;
use std::sync::LazyLock;

use anyhow::{Context, Result, anyhow};
use minijinja::{Environment, context};
use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::core::digest::integration_digest;
use crate::core::state::RunState;
use crate::core::types::{FeedbackEntry, StageId};

const PLANNING_TEMPLATE: &str = include_str!("prompts/planning.md");
const ANALYZER_TEMPLATE: &str = include_str!("prompts/analyzer.md");
const INTEGRATOR_TEMPLATE: &str = include_str!("prompts/integrator.md");

/// Droppable sections, least important first.
const DROP_ORDER: [&str; 2] = ["feedback", "previous"];

const TRUNCATION_MARKER: &str = "\n[truncated]";

static SECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<!--\s*section:(\w+)\s+(required|droppable)\s*-->").unwrap()
});

/// Templates are parsed once per process.
static PROMPT_ENGINE: LazyLock<Result<PromptEngine, String>> =
    LazyLock::new(|| PromptEngine::new().map_err(|e| format!("{e:#}")));

/// Rewrite section markers inside user-supplied text so they read as plain text.
fn neutralize_markers(text: &str) -> Cow<'_, str> {
    SECTION_RE.replace_all(text, "[section:$1 $2]")
}

#[derive(Debug, Clone, Serialize)]
struct AgentContext {
    agent: &'static str,
    role: &'static str,
}

impl AgentContext {
    fn of(stage: StageId) -> Self {
        Self {
            agent: stage.agent_name(),
            role: stage.role(),
        }
    }
}

fn analyzer_focus(stage: StageId) -> &'static str {
    match stage {
        StageId::AnalyzerA => "Analyze the emotional and risk components of the task.",
        StageId::AnalyzerB => "Evaluate potential rewards, costs and outcomes.",
        StageId::AnalyzerC => "Identify potential conflicts and propose resolutions.",
        StageId::Planning | StageId::Integrator => "",
    }
}

/// Everything a stage instruction is built from.
#[derive(Debug, Clone)]
pub struct PromptInputs {
    pub stage: StageId,
    pub task: String,
    /// Most recent response the stage should take into account, if any.
    pub previous: Option<String>,
    pub feedback_history: Vec<FeedbackEntry>,
    /// Condensed analyzer outcomes (integrator only).
    pub digest: Option<String>,
}

impl PromptInputs {
    /// Collect inputs for `stage` from the current run state.
    pub fn from_state(stage: StageId, state: &RunState, digest_chars: usize) -> Self {
        let previous = Some(state.last_response())
            .filter(|s| !s.trim().is_empty())
            .or(state.previous_response())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        let digest =
            (stage == StageId::Integrator).then(|| integration_digest(state, digest_chars));
        Self {
            stage,
            task: state.task().trim().to_string(),
            previous,
            feedback_history: state.feedback_history().to_vec(),
            digest,
        }
    }
}

/// Template engine wrapper around minijinja.
struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    fn new() -> Result<Self> {
        let mut env = Environment::new();
        env.add_template("planning", PLANNING_TEMPLATE)
            .context("load planning template")?;
        env.add_template("analyzer", ANALYZER_TEMPLATE)
            .context("load analyzer template")?;
        env.add_template("integrator", INTEGRATOR_TEMPLATE)
            .context("load integrator template")?;
        Ok(Self { env })
    }

    fn render(&self, input: &PromptInputs) -> Result<String> {
        let name = match input.stage {
            StageId::Planning => "planning",
            StageId::AnalyzerA | StageId::AnalyzerB | StageId::AnalyzerC => "analyzer",
            StageId::Integrator => "integrator",
        };
        let analyzers: Vec<AgentContext> =
            StageId::ANALYZERS.into_iter().map(AgentContext::of).collect();
        let feedback_history: Vec<FeedbackEntry> = input
            .feedback_history
            .iter()
            .map(|entry| FeedbackEntry {
                prior_response: neutralize_markers(&entry.prior_response).into_owned(),
                feedback_text: neutralize_markers(&entry.feedback_text).into_owned(),
                ..entry.clone()
            })
            .collect();
        let template = self.env.get_template(name)?;
        let rendered = template.render(context! {
            agent => input.stage.agent_name(),
            role => input.stage.role(),
            focus => analyzer_focus(input.stage),
            analyzers => analyzers,
            integrator => AgentContext::of(StageId::Integrator),
            task => neutralize_markers(&input.task),
            previous => input.previous.as_deref().map(neutralize_markers),
            feedback_history => (!feedback_history.is_empty()).then_some(&feedback_history),
            digest => input.digest.as_deref().map(neutralize_markers),
        })?;
        Ok(rendered)
    }
}

/// A parsed section from rendered template output.
#[derive(Debug, Clone)]
struct ParsedSection {
    key: String,
    required: bool,
    /// Full section content including header.
    content: String,
}

fn parse_sections(rendered: &str) -> Vec<ParsedSection> {
    let markers: Vec<(usize, usize, String, bool)> = SECTION_RE
        .captures_iter(rendered)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let key = caps.get(1)?.as_str().to_string();
            let required = caps.get(2)?.as_str() == "required";
            Some((whole.start(), whole.end(), key, required))
        })
        .collect();

    let mut sections = Vec::new();
    for (i, (_, start, key, required)) in markers.iter().enumerate() {
        let end = markers
            .get(i + 1)
            .map(|(next_start, ..)| *next_start)
            .unwrap_or(rendered.len());
        let content = rendered[*start..end].trim().to_string();
        if !content.is_empty() || *required {
            sections.push(ParsedSection {
                key: key.clone(),
                required: *required,
                content,
            });
        }
    }
    sections
}

fn total_len(sections: &[ParsedSection]) -> usize {
    sections.iter().map(|s| s.content.len()).sum()
}

/// Drop droppable sections in [`DROP_ORDER`], then truncate the last section.
fn apply_budget_to_sections(sections: &mut Vec<ParsedSection>, budget: usize) {
    if total_len(sections) <= budget {
        return;
    }

    for key in DROP_ORDER {
        if total_len(sections) <= budget {
            break;
        }
        if let Some(idx) = sections.iter().position(|s| s.key == key && !s.required) {
            debug!(
                section = key,
                bytes_dropped = sections[idx].content.len(),
                "dropped section for budget"
            );
            sections.remove(idx);
        }
    }

    if total_len(sections) <= budget {
        return;
    }
    let Some((last, others)) = sections.split_last_mut() else {
        return;
    };
    let allowed = budget.saturating_sub(total_len(others));
    let before_len = last.content.len();
    if before_len > allowed {
        if allowed > TRUNCATION_MARKER.len() {
            truncate_on_char_boundary(&mut last.content, allowed - TRUNCATION_MARKER.len());
            last.content.push_str(TRUNCATION_MARKER);
        } else {
            truncate_on_char_boundary(&mut last.content, allowed);
        }
        debug!(
            section = last.key,
            before_len,
            after_len = last.content.len(),
            "truncated section for budget"
        );
    }
}

fn truncate_on_char_boundary(text: &mut String, max_bytes: usize) {
    let mut cut = max_bytes.min(text.len());
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text.truncate(cut);
}

fn render_sections(sections: &[ParsedSection]) -> String {
    sections
        .iter()
        .map(|s| s.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Builds stage instructions within a byte budget.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    budget_bytes: usize,
}

impl PromptBuilder {
    pub fn new(budget_bytes: usize) -> Self {
        Self { budget_bytes }
    }

    pub fn build(&self, input: &PromptInputs) -> Result<PromptPack> {
        let engine = PROMPT_ENGINE
            .as_ref()
            .map_err(|e| anyhow!("load instruction templates: {e}"))?;
        let rendered = engine
            .render(input)
            .with_context(|| format!("render {} instruction", input.stage))?;
        let mut sections = parse_sections(&rendered);
        apply_budget_to_sections(&mut sections, self.budget_bytes);
        Ok(PromptPack {
            content: render_sections(&sections),
        })
    }
}

/// A rendered instruction ready to send to the generator.
#[derive(Debug, Clone)]
pub struct PromptPack {
    content: String,
}

impl PromptPack {
    pub fn render(&self) -> String {
        self.content.clone()
    }
}
