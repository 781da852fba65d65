//! Engine configuration stored under `.cortex/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::types::StageId;

/// Engine configuration (TOML).
///
/// This file is intended to be edited by humans. Missing fields default to
/// the values the engine was tuned with.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CortexConfig {
    /// Wall-clock budget in seconds for each stage's collaborator call.
    pub stage_timeout_secs: u64,

    /// Transport-level retries performed inside the collaborator.
    pub max_retries: u32,

    /// Truncate collaborator stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,

    /// Maximum bytes for a rendered stage instruction before dropping sections.
    pub prompt_budget_bytes: usize,

    /// Characters kept per stage in the integrator digest.
    pub digest_chars_per_stage: usize,

    pub generator: GeneratorConfig,

    pub models: StageModels,

    pub paths: PathsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Command that reads an instruction on stdin and prints the reply.
    pub command: Vec<String>,
    /// Flag used to pass a per-stage model name (e.g. `-m`).
    pub model_flag: String,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            command: vec![
                "codex".to_string(),
                "exec".to_string(),
                "--skip-git-repo-check".to_string(),
                "-".to_string(),
            ],
            model_flag: "-m".to_string(),
        }
    }
}

/// Optional model name per stage. `None` uses the generator's default.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StageModels {
    pub planning: Option<String>,
    pub analyzer_a: Option<String>,
    pub analyzer_b: Option<String>,
    pub analyzer_c: Option<String>,
    pub integrator: Option<String>,
}

impl StageModels {
    pub fn get(&self, stage: StageId) -> Option<&str> {
        let slot = match stage {
            StageId::Planning => &self.planning,
            StageId::AnalyzerA => &self.analyzer_a,
            StageId::AnalyzerB => &self.analyzer_b,
            StageId::AnalyzerC => &self.analyzer_c,
            StageId::Integrator => &self.integrator,
        };
        slot.as_deref()
    }

    fn slot_mut(&mut self, stage: StageId) -> &mut Option<String> {
        match stage {
            StageId::Planning => &mut self.planning,
            StageId::AnalyzerA => &mut self.analyzer_a,
            StageId::AnalyzerB => &mut self.analyzer_b,
            StageId::AnalyzerC => &mut self.analyzer_c,
            StageId::Integrator => &mut self.integrator,
        }
    }

    /// Apply `CORTEX_<STAGE>_MODEL` overrides using the given lookup.
    pub fn apply_env_overrides<F: Fn(&str) -> Option<String>>(&mut self, lookup: F) {
        for stage in StageId::ALL {
            let key = model_env_key(stage);
            if let Some(model) = lookup(&key).filter(|m| !m.trim().is_empty()) {
                *self.slot_mut(stage) = Some(model.trim().to_string());
            }
        }
    }
}

/// Environment variable naming the model for `stage`.
pub fn model_env_key(stage: StageId) -> String {
    format!("CORTEX_{}_MODEL", stage.as_str().to_uppercase())
}

/// File locations, relative to the state directory unless absolute.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    pub feedback_file: PathBuf,
    pub sessions_dir: PathBuf,
    pub runs_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            feedback_file: PathBuf::from("feedback_history.json"),
            sessions_dir: PathBuf::from("sessions"),
            runs_dir: PathBuf::from("runs"),
        }
    }
}

impl PathsConfig {
    pub fn resolve(&self, state_dir: &Path, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            state_dir.join(path)
        }
    }
}

impl Default for CortexConfig {
    fn default() -> Self {
        Self {
            stage_timeout_secs: 30,
            max_retries: 3,
            output_limit_bytes: 100_000,
            prompt_budget_bytes: 40_000,
            digest_chars_per_stage: 1_200,
            generator: GeneratorConfig::default(),
            models: StageModels::default(),
            paths: PathsConfig::default(),
        }
    }
}

impl CortexConfig {
    pub fn validate(&self) -> Result<()> {
        if self.stage_timeout_secs == 0 {
            return Err(anyhow!("stage_timeout_secs must be > 0"));
        }
        if self.max_retries > 10 {
            return Err(anyhow!("max_retries must be <= 10"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        if self.prompt_budget_bytes == 0 {
            return Err(anyhow!("prompt_budget_bytes must be > 0"));
        }
        if self.digest_chars_per_stage == 0 {
            return Err(anyhow!("digest_chars_per_stage must be > 0"));
        }
        if self.generator.command.is_empty() || self.generator.command[0].trim().is_empty() {
            return Err(anyhow!("generator.command must be a non-empty array"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `CortexConfig::default()`.
pub fn load_config(path: &Path) -> Result<CortexConfig> {
    if !path.exists() {
        let cfg = CortexConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: CortexConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &CortexConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
