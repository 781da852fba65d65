//! Initialization helpers for `.cortex/` scaffolding.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};

use super::config::{CortexConfig, write_config};

const CORTEX_GITIGNORE: &str = "sessions/\nruns/\n*.tmp\n*.lock\n";

/// Canonical paths within `.cortex/` for a project root.
#[derive(Debug, Clone)]
pub struct CortexPaths {
    pub root: PathBuf,
    pub state_dir: PathBuf,
    pub config_path: PathBuf,
    pub gitignore_path: PathBuf,
}

impl CortexPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let state_dir = root.join(".cortex");
        Self {
            root,
            config_path: state_dir.join("config.toml"),
            gitignore_path: state_dir.join(".gitignore"),
            state_dir,
        }
    }

    pub fn feedback_file(&self, cfg: &CortexConfig) -> PathBuf {
        cfg.paths.resolve(&self.state_dir, &cfg.paths.feedback_file)
    }

    pub fn sessions_dir(&self, cfg: &CortexConfig) -> PathBuf {
        cfg.paths.resolve(&self.state_dir, &cfg.paths.sessions_dir)
    }

    pub fn runs_dir(&self, cfg: &CortexConfig) -> PathBuf {
        cfg.paths.resolve(&self.state_dir, &cfg.paths.runs_dir)
    }
}

/// Options for `init_cortex`.
#[derive(Debug, Clone)]
pub struct InitOptions {
    /// If true, overwrite the existing config.
    pub force: bool,
}

/// Create `.cortex/` with a default config in `root`.
///
/// Fails if the config already exists unless `options.force` is set. The
/// feedback history is never touched.
pub fn init_cortex(root: &Path, options: &InitOptions) -> Result<CortexPaths> {
    let paths = CortexPaths::new(root);
    if paths.state_dir.exists() && !paths.state_dir.is_dir() {
        return Err(anyhow!("cortex init: .cortex exists but is not a directory"));
    }
    if paths.config_path.exists() && !options.force {
        return Err(anyhow!(
            "cortex init: {} already exists (use --force to overwrite)",
            paths.config_path.display()
        ));
    }

    let cfg = CortexConfig::default();
    fs::create_dir_all(&paths.state_dir)
        .with_context(|| format!("create {}", paths.state_dir.display()))?;
    fs::create_dir_all(paths.sessions_dir(&cfg))
        .with_context(|| format!("create {}", paths.sessions_dir(&cfg).display()))?;
    fs::create_dir_all(paths.runs_dir(&cfg))
        .with_context(|| format!("create {}", paths.runs_dir(&cfg).display()))?;
    fs::write(&paths.gitignore_path, CORTEX_GITIGNORE)
        .with_context(|| format!("write {}", paths.gitignore_path.display()))?;
    write_config(&paths.config_path, &cfg)?;

    Ok(paths)
}
