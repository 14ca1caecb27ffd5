//! Agent configuration stored in `taskloop.toml`.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::budget::LoopBudget;
use crate::core::playback::{PlaybackControl, PlaybackMode};

/// Default config file name, resolved against the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "taskloop.toml";

/// Agent configuration (TOML).
///
/// Intended to be edited by humans. Missing fields fall back to defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentConfig {
    /// Per-run iteration budget. Absent means the system default.
    pub max_loops: Option<u32>,

    /// Ask the backend for a per-task strategy analysis before executing.
    pub web_search: bool,

    pub mode: PlaybackMode,

    /// Step control in effect when a `stepwise` run starts.
    pub initial_control: PlaybackControl,

    /// Presentation pause between materialized tasks, in milliseconds.
    pub task_delay_ms: u64,

    pub model: ModelSettings,

    pub backend: BackendConfig,
}

/// Opaque model settings forwarded to the backend with every call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModelSettings {
    pub name: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Language the model should answer in.
    pub language: String,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            name: "gpt-4o-mini".to_string(),
            temperature: 0.8,
            max_tokens: 500,
            language: "English".to_string(),
        }
    }
}

/// Command-driven backend settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BackendConfig {
    /// Program and arguments invoked once per backend operation.
    pub command: Vec<String>,

    /// Wall-clock limit for a single backend call, in seconds.
    pub timeout_secs: u64,

    /// Truncate captured backend stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,

    /// Maximum prompt size before optional sections are dropped.
    pub prompt_budget_bytes: usize,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            command: vec!["taskloop-backend".to_string()],
            timeout_secs: 5 * 60,
            output_limit_bytes: 100_000,
            prompt_budget_bytes: 20_000,
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_loops: None,
            web_search: false,
            mode: PlaybackMode::Automatic,
            initial_control: PlaybackControl::Play,
            task_delay_ms: 0,
            model: ModelSettings::default(),
            backend: BackendConfig::default(),
        }
    }
}

impl AgentConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_loops == Some(0) {
            return Err(anyhow!("max_loops must be > 0 when set"));
        }
        if self.backend.timeout_secs == 0 {
            return Err(anyhow!("backend.timeout_secs must be > 0"));
        }
        if self.backend.output_limit_bytes == 0 {
            return Err(anyhow!("backend.output_limit_bytes must be > 0"));
        }
        if self.backend.prompt_budget_bytes == 0 {
            return Err(anyhow!("backend.prompt_budget_bytes must be > 0"));
        }
        if self.backend.command.is_empty() || self.backend.command[0].trim().is_empty() {
            return Err(anyhow!("backend.command must be a non-empty array"));
        }
        Ok(())
    }

    pub fn budget(&self) -> LoopBudget {
        LoopBudget::new(self.max_loops)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `AgentConfig::default()`.
pub fn load_config(path: &Path) -> Result<AgentConfig> {
    if !path.exists() {
        let cfg = AgentConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: AgentConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &AgentConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, buf)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::budget::DEFAULT_MAX_LOOPS;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, AgentConfig::default());
        assert_eq!(cfg.budget().max_loops(), DEFAULT_MAX_LOOPS);
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("taskloop.toml");
        let cfg = AgentConfig {
            max_loops: Some(7),
            mode: PlaybackMode::Stepwise,
            ..AgentConfig::default()
        };
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("taskloop.toml");
        fs::write(
            &path,
            "web_search = true\nmode = \"stepwise\"\ninitial_control = \"pause\"\n\n[backend]\ncommand = [\"python3\", \"bridge.py\"]\n",
        )
        .expect("write");
        let cfg = load_config(&path).expect("load");
        assert!(cfg.web_search);
        assert_eq!(cfg.mode, PlaybackMode::Stepwise);
        assert_eq!(cfg.initial_control, PlaybackControl::Pause);
        assert_eq!(cfg.backend.command, vec!["python3", "bridge.py"]);
        assert_eq!(cfg.backend.timeout_secs, BackendConfig::default().timeout_secs);
        assert_eq!(cfg.model, ModelSettings::default());
    }

    #[test]
    fn zero_max_loops_is_rejected() {
        let cfg = AgentConfig {
            max_loops: Some(0),
            ..AgentConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
