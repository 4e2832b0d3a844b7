//! Warden configuration stored under `.warden/config.toml`.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::router::RouterPolicy;
use crate::core::stagnation::StagnationPolicy;
use crate::core::tracking::Tracking;
use crate::core::types::Tier;
use crate::core::validator::ValidationPolicy;
use crate::io::atomic::write_atomic;

/// Name of the warden state directory. Must always be excluded from tracking.
pub const STATE_DIR_NAME: &str = ".warden";

/// Warden configuration (TOML).
///
/// Edited by humans; every field has a default so partial files load.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WardenConfig {
    /// Tracked tree directory, relative to the root.
    pub live_dir: String,
    /// Requeues allowed before a task is archived as stuck.
    pub attempt_cap: u32,
    /// Consecutive validation rejections of one task before the Fallback Agent takes over.
    pub fallback_after_rejections: u32,
    /// Per-file size limit enforced by the validator.
    pub max_file_bytes: u64,
    pub tracking: TrackingConfig,
    pub stagnation: StagnationConfig,
    pub router: RouterConfig,
    pub model: ModelConfig,
    pub memory: MemoryConfig,
    pub prompt: PromptConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TrackingConfig {
    /// Path components (no slash) or root-relative prefixes (with slash) never tracked.
    pub exclude: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StagnationConfig {
    pub window: usize,
    pub escalation_window: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RouterConfig {
    pub long_description_chars: usize,
    pub strong_keywords: Vec<String>,
    pub escalate_after_attempts: u32,
    pub degrade_after_failures: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ModelConfig {
    /// Completion command for the fast tier. Prompt on stdin, completion on stdout.
    pub fast_command: Vec<String>,
    pub strong_command: Vec<String>,
    pub timeout_secs: u64,
    pub max_calls_per_iteration: u32,
    pub retry_backoff_ms: u64,
    pub output_limit_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MemoryConfig {
    pub recent: usize,
    pub relevant_cap: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PromptConfig {
    pub budget_bytes: usize,
}

impl Default for WardenConfig {
    fn default() -> Self {
        Self {
            live_dir: "workspace".to_string(),
            attempt_cap: 3,
            fallback_after_rejections: 3,
            max_file_bytes: 1_000_000,
            tracking: TrackingConfig::default(),
            stagnation: StagnationConfig::default(),
            router: RouterConfig::default(),
            model: ModelConfig::default(),
            memory: MemoryConfig::default(),
            prompt: PromptConfig::default(),
        }
    }
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            exclude: [".git", "target", "node_modules", "__pycache__", ".venv", STATE_DIR_NAME]
                .into_iter()
                .map(str::to_string)
                .collect(),
        }
    }
}

impl Default for StagnationConfig {
    fn default() -> Self {
        Self {
            window: 3,
            escalation_window: 3,
        }
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            long_description_chars: 240,
            strong_keywords: [
                "refactor",
                "architecture",
                "design",
                "debug",
                "concurrency",
                "migrate",
                "security",
            ]
            .into_iter()
            .map(str::to_string)
            .collect(),
            escalate_after_attempts: 1,
            degrade_after_failures: 3,
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            fast_command: vec!["llm".to_string(), "-m".to_string(), "fast".to_string()],
            strong_command: vec!["llm".to_string(), "-m".to_string(), "strong".to_string()],
            timeout_secs: 600,
            max_calls_per_iteration: 2,
            retry_backoff_ms: 500,
            output_limit_bytes: 2_000_000,
        }
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            recent: 12,
            relevant_cap: 12,
        }
    }
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            budget_bytes: 60_000,
        }
    }
}

impl WardenConfig {
    pub fn validate(&self) -> Result<()> {
        if self.live_dir.trim().is_empty() {
            return Err(anyhow!("live_dir must not be empty"));
        }
        if Path::new(&self.live_dir).is_absolute() || self.live_dir.split('/').any(|s| s == "..") {
            return Err(anyhow!("live_dir must be a relative path inside the root"));
        }
        match self.live_dir.trim_matches('/') {
            "." => return Err(anyhow!("live_dir must be a subdirectory of the root")),
            STATE_DIR_NAME => return Err(anyhow!("live_dir must not be the state directory")),
            _ => {}
        }
        if self.attempt_cap == 0 {
            return Err(anyhow!("attempt_cap must be > 0"));
        }
        if self.fallback_after_rejections == 0 {
            return Err(anyhow!("fallback_after_rejections must be > 0"));
        }
        if self.max_file_bytes == 0 {
            return Err(anyhow!("max_file_bytes must be > 0"));
        }
        if !self.tracking.exclude.iter().any(|e| e.trim_matches('/') == STATE_DIR_NAME) {
            return Err(anyhow!("tracking.exclude must contain {STATE_DIR_NAME:?}"));
        }
        if self.stagnation.window == 0 {
            return Err(anyhow!("stagnation.window must be > 0"));
        }
        if self.stagnation.escalation_window == 0 {
            return Err(anyhow!("stagnation.escalation_window must be > 0"));
        }
        if self.router.degrade_after_failures == 0 {
            return Err(anyhow!("router.degrade_after_failures must be > 0"));
        }
        for (name, command) in [
            ("model.fast_command", &self.model.fast_command),
            ("model.strong_command", &self.model.strong_command),
        ] {
            if command.is_empty() || command[0].trim().is_empty() {
                return Err(anyhow!("{name} must be a non-empty array"));
            }
        }
        if self.model.timeout_secs == 0 {
            return Err(anyhow!("model.timeout_secs must be > 0"));
        }
        if self.model.max_calls_per_iteration == 0 {
            return Err(anyhow!("model.max_calls_per_iteration must be > 0"));
        }
        if self.model.output_limit_bytes == 0 {
            return Err(anyhow!("model.output_limit_bytes must be > 0"));
        }
        if self.memory.recent == 0 {
            return Err(anyhow!("memory.recent must be > 0"));
        }
        if self.prompt.budget_bytes == 0 {
            return Err(anyhow!("prompt.budget_bytes must be > 0"));
        }
        Ok(())
    }

    pub fn tracking(&self) -> Tracking {
        Tracking::new(&self.tracking.exclude)
    }

    pub fn validation_policy(&self) -> ValidationPolicy {
        ValidationPolicy {
            tracking: self.tracking(),
            max_file_bytes: self.max_file_bytes,
        }
    }

    pub fn router_policy(&self) -> RouterPolicy {
        RouterPolicy {
            long_description_chars: self.router.long_description_chars,
            strong_keywords: self.router.strong_keywords.clone(),
            escalate_after_attempts: self.router.escalate_after_attempts,
            degrade_after_failures: self.router.degrade_after_failures,
        }
    }

    pub fn stagnation_policy(&self) -> StagnationPolicy {
        StagnationPolicy {
            window: self.stagnation.window,
            escalation_window: self.stagnation.escalation_window,
        }
    }
}

impl ModelConfig {
    pub fn command_for(&self, tier: Tier) -> &[String] {
        match tier {
            Tier::Fast => &self.fast_command,
            Tier::Strong => &self.strong_command,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Backoff before retry number `retry` (1-based): base, 2x base, 4x base...
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u64 << retry.saturating_sub(1).min(16);
        Duration::from_millis(self.retry_backoff_ms.saturating_mul(factor))
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `WardenConfig::default()`.
pub fn load_config(path: &Path) -> Result<WardenConfig> {
    if !path.exists() {
        let cfg = WardenConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: WardenConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &WardenConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, WardenConfig::default());
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        let mut cfg = WardenConfig::default();
        cfg.attempt_cap = 5;
        cfg.model.fast_command = vec!["sh".to_string(), "-c".to_string(), "cat".to_string()];
        write_config(&path, &cfg).expect("write");
        assert_eq!(load_config(&path).expect("load"), cfg);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "attempt_cap = 7\n[stagnation]\nwindow = 4\n").expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.attempt_cap, 7);
        assert_eq!(cfg.stagnation.window, 4);
        assert_eq!(cfg.stagnation.escalation_window, 3);
        assert_eq!(cfg.live_dir, "workspace");
    }

    #[test]
    fn exclude_list_must_cover_state_dir() {
        let mut cfg = WardenConfig::default();
        cfg.tracking.exclude = vec![".git".to_string()];
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains(".warden"));
    }

    #[test]
    fn zero_values_are_rejected() {
        let mut cfg = WardenConfig::default();
        cfg.stagnation.window = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = WardenConfig::default();
        cfg.model.strong_command = Vec::new();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn backoff_doubles() {
        let model = ModelConfig::default();
        assert_eq!(model.backoff(1), Duration::from_millis(500));
        assert_eq!(model.backoff(2), Duration::from_millis(1_000));
        assert_eq!(model.backoff(3), Duration::from_millis(2_000));
    }
}
