//! Fixloop configuration stored under `.fixloop/config.toml`.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::machine::Limits;

/// Default location relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = ".fixloop/config.toml";

/// Modules the safety gate rejects unless the config says otherwise.
pub const DEFAULT_BLOCKED_IMPORTS: &[&str] = &[
    "os",
    "sys",
    "subprocess",
    "shutil",
    "socket",
    "requests",
    "urllib",
    "http",
    "ftplib",
    "telnetlib",
    "smtplib",
    "poplib",
    "imaplib",
    "pickle",
    "shelve",
    "marshal",
    "builtins",
    "__builtins__",
    "importlib",
    "ctypes",
    "multiprocessing",
];

/// Fixloop configuration (TOML).
///
/// Meant to be edited by humans. Missing fields take the defaults below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    /// Fix attempts allowed per run.
    pub max_retries: u32,

    /// Wall-clock budget for one sandbox execution.
    pub execution_timeout_secs: u64,

    /// Top-level module names the safety gate denies.
    pub blocked_imports: Vec<String>,

    /// Captured stdout/stderr beyond this many bytes is discarded.
    pub output_limit_bytes: usize,

    /// Interpreter argv; the script path is appended.
    pub interpreter: Vec<String>,

    pub model: ModelConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModelConfig {
    pub name: String,
    pub base_url: String,
    pub temperature: f64,
    pub request_timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: "qwen2.5:0.5b".to_string(),
            base_url: "http://localhost:11434".to_string(),
            temperature: 0.1,
            request_timeout_secs: 120,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            execution_timeout_secs: 10,
            blocked_imports: DEFAULT_BLOCKED_IMPORTS
                .iter()
                .map(|m| m.to_string())
                .collect(),
            output_limit_bytes: 100_000,
            interpreter: vec!["python3".to_string()],
            model: ModelConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_retries == 0 {
            return Err(anyhow!("max_retries must be > 0"));
        }
        if self.execution_timeout_secs == 0 {
            return Err(anyhow!("execution_timeout_secs must be > 0"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        if self.interpreter.is_empty() || self.interpreter[0].trim().is_empty() {
            return Err(anyhow!("interpreter must be a non-empty array"));
        }
        if self.blocked_imports.iter().any(|m| m.trim().is_empty()) {
            return Err(anyhow!("blocked_imports must not contain empty names"));
        }
        if self.model.name.trim().is_empty() {
            return Err(anyhow!("model.name must be non-empty"));
        }
        if self.model.base_url.trim().is_empty() {
            return Err(anyhow!("model.base_url must be non-empty"));
        }
        if !(0.0..=2.0).contains(&self.model.temperature) {
            return Err(anyhow!(
                "model.temperature must be within 0.0..=2.0, got {}",
                self.model.temperature
            ));
        }
        if self.model.request_timeout_secs == 0 {
            return Err(anyhow!("model.request_timeout_secs must be > 0"));
        }
        Ok(())
    }

    pub fn execution_timeout(&self) -> Duration {
        Duration::from_secs(self.execution_timeout_secs)
    }

    pub fn limits(&self) -> Limits {
        Limits {
            max_retries: self.max_retries,
            execution_timeout: self.execution_timeout(),
        }
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `AppConfig::default()`.
pub fn load_config(path: &Path) -> Result<AppConfig> {
    if !path.exists() {
        let cfg = AppConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: AppConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &AppConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    super::write_atomic(path, &buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, AppConfig::default());
        assert_eq!(cfg.blocked_imports.len(), 21);
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("nested").join("config.toml");
        let mut cfg = AppConfig::default();
        cfg.max_retries = 5;
        cfg.model.name = "llama3".to_string();
        write_config(&path, &cfg).expect("write");
        assert_eq!(load_config(&path).expect("load"), cfg);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "max_retries = 7\n[model]\ntemperature = 0.5\n").expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.max_retries, 7);
        assert_eq!(cfg.model.temperature, 0.5);
        assert_eq!(cfg.model.name, "qwen2.5:0.5b");
        assert_eq!(cfg.execution_timeout_secs, 10);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let mut cfg = AppConfig::default();
        cfg.max_retries = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = AppConfig::default();
        cfg.model.temperature = 3.0;
        assert!(cfg.validate().is_err());

        let mut cfg = AppConfig::default();
        cfg.interpreter = vec![" ".to_string()];
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn limits_follow_config() {
        let cfg = AppConfig::default();
        let limits = cfg.limits();
        assert_eq!(limits.max_retries, 3);
        assert_eq!(limits.execution_timeout, Duration::from_secs(10));
    }
}
