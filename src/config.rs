use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::orchestration::{OrchestratorConfig, SimulatedRunner, Strategy};
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub strategy: Strategy,
    pub continue_on_error: bool,
    pub global_timeout_secs: Option<u64>,
    pub worker_timeout_secs: Option<u64>,
    pub simulation: SimulationConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            strategy: Strategy::Adaptive,
            continue_on_error: false,
            global_timeout_secs: None,
            worker_timeout_secs: None,
            simulation: SimulationConfig::default(),
        }
    }
}

/// Pace of the built-in simulated task runner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub tick_ms: u64,
    /// Progress added per tick, in `0.0..=1.0`.
    pub step: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            tick_ms: 100,
            step: 0.2,
        }
    }
}

impl SimulationConfig {
    pub fn runner(&self) -> SimulatedRunner {
        SimulatedRunner::new(Duration::from_millis(self.tick_ms), self.step)
    }
}

impl Config {
    pub fn conductor_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".conductor"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::conductor_dir()?.join("conductor.toml"))
    }

    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load from an explicit path. A missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        tracing::debug!(path = %path.display(), "loading config");
        if !path.exists() {
            tracing::debug!("config file not found, using defaults");
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(path)?)?;
        config.check()?;
        tracing::debug!(
            strategy = %config.strategy,
            continue_on_error = config.continue_on_error,
            global_timeout_secs = ?config.global_timeout_secs,
            worker_timeout_secs = ?config.worker_timeout_secs,
            "config loaded"
        );
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            if !dir.exists() {
                fs::create_dir_all(dir)?;
            }
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        tracing::debug!(path = %path.display(), "config saved");
        Ok(())
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            continue_on_error: self.continue_on_error,
            global_timeout: self.global_timeout_secs.map(Duration::from_secs),
            worker_timeout: self.worker_timeout_secs.map(Duration::from_secs),
        }
    }

    fn check(&self) -> Result<()> {
        if self.global_timeout_secs == Some(0) || self.worker_timeout_secs == Some(0) {
            return Err(Error::Validation("timeouts must be greater than zero".into()));
        }
        if !(self.simulation.step > 0.0 && self.simulation.step <= 1.0) {
            return Err(Error::Validation(format!(
                "simulation.step must be in (0, 1], got {}",
                self.simulation.step
            )));
        }
        Ok(())
    }
}
