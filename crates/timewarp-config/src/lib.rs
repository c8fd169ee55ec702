//! Configuration management for Timewarp
//!
//! Provides hierarchical configuration loading from multiple sources:
//! 1. CLI arguments (highest precedence)
//! 2. Environment variables (TW_* prefix)
//! 3. timewarp.local.toml (gitignored, local overrides)
//! 4. timewarp.toml (git-tracked, project config)
//! 5. ~/.config/timewarp/config.toml (user defaults)
//! 6. Built-in defaults (lowest precedence)

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

mod error;
mod loader;
mod paths;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use paths::Paths;

/// Main Timewarp configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimewarpConfig {
    pub kernel: KernelConfig,
    pub sync: SyncSettings,
    pub simulation: SimulationConfig,
    pub logging: LoggingConfig,
}

/// Shape of the kernel: how many LPs it hosts and how often it saves state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    pub lps: u32,
    /// Events between periodic snapshots of an LP.
    pub checkpoint_period: u32,
    /// Scheduler steps between fossil collection passes (0 disables it).
    pub gvt_period: u64,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            lps: 8,
            checkpoint_period: 4,
            gvt_period: 256,
        }
    }
}

/// Capability switches for the synchronization core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    pub cross_state: bool,
    pub groups: bool,
    /// Members per group when groups are formed statically at startup.
    pub group_size: u32,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            cross_state: true,
            groups: false,
            group_size: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub seed: u64,
    pub end_time: f64,
    pub max_steps: u64,
    /// Deliver each batch of messages in random order.
    pub shuffle_delivery: bool,
    /// Pick the next LP to run at random instead of lowest timestamp first.
    pub optimistic: bool,
    /// Every n-th application event opens a rendezvous (0 disables it).
    pub rendezvous_period: u32,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            end_time: 100.0,
            max_steps: 100_000,
            shuffle_delivery: true,
            optimistic: true,
            rendezvous_period: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: String,
    pub ansi: bool,
    /// Where to write the sync event journal as JSON lines.
    pub journal: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            ansi: true,
            journal: None,
        }
    }
}

impl TimewarpConfig {
    /// Load configuration from default locations
    pub fn load() -> Result<Self> {
        ConfigLoader::new().load()
    }

    /// Load configuration from specific project directory
    pub fn load_from_dir(project_dir: impl AsRef<Path>) -> Result<Self> {
        ConfigLoader::new().with_project_dir(project_dir).load()
    }

    /// Small, chatty runs.
    pub fn development() -> Self {
        Self {
            kernel: KernelConfig {
                lps: 4,
                checkpoint_period: 1,
                ..Default::default()
            },
            simulation: SimulationConfig {
                end_time: 20.0,
                max_steps: 10_000,
                ..Default::default()
            },
            logging: LoggingConfig {
                filter: "debug".to_string(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Large runs with sparse snapshots and quiet logs.
    pub fn production() -> Self {
        Self {
            kernel: KernelConfig {
                lps: 64,
                checkpoint_period: 16,
                gvt_period: 1024,
            },
            simulation: SimulationConfig {
                end_time: 10_000.0,
                max_steps: 10_000_000,
                ..Default::default()
            },
            logging: LoggingConfig {
                filter: "warn".to_string(),
                ansi: false,
                journal: None,
            },
            ..Default::default()
        }
    }

    /// Rejects configurations no run can start from.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.kernel.lps == 0 {
            return Err(ConfigError::ValidationError(
                "kernel.lps must be at least 1".to_string(),
            ));
        }
        if self.kernel.checkpoint_period == 0 {
            return Err(ConfigError::ValidationError(
                "kernel.checkpoint_period must be at least 1".to_string(),
            ));
        }
        if self.sync.groups {
            if !self.sync.cross_state {
                return Err(ConfigError::ValidationError(
                    "sync.groups requires sync.cross_state".to_string(),
                ));
            }
            if self.sync.group_size == 0 || self.sync.group_size > self.kernel.lps {
                return Err(ConfigError::ValidationError(format!(
                    "sync.group_size {} must be between 1 and kernel.lps ({})",
                    self.sync.group_size, self.kernel.lps
                )));
            }
        }
        if !(self.simulation.end_time.is_finite() && self.simulation.end_time > 0.0) {
            return Err(ConfigError::ValidationError(format!(
                "simulation.end_time must be positive, got {}",
                self.simulation.end_time
            )));
        }
        Ok(())
    }

    /// Renders the configuration as a `timewarp.toml` document.
    pub fn to_toml(&self) -> std::result::Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::SerializeError(e.to_string()))
    }

    /// Resolve relative paths to absolute
    pub fn resolve_paths(&mut self, base_dir: impl AsRef<Path>) {
        if let Some(journal) = &self.logging.journal {
            self.logging.journal = Some(Paths::resolve(base_dir, journal));
        }
    }
}
