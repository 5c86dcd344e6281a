//! Typed configuration for the orchestrator (spec §6 "Configuration").
//!
//! Loaded from an optional TOML file with environment overrides prefixed
//! `ORCHESTRATOR__`, following the teacher's `platform::config` layering
//! (`config::Config` builder with `File` + `Environment` sources).

use std::path::Path;

use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::placement::Algorithm;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub orchestrator: CoreSettings,
    pub network: NetworkSettings,
    pub placement: PlacementSettings,
    pub task: TaskSettings,
    pub liveness: LivenessSettings,
    pub queue: QueueSettings,
    pub observability: ObservabilitySettings,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            orchestrator: CoreSettings::default(),
            network: NetworkSettings::default(),
            placement: PlacementSettings::default(),
            task: TaskSettings::default(),
            liveness: LivenessSettings::default(),
            queue: QueueSettings::default(),
            observability: ObservabilitySettings::default(),
        }
    }
}

impl OrchestratorConfig {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(
                File::from(path).format(FileFormat::Toml).required(true),
            );
        }
        builder = builder.add_source(Environment::with_prefix("ORCHESTRATOR").separator("__"));

        builder
            .build()
            .context("failed to assemble orchestrator configuration")?
            .try_deserialize()
            .context("invalid orchestrator configuration")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreSettings {
    pub heartbeat_interval_seconds: u64,
    pub task_default_timeout_seconds: u64,
}

impl Default for CoreSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval_seconds: 10,
            task_default_timeout_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkSettings {
    pub max_nodes: usize,
    pub min_nodes: usize,
    pub load_balance_algorithm: Algorithm,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            max_nodes: 10_000,
            min_nodes: 0,
            load_balance_algorithm: Algorithm::WeightedRoundRobin,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlacementSettings {
    pub allow_degraded: bool,
    pub top_n: usize,
    pub weight_cpu: f32,
    pub weight_mem: f32,
    pub weight_gpu: f32,
}

impl Default for PlacementSettings {
    fn default() -> Self {
        Self {
            allow_degraded: false,
            top_n: 3,
            weight_cpu: 0.4,
            weight_mem: 0.3,
            weight_gpu: 0.3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskSettings {
    pub max_retries_default: u32,
    pub placement_grace_seconds: u64,
    pub history_limit: usize,
}

impl Default for TaskSettings {
    fn default() -> Self {
        Self {
            max_retries_default: 3,
            placement_grace_seconds: 30,
            history_limit: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LivenessSettings {
    pub degraded_factor: f64,
    pub offline_factor: f64,
    pub sweep_interval_seconds: u64,
}

impl Default for LivenessSettings {
    fn default() -> Self {
        Self {
            degraded_factor: 1.5,
            offline_factor: 3.0,
            sweep_interval_seconds: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    pub max_pending: usize,
    pub high_water_fraction: f32,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            max_pending: 100_000,
            high_water_fraction: 0.8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilitySettings {
    pub log_level: String,
    pub metrics_port: u16,
    pub enable_metrics: bool,
}

impl Default for ObservabilitySettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_port: 9090,
            enable_metrics: true,
        }
    }
}

/// Patch applied via `update_config` (spec §6: "mutable fields are limited
/// to placement algorithm, thresholds, and max/min nodes").
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigPatch {
    pub load_balance_algorithm: Option<Algorithm>,
    pub allow_degraded: Option<bool>,
    pub max_nodes: Option<usize>,
    pub min_nodes: Option<usize>,
    pub degraded_factor: Option<f64>,
    pub offline_factor: Option<f64>,
}

impl OrchestratorConfig {
    pub fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(algo) = patch.load_balance_algorithm {
            self.network.load_balance_algorithm = algo;
        }
        if let Some(v) = patch.allow_degraded {
            self.placement.allow_degraded = v;
        }
        if let Some(v) = patch.max_nodes {
            self.network.max_nodes = v;
        }
        if let Some(v) = patch.min_nodes {
            self.network.min_nodes = v;
        }
        if let Some(v) = patch.degraded_factor {
            self.liveness.degraded_factor = v;
        }
        if let Some(v) = patch.offline_factor {
            self.liveness.offline_factor = v;
        }
    }
}
