//! Aggregate configuration
//!
//! Every section has defaults, so a JSON file only needs the fields it
//! changes.

use anyhow::{Context, Result};
use log::info;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::analytics::{AnalyticsConfig, SensorConfig, SensorLayer, TrafficAnalytics};
use crate::optimization::{
    CoordinatorConfig, CostConfig, CostEvaluator, NeedConfig, NeedEvaluator, NetworkCoordinator,
    OptimizationOrchestrator, OptimizerConfig, OrchestratorConfig, SafetyConstraints,
    SafetyValidator, TimingOptimizer,
};
use crate::simulation::{GridConfig, SignalConfig, SimWorld, VehicleConfig};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub grid: GridConfig,
    pub vehicle: VehicleConfig,
    pub signal: SignalConfig,
    pub sensor: SensorConfig,
    pub analytics: AnalyticsConfig,
    pub need: NeedConfig,
    pub optimizer: OptimizerConfig,
    pub cost: CostConfig,
    pub safety: SafetyConstraints,
    pub orchestrator: OrchestratorConfig,
    pub coordinator: CoordinatorConfig,
}

impl SimConfig {
    /// Read a JSON configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config = Self::from_json(&text)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).context("Failed to parse configuration JSON")
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize configuration")
    }

    pub fn build_world(&self, seed: Option<u64>) -> Result<SimWorld> {
        let grid = self.grid.clone();
        let vehicle = self.vehicle.clone();
        let signal = self.signal.clone();
        match seed {
            Some(seed) => SimWorld::new_with_seed(grid, vehicle, signal, seed),
            None => SimWorld::new(grid, vehicle, signal),
        }
    }

    pub fn build_sensor(&self) -> SensorLayer {
        SensorLayer::new(self.sensor.clone())
    }

    pub fn build_analytics(&self) -> TrafficAnalytics {
        TrafficAnalytics::new(self.analytics.clone())
    }

    pub fn build_orchestrator(&self) -> OptimizationOrchestrator {
        let mut optimizer = self.optimizer.clone();
        // Candidates never go below the validator's green floor
        optimizer.min_green_ms = optimizer.min_green_ms.max(self.safety.min_green_ms);
        OptimizationOrchestrator::new(
            self.orchestrator.clone(),
            NeedEvaluator::new(self.need.clone()),
            TimingOptimizer::new(optimizer),
            CostEvaluator::new(self.cost.clone()),
            SafetyValidator::new(self.safety.clone()),
            NetworkCoordinator::new(self.coordinator.clone()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimization::Strategy;

    #[test]
    fn partial_json_overrides_only_named_fields() {
        let config = SimConfig::from_json(
            r#"{ "grid": { "rows": 2 }, "orchestrator": { "strategy": "coordinated" } }"#,
        )
        .unwrap();
        assert_eq!(config.grid.rows, 2);
        assert_eq!(config.grid.cols, 3);
        assert_eq!(config.orchestrator.strategy, Strategy::Coordinated);
        assert_eq!(config.signal, SignalConfig::default());
    }

    #[test]
    fn round_trips_through_json() {
        let config = SimConfig::default();
        let parsed = SimConfig::from_json(&config.to_json().unwrap()).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(SimConfig::from_json("{ not json").is_err());
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = SimConfig::load("/nonexistent/signal_sim.json").unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to read config file"));
    }
}
