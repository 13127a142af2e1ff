//! Arterial offsets for coordinated operation
//!
//! Offsets are advisory: they are attached to results and never pushed to a
//! controller, so nothing here bypasses safety validation.

use log::info;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::result::OptimizationResult;
use crate::simulation::IntersectionId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Offset step between consecutive intersections, as a fraction of the
    /// average cycle
    pub offset_fraction: f64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            offset_fraction: 0.25,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinationPlan {
    pub average_cycle_ms: u32,
    pub offsets: BTreeMap<IntersectionId, u32>,
}

#[derive(Debug, Clone, Default)]
pub struct NetworkCoordinator {
    pub config: CoordinatorConfig,
}

impl NetworkCoordinator {
    pub fn new(config: CoordinatorConfig) -> Self {
        Self { config }
    }

    /// Offsets for the intersections in `order`, stepping by
    /// `offset_fraction` of `average_cycle_ms` and wrapping at one cycle
    pub fn offsets(
        &self,
        order: &[IntersectionId],
        average_cycle_ms: u32,
    ) -> BTreeMap<IntersectionId, u32> {
        if average_cycle_ms == 0 {
            return BTreeMap::new();
        }
        let step = self.config.offset_fraction * average_cycle_ms as f64;
        order
            .iter()
            .enumerate()
            .map(|(i, id)| {
                let offset = (i as f64 * step).round() as u64 % average_cycle_ms as u64;
                (*id, offset as u32)
            })
            .collect()
    }

    /// Derive offsets from a finished batch and attach them to the deployed
    /// results. Returns `None` when nothing was deployed.
    pub fn coordinate(
        &self,
        order: &[IntersectionId],
        results: &mut [OptimizationResult],
    ) -> Option<CoordinationPlan> {
        let cycles: Vec<u32> = results
            .iter()
            .filter(|r| r.deployed)
            .filter_map(|r| r.applied_plan.as_ref().map(|p| p.cycle_time_ms))
            .collect();
        if cycles.is_empty() {
            return None;
        }
        let average_cycle_ms =
            (cycles.iter().map(|c| *c as u64).sum::<u64>() / cycles.len() as u64) as u32;

        let optimized: Vec<IntersectionId> = order
            .iter()
            .copied()
            .filter(|id| results.iter().any(|r| r.deployed && r.intersection == *id))
            .collect();
        let offsets = self.offsets(&optimized, average_cycle_ms);

        for result in results.iter_mut() {
            if let Some(offset) = offsets.get(&result.intersection) {
                result.offset_ms = Some(*offset);
            }
        }

        info!(
            "Coordinated {} intersection(s) on a {}ms average cycle",
            offsets.len(),
            average_cycle_ms
        );
        Some(CoordinationPlan {
            average_cycle_ms,
            offsets,
        })
    }
}
