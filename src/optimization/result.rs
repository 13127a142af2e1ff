//! Per-cycle results and running statistics

use serde::{Deserialize, Serialize};

use super::cost::CostSelection;
use super::need::NeedEvaluation;
use super::optimizer::CandidateStrategy;
use super::plan::TimingPlan;
use super::safety::ValidationResult;
use crate::simulation::{IntersectionId, TimingUpdateResult};

/// Record of one pipeline run for one intersection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationResult {
    pub intersection: IntersectionId,
    pub sim_time: f64,
    /// Need evaluation asked for a retiming
    pub triggered: bool,
    /// A candidate passed cost selection and safety validation
    pub approved: bool,
    /// The controller accepted the retiming
    pub deployed: bool,
    pub evaluation: NeedEvaluation,
    pub cost: Option<CostSelection>,
    pub strategy: Option<CandidateStrategy>,
    pub plan: Option<TimingPlan>,
    /// Timings in force on the controller after deployment
    pub applied_plan: Option<TimingPlan>,
    pub validation: Option<ValidationResult>,
    pub deployment: Option<TimingUpdateResult>,
    pub estimated_savings: f64,
    /// Arterial offset suggested by network coordination
    pub offset_ms: Option<u32>,
    pub reason: String,
}

impl OptimizationResult {
    pub fn new(intersection: IntersectionId, sim_time: f64, evaluation: NeedEvaluation) -> Self {
        Self {
            intersection,
            sim_time,
            triggered: evaluation.optimization_required,
            approved: false,
            deployed: false,
            reason: evaluation.reason_text().to_string(),
            evaluation,
            cost: None,
            strategy: None,
            plan: None,
            applied_plan: None,
            validation: None,
            deployment: None,
            estimated_savings: 0.0,
            offset_ms: None,
        }
    }

    /// The deployment was staged for a later phase
    pub fn deferred(&self) -> bool {
        self.deployment.as_ref().is_some_and(|d| d.deferred)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OptimizationStats {
    /// Pipeline runs started
    pub total_optimizations: u64,
    pub triggered: u64,
    pub successful: u64,
    pub rejected_by_safety: u64,
    pub rejected_by_cost: u64,
    pub no_need: u64,
    pub deployments_deferred: u64,
    /// Cycles skipped for a missing or stale snapshot
    pub cycles_skipped: u64,
    pub cumulative_savings: f64,
}

impl OptimizationStats {
    /// Successful deployments as a percentage of triggered runs
    pub fn success_rate(&self) -> f64 {
        if self.triggered == 0 {
            0.0
        } else {
            self.successful as f64 / self.triggered as f64 * 100.0
        }
    }

    pub fn record(&mut self, result: &OptimizationResult) {
        self.total_optimizations += 1;
        if !result.triggered {
            self.no_need += 1;
            return;
        }
        self.triggered += 1;
        if result.deployed {
            self.successful += 1;
            self.cumulative_savings += result.estimated_savings;
            if result.deferred() {
                self.deployments_deferred += 1;
            }
        } else if result.validation.as_ref().is_some_and(|v| !v.approved)
            || result.deployment.as_ref().is_some_and(|d| !d.success)
        {
            self.rejected_by_safety += 1;
        } else if result.cost.is_some() {
            self.rejected_by_cost += 1;
        }
    }
}
