//! Signal timing optimization
//!
//! Need evaluation, candidate generation, cost selection and safety
//! validation form a pipeline that the orchestrator runs per intersection.

mod coordinator;
mod cost;
mod need;
mod optimizer;
mod orchestrator;
mod plan;
mod result;
mod safety;

pub use coordinator::{CoordinationPlan, CoordinatorConfig, NetworkCoordinator};
pub use cost::{CostBreakdown, CostConfig, CostEvaluator, CostSelection};
pub use need::{NeedConfig, NeedEvaluation, NeedEvaluator, NeedReason};
pub use optimizer::{
    Candidate, CandidateStrategy, DirectionPriority, OptimizerConfig, PriorityWeights,
    TimingOptimizer,
};
pub use orchestrator::{
    IntersectionGuard, OptimizationOrchestrator, OrchestratorConfig, RunToken, Strategy,
};
pub use plan::{Movement, PhaseSpec, TimingPlan, Turn};
pub use result::{OptimizationResult, OptimizationStats};
pub use safety::{
    SafetyConstraints, SafetyValidator, Severity, ValidationRecord, ValidationResult, Violation,
    ViolationKind,
};
