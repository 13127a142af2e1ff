//! Optimization orchestrator
//!
//! Runs the evaluate, optimize, validate and deploy pipeline per
//! intersection on a timer. Each intersection has its own guard, so a run
//! for one intersection never waits on another and never overlaps a second
//! run for the same intersection.

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use super::coordinator::{CoordinationPlan, NetworkCoordinator};
use super::cost::CostEvaluator;
use super::need::NeedEvaluator;
use super::optimizer::TimingOptimizer;
use super::plan::TimingPlan;
use super::result::{OptimizationResult, OptimizationStats};
use super::safety::SafetyValidator;
use crate::analytics::{LaneReading, TrafficState};
use crate::simulation::{IntersectionId, SignalController, SimWorld};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Every intersection optimizes on its own
    #[default]
    Independent,
    /// Independent runs followed by arterial offset coordination
    Coordinated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Minimum simulated seconds between runs for one intersection
    pub interval_secs: f64,
    pub history_size: usize,
    pub strategy: Strategy,
    /// Run intersections of one cycle on separate threads
    pub parallel: bool,
    /// Older snapshots are not optimized against
    pub max_snapshot_age_secs: f64,
    /// Ask the controller to apply plans in the running phase when safe
    pub apply_immediately: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            interval_secs: 4.0,
            history_size: 200,
            strategy: Strategy::Independent,
            parallel: true,
            max_snapshot_age_secs: 10.0,
            apply_immediately: true,
        }
    }
}

/// Per-intersection scheduling state
#[derive(Debug, Default)]
pub struct IntersectionGuard {
    optimizing: AtomicBool,
    last_optimization: Mutex<Option<f64>>,
    /// Last run whose need evaluation asked for a retiming
    last_triggered: Mutex<Option<f64>>,
}

impl IntersectionGuard {
    pub fn is_optimizing(&self) -> bool {
        self.optimizing.load(Ordering::Acquire)
    }

    pub fn last_optimization(&self) -> Option<f64> {
        self.last_optimization.lock().ok().and_then(|t| *t)
    }

    pub fn last_triggered(&self) -> Option<f64> {
        self.last_triggered.lock().ok().and_then(|t| *t)
    }

    fn mark_triggered(&self, now: f64) {
        if let Ok(mut last) = self.last_triggered.lock() {
            *last = Some(now);
        }
    }
}

/// Held for the duration of one pipeline run. Dropping it clears the guard
/// and stamps the completion time, whatever the outcome.
#[derive(Debug)]
pub struct RunToken {
    guard: Arc<IntersectionGuard>,
    intersection: IntersectionId,
    now: f64,
}

impl RunToken {
    pub fn intersection(&self) -> IntersectionId {
        self.intersection
    }
}

impl Drop for RunToken {
    fn drop(&mut self) {
        if let Ok(mut last) = self.guard.last_optimization.lock() {
            *last = Some(self.now);
        }
        self.guard.optimizing.store(false, Ordering::Release);
    }
}

pub struct OptimizationOrchestrator {
    pub config: OrchestratorConfig,
    need: NeedEvaluator,
    optimizer: TimingOptimizer,
    cost: CostEvaluator,
    validator: SafetyValidator,
    coordinator: NetworkCoordinator,
    guards: Mutex<BTreeMap<IntersectionId, Arc<IntersectionGuard>>>,
    history: Mutex<VecDeque<OptimizationResult>>,
    stats: Mutex<OptimizationStats>,
    last_coordination: Mutex<Option<CoordinationPlan>>,
}

impl OptimizationOrchestrator {
    pub fn new(
        config: OrchestratorConfig,
        need: NeedEvaluator,
        optimizer: TimingOptimizer,
        cost: CostEvaluator,
        validator: SafetyValidator,
        coordinator: NetworkCoordinator,
    ) -> Self {
        Self {
            config,
            need,
            optimizer,
            cost,
            validator,
            coordinator,
            guards: Mutex::new(BTreeMap::new()),
            history: Mutex::new(VecDeque::new()),
            stats: Mutex::new(OptimizationStats::default()),
            last_coordination: Mutex::new(None),
        }
    }

    /// Orchestrator with default components
    pub fn with_config(config: OrchestratorConfig) -> Self {
        Self::new(
            config,
            NeedEvaluator::default(),
            TimingOptimizer::default(),
            CostEvaluator::default(),
            SafetyValidator::default(),
            NetworkCoordinator::default(),
        )
    }

    pub fn validator(&self) -> &SafetyValidator {
        &self.validator
    }

    fn guard(&self, id: IntersectionId) -> Option<Arc<IntersectionGuard>> {
        let mut guards = self.guards.lock().ok()?;
        Some(Arc::clone(guards.entry(id).or_default()))
    }

    pub fn is_optimizing(&self, id: IntersectionId) -> bool {
        self.guard(id).is_some_and(|g| g.is_optimizing())
    }

    pub fn last_optimization_time(&self, id: IntersectionId) -> Option<f64> {
        self.guard(id).and_then(|g| g.last_optimization())
    }

    /// Time of the last run that asked for a retiming. The periodic
    /// re-optimization interval counts from here, not from the last run.
    pub fn last_triggered_time(&self, id: IntersectionId) -> Option<f64> {
        self.guard(id).and_then(|g| g.last_triggered())
    }

    /// Guard clear and interval elapsed
    pub fn is_due(&self, id: IntersectionId, now: f64) -> bool {
        let Some(guard) = self.guard(id) else {
            return false;
        };
        !guard.is_optimizing()
            && guard
                .last_optimization()
                .map_or(true, |last| now - last >= self.config.interval_secs)
    }

    /// Claim the guard for `id`. `None` if a run is already in flight.
    pub fn try_begin(&self, id: IntersectionId, now: f64) -> Option<RunToken> {
        let guard = self.guard(id)?;
        guard
            .optimizing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        Some(RunToken {
            guard,
            intersection: id,
            now,
        })
    }

    /// Run the pipeline for one intersection if its guard can be claimed.
    /// The result is recorded in history and statistics.
    pub fn run_intersection(
        &self,
        id: IntersectionId,
        controller: &mut SignalController,
        state: &TrafficState,
        now: f64,
    ) -> Option<OptimizationResult> {
        let Some(token) = self.try_begin(id, now) else {
            debug!("{}: optimization already in flight, skipping", id);
            return None;
        };
        let last = token.guard.last_triggered();
        let result = self.pipeline(id, controller, state, last, now);
        if result.triggered {
            token.guard.mark_triggered(now);
        }
        drop(token);
        self.record(&result);
        Some(result)
    }

    fn pipeline(
        &self,
        id: IntersectionId,
        controller: &mut SignalController,
        state: &TrafficState,
        last_triggered: Option<f64>,
        now: f64,
    ) -> OptimizationResult {
        let evaluation = self.need.evaluate(id, state, last_triggered, now);
        let mut result = OptimizationResult::new(id, now, evaluation);
        if !result.triggered {
            debug!("{}: {}", id, result.reason);
            return result;
        }

        let lanes: Vec<LaneReading> = state.lanes_for(id).cloned().collect();
        let current = TimingPlan::from(controller.effective_timings());
        let priorities = self.optimizer.priorities(&lanes);
        let candidates = self.optimizer.generate(&current, &priorities);
        let plans: Vec<TimingPlan> = candidates.iter().map(|c| c.plan.clone()).collect();
        let selection = self.cost.select(&current, &plans, &lanes);

        let chosen = selection
            .best
            .filter(|_| selection.accepted)
            .and_then(|(index, _)| candidates.get(index));
        let Some(candidate) = chosen else {
            result.reason = match selection.best {
                Some((_, best)) => format!(
                    "No candidate beat current cost ({:.2} vs {:.2})",
                    best.total, selection.current_cost.total
                ),
                None => "No candidate plans".to_string(),
            };
            debug!("{}: {}", id, result.reason);
            result.cost = Some(selection);
            return result;
        };
        result.strategy = Some(candidate.strategy);
        result.plan = Some(candidate.plan.clone());
        let savings = selection.estimated_savings;
        result.cost = Some(selection);

        let validation = self.validator.validate(&candidate.plan);
        if !validation.approved {
            result.reason = format!("Safety validation failed: {}", validation.summary());
            result.validation = Some(validation);
            return result;
        }
        result.validation = Some(validation);
        result.approved = true;

        let deployment = controller.update_timings(
            candidate.plan.to_update(),
            self.config.apply_immediately,
            true,
        );
        if !deployment.success {
            result.reason = format!("Deployment rejected: {}", deployment.rejections.join("; "));
            warn!("{}: {}", id, result.reason);
            result.deployment = Some(deployment);
            return result;
        }

        result.deployed = true;
        result.estimated_savings = savings;
        // Change caps may have clamped the request
        let applied = TimingPlan::from(controller.effective_timings());
        result.reason = if deployment.deferred {
            format!("Deployed {} plan (deferred to next phase)", candidate.strategy)
        } else {
            format!("Deployed {} plan", candidate.strategy)
        };
        info!(
            "{}: {} (EW {}ms / NS {}ms, cycle {}ms, savings {:.2})",
            id,
            result.reason,
            applied.ew_green_ms,
            applied.ns_green_ms,
            applied.cycle_time_ms,
            savings
        );
        result.applied_plan = Some(applied);
        result.deployment = Some(deployment);
        result
    }

    fn record(&self, result: &OptimizationResult) {
        if let Ok(mut stats) = self.stats.lock() {
            stats.record(result);
        }
        if let Ok(mut history) = self.history.lock() {
            if self.config.history_size > 0 {
                while history.len() >= self.config.history_size {
                    history.pop_front();
                }
                history.push_back(result.clone());
            }
        }
    }

    /// One optimization tick over the world. Intersections that are busy or
    /// not yet due are left alone; a missing or stale snapshot skips the
    /// whole cycle.
    pub fn run_cycle(
        &self,
        world: &mut SimWorld,
        state: Option<&TrafficState>,
    ) -> Vec<OptimizationResult> {
        let now = world.time;
        let Some(state) = state else {
            warn!("No traffic snapshot available at {:.1}s, skipping optimization", now);
            self.note_skipped();
            return Vec::new();
        };
        if state.age(now) > self.config.max_snapshot_age_secs {
            warn!(
                "Traffic snapshot v{} is {:.1}s old, skipping optimization",
                state.version,
                state.age(now)
            );
            self.note_skipped();
            return Vec::new();
        }

        let order = world.arterial_order();
        let due: Vec<(IntersectionId, &mut SignalController)> = world
            .controllers_mut()
            .filter(|(id, _)| self.is_due(*id, now))
            .collect();

        let mut results: Vec<OptimizationResult> = if self.config.parallel && due.len() > 1 {
            thread::scope(|scope| {
                let handles: Vec<_> = due
                    .into_iter()
                    .map(|(id, controller)| {
                        scope.spawn(move || self.run_intersection(id, controller, state, now))
                    })
                    .collect();
                handles
                    .into_iter()
                    .filter_map(|handle| match handle.join() {
                        Ok(result) => result,
                        Err(_) => {
                            error!("Optimization worker panicked");
                            None
                        }
                    })
                    .collect()
            })
        } else {
            due.into_iter()
                .filter_map(|(id, controller)| self.run_intersection(id, controller, state, now))
                .collect()
        };
        results.sort_by_key(|r| r.intersection);

        if self.config.strategy == Strategy::Coordinated {
            if let Some(plan) = self.coordinator.coordinate(&order, &mut results) {
                if let Ok(mut last) = self.last_coordination.lock() {
                    *last = Some(plan);
                }
                // Keep the offsets on the recorded copies as well
                if let Ok(mut history) = self.history.lock() {
                    for recorded in history.iter_mut().rev().take(results.len()) {
                        let coordinated = results.iter().find(|r| {
                            r.intersection == recorded.intersection
                                && r.sim_time == recorded.sim_time
                        });
                        if let Some(r) = coordinated {
                            recorded.offset_ms = r.offset_ms;
                        }
                    }
                }
            }
        }

        debug!(
            "Optimization cycle at {:.1}s: {} run(s), {} deployed",
            now,
            results.len(),
            results.iter().filter(|r| r.deployed).count()
        );
        results
    }

    fn note_skipped(&self) {
        if let Ok(mut stats) = self.stats.lock() {
            stats.cycles_skipped += 1;
        }
    }

    pub fn stats(&self) -> OptimizationStats {
        self.stats
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    pub fn history(&self) -> Vec<OptimizationResult> {
        self.history
            .lock()
            .map(|h| h.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn last_coordination(&self) -> Option<CoordinationPlan> {
        self.last_coordination.lock().ok().and_then(|c| c.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimization::NeedReason;
    use crate::simulation::{SignalConfig, SimId};

    #[test]
    fn token_clears_guard_and_stamps_time() {
        let orchestrator = OptimizationOrchestrator::with_config(OrchestratorConfig::default());
        let id = IntersectionId(SimId(4));
        assert!(orchestrator.is_due(id, 0.0));

        let token = orchestrator.try_begin(id, 12.0).unwrap();
        assert_eq!(token.intersection(), id);
        assert!(orchestrator.is_optimizing(id));
        assert!(orchestrator.try_begin(id, 12.0).is_none());
        assert!(!orchestrator.is_due(id, 100.0));
        drop(token);

        assert!(!orchestrator.is_optimizing(id));
        assert_eq!(orchestrator.last_optimization_time(id), Some(12.0));
        assert!(!orchestrator.is_due(id, 14.0));
        assert!(orchestrator.is_due(id, 16.0));
    }

    #[test]
    fn guards_are_per_intersection() {
        let orchestrator = OptimizationOrchestrator::with_config(OrchestratorConfig::default());
        let a = orchestrator.try_begin(IntersectionId(SimId(0)), 0.0);
        let b = orchestrator.try_begin(IntersectionId(SimId(1)), 0.0);
        assert!(a.is_some());
        assert!(b.is_some());
    }

    #[test]
    fn busy_intersection_is_not_run() {
        let orchestrator = OptimizationOrchestrator::with_config(OrchestratorConfig::default());
        let id = IntersectionId(SimId(0));
        let mut controller = SignalController::new(id, SignalConfig::default());
        let state = TrafficState::from_readings(
            1,
            0.0,
            Vec::new(),
            &Default::default(),
            &Default::default(),
            &Default::default(),
        );
        let _token = orchestrator.try_begin(id, 0.0).unwrap();
        assert!(orchestrator
            .run_intersection(id, &mut controller, &state, 0.0)
            .is_none());
        assert_eq!(orchestrator.stats().total_optimizations, 0);
    }

    #[test]
    fn interval_counts_from_last_triggered_run() {
        let orchestrator = OptimizationOrchestrator::with_config(OrchestratorConfig::default());
        let id = IntersectionId(SimId(2));
        let mut controller = SignalController::new(id, SignalConfig::default());
        let empty = TrafficState::from_readings(
            1,
            0.0,
            Vec::new(),
            &Default::default(),
            &Default::default(),
            &Default::default(),
        );

        let mut now = 0.0;
        while now < 30.0 {
            let result = orchestrator
                .run_intersection(id, &mut controller, &empty, now)
                .unwrap();
            assert!(!result.triggered);
            now += 4.0;
        }
        assert_eq!(orchestrator.last_optimization_time(id), Some(28.0));
        assert_eq!(orchestrator.last_triggered_time(id), None);

        let result = orchestrator
            .run_intersection(id, &mut controller, &empty, 32.0)
            .unwrap();
        assert_eq!(result.evaluation.reason, NeedReason::IntervalElapsed);
        assert_eq!(orchestrator.last_triggered_time(id), Some(32.0));

        let result = orchestrator
            .run_intersection(id, &mut controller, &empty, 36.0)
            .unwrap();
        assert!(!result.triggered);
        assert_eq!(orchestrator.last_triggered_time(id), Some(32.0));
    }
}
