//! Candidate plan generation
//!
//! Directions are ranked by a weighted priority score, then four candidate
//! strategies each derive a new plan from the current one.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::plan::TimingPlan;
use crate::analytics::LaneReading;
use crate::simulation::{Axis, Direction};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PriorityWeights {
    pub queue: f64,
    pub wait: f64,
    pub stops: f64,
    pub idle: f64,
    pub demand: f64,
}

impl Default for PriorityWeights {
    fn default() -> Self {
        Self {
            queue: 2.5,
            wait: 2.0,
            stops: 1.5,
            idle: 1.8,
            demand: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    pub small_step_ms: u32,
    pub large_step_ms: u32,
    /// Weight of the current split in the proportional candidate
    pub blend_current: f64,
    /// Weight of the priority share in the proportional candidate
    pub blend_priority: f64,
    /// Weight of an even split in the proportional candidate
    pub blend_even: f64,
    pub weights: PriorityWeights,
    pub min_cycle_ms: u32,
    pub max_cycle_ms: u32,
    /// No candidate gives either axis less green than this
    pub min_green_ms: u32,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            small_step_ms: 2_000,
            large_step_ms: 5_000,
            blend_current: 0.6,
            blend_priority: 0.3,
            blend_even: 0.1,
            weights: PriorityWeights::default(),
            min_cycle_ms: 30_000,
            max_cycle_ms: 180_000,
            min_green_ms: 5_000,
        }
    }
}

/// Urgency of one approach direction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectionPriority {
    pub direction: Direction,
    pub score: f64,
    pub avg_queue: f64,
    pub avg_wait: f64,
    pub avg_stops: f64,
    pub avg_idle: f64,
    pub demand: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CandidateStrategy {
    SmallStep,
    LargeStep,
    PriorityProportional,
    DemandRatio,
}

impl fmt::Display for CandidateStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CandidateStrategy::SmallStep => "small step",
            CandidateStrategy::LargeStep => "large step",
            CandidateStrategy::PriorityProportional => "priority proportional",
            CandidateStrategy::DemandRatio => "demand ratio",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub strategy: CandidateStrategy,
    pub plan: TimingPlan,
}

#[derive(Debug, Clone, Default)]
pub struct TimingOptimizer {
    pub config: OptimizerConfig,
}

impl TimingOptimizer {
    pub fn new(config: OptimizerConfig) -> Self {
        Self { config }
    }

    /// Priority per approach direction, most urgent first. Readings for the
    /// same direction are averaged.
    pub fn priorities<'a>(
        &self,
        lanes: impl IntoIterator<Item = &'a LaneReading>,
    ) -> Vec<DirectionPriority> {
        let w = &self.config.weights;
        let mut result: Vec<DirectionPriority> = Vec::new();
        let mut counts: Vec<usize> = Vec::new();

        for lane in lanes {
            let index = match result.iter().position(|p| p.direction == lane.direction) {
                Some(i) => i,
                None => {
                    result.push(DirectionPriority {
                        direction: lane.direction,
                        score: 0.0,
                        avg_queue: 0.0,
                        avg_wait: 0.0,
                        avg_stops: 0.0,
                        avg_idle: 0.0,
                        demand: 0.0,
                    });
                    counts.push(0);
                    result.len() - 1
                }
            };
            let p = &mut result[index];
            p.avg_queue += lane.queue_length as f64;
            p.avg_wait += lane.average_waiting_time;
            p.avg_stops += lane.average_stops;
            p.avg_idle += lane.average_idle_time;
            p.demand += lane.vehicle_count as f64;
            counts[index] += 1;
        }

        for (p, n) in result.iter_mut().zip(counts) {
            let n = n.max(1) as f64;
            p.avg_queue /= n;
            p.avg_wait /= n;
            p.avg_stops /= n;
            p.avg_idle /= n;
            p.score = w.queue * p.avg_queue
                + w.wait * p.avg_wait
                + w.stops * p.avg_stops
                + w.idle * p.avg_idle
                + w.demand * p.demand;
        }

        result.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.direction.cmp(&b.direction))
        });
        result
    }

    fn axis_sum(
        priorities: &[DirectionPriority],
        axis: Axis,
        f: impl Fn(&DirectionPriority) -> f64,
    ) -> f64 {
        priorities
            .iter()
            .filter(|p| p.direction.axis() == axis)
            .map(f)
            .sum()
    }

    fn finish(&self, plan: TimingPlan) -> TimingPlan {
        plan.normalized(
            self.config.min_cycle_ms,
            self.config.max_cycle_ms,
            self.config.min_green_ms,
        )
    }

    /// Candidate plans derived from `current`. Empty when there is no
    /// traffic to rank.
    pub fn generate(&self, current: &TimingPlan, priorities: &[DirectionPriority]) -> Vec<Candidate> {
        let Some(top) = priorities.first() else {
            return Vec::new();
        };
        // Step candidates move green from the other axis to the most urgent
        // direction's axis
        let favoured = top.direction.axis();

        let min_green = self.config.min_green_ms;
        let total_green = current.total_green_ms();
        let mut candidates = Vec::with_capacity(4);

        for (strategy, step) in [
            (CandidateStrategy::SmallStep, self.config.small_step_ms),
            (CandidateStrategy::LargeStep, self.config.large_step_ms),
        ] {
            candidates.push(Candidate {
                strategy,
                plan: self.finish(current.shifted(favoured, step as i64, min_green)),
            });
        }

        let ew_score = Self::axis_sum(priorities, Axis::EastWest, |p| p.score);
        let ns_score = Self::axis_sum(priorities, Axis::NorthSouth, |p| p.score);
        let priority_share = if ew_score + ns_score > 0.0 {
            ew_score / (ew_score + ns_score)
        } else {
            0.5
        };
        let current_share = if total_green > 0 {
            current.ew_green_ms as f64 / total_green as f64
        } else {
            0.5
        };
        let blend_total =
            self.config.blend_current + self.config.blend_priority + self.config.blend_even;
        let blended = if blend_total > 0.0 {
            (self.config.blend_current * current_share
                + self.config.blend_priority * priority_share
                + self.config.blend_even * 0.5)
                / blend_total
        } else {
            current_share
        };
        candidates.push(Candidate {
            strategy: CandidateStrategy::PriorityProportional,
            plan: self.finish(current.split(total_green, blended, min_green)),
        });

        let ew_demand = Self::axis_sum(priorities, Axis::EastWest, |p| p.demand);
        let ns_demand = Self::axis_sum(priorities, Axis::NorthSouth, |p| p.demand);
        let demand_share = if ew_demand + ns_demand > 0.0 {
            ew_demand / (ew_demand + ns_demand)
        } else {
            0.5
        };
        candidates.push(Candidate {
            strategy: CandidateStrategy::DemandRatio,
            plan: self.finish(current.split(total_green, demand_share, min_green)),
        });

        candidates
    }
}
