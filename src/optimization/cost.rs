//! Cost model for timing plans
//!
//! A plan is scored against the current lane readings. Red time per
//! approach drives idle, stop and delay costs; the distance from the
//! running plan drives the switch cost.

use serde::{Deserialize, Serialize};

use super::plan::TimingPlan;
use crate::analytics::LaneReading;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CostConfig {
    pub idle_weight: f64,
    pub stop_weight: f64,
    pub switch_weight: f64,
    pub delay_weight: f64,
    /// Share of idle and stop cost taken from measured data
    pub measured_weight: f64,
    /// Share taken from arrivals projected during red
    pub projected_weight: f64,
    /// Queue length above which a lane counts as congested
    pub congested_queue: usize,
    pub congestion_multiplier: f64,
    /// Added to the multiplier per vehicle beyond `congested_queue`
    pub congestion_increment: f64,
    /// A candidate must cost less than current × this to be accepted
    pub acceptance_threshold: f64,
}

impl Default for CostConfig {
    fn default() -> Self {
        Self {
            idle_weight: 0.35,
            stop_weight: 0.25,
            switch_weight: 0.15,
            delay_weight: 0.25,
            measured_weight: 0.8,
            projected_weight: 0.2,
            congested_queue: 5,
            congestion_multiplier: 2.0,
            congestion_increment: 0.1,
            acceptance_threshold: 0.95,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CostBreakdown {
    pub idle_cost: f64,
    pub stop_cost: f64,
    pub switch_cost: f64,
    pub delay_penalty: f64,
    pub total: f64,
}

/// Outcome of comparing candidates against the running plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostSelection {
    pub current_cost: CostBreakdown,
    /// Index and cost of the cheapest candidate
    pub best: Option<(usize, CostBreakdown)>,
    pub accepted: bool,
    /// Current total minus best total, when accepted
    pub estimated_savings: f64,
}

#[derive(Debug, Clone, Default)]
pub struct CostEvaluator {
    pub config: CostConfig,
}

impl CostEvaluator {
    pub fn new(config: CostConfig) -> Self {
        Self { config }
    }

    /// Delay multiplier for a lane's queue
    pub fn congestion_factor(&self, queue_length: usize) -> f64 {
        if queue_length > self.config.congested_queue {
            self.config.congestion_multiplier
                + self.config.congestion_increment
                    * (queue_length - self.config.congested_queue) as f64
        } else {
            1.0
        }
    }

    pub fn evaluate(
        &self,
        plan: &TimingPlan,
        current: &TimingPlan,
        lanes: &[LaneReading],
    ) -> CostBreakdown {
        let c = &self.config;
        let cycle_secs = (plan.computed_cycle_ms().max(1)) as f64 / 1000.0;

        let mut idle_cost = 0.0;
        let mut stop_cost = 0.0;
        let mut delay_penalty = 0.0;

        for lane in lanes {
            let green_secs = plan.green_for(lane.direction.axis()) as f64 / 1000.0;
            let red_secs = (cycle_secs - green_secs).max(0.0);
            let red_fraction = red_secs / cycle_secs;
            let projected_arrivals = lane.arrival_rate * red_secs;

            let measured_idle =
                lane.queue_length as f64 * red_secs / 2.0 + lane.average_idle_time * red_fraction;
            let projected_idle = projected_arrivals * red_secs / 2.0;
            idle_cost += c.measured_weight * measured_idle + c.projected_weight * projected_idle;

            let measured_stops = (lane.vehicle_count as f64 + lane.average_stops) * red_fraction;
            let projected_stops = projected_arrivals * red_fraction;
            stop_cost += c.measured_weight * measured_stops + c.projected_weight * projected_stops;

            delay_penalty += (lane.average_waiting_time + lane.queue_length as f64)
                * red_fraction
                * self.congestion_factor(lane.queue_length);
        }

        let delta = |a: u32, b: u32| (a as f64 - b as f64).abs() / 1000.0;
        let switch_cost = delta(plan.ew_green_ms, current.ew_green_ms)
            + delta(plan.ns_green_ms, current.ns_green_ms)
            + delta(plan.yellow_ms, current.yellow_ms)
            + delta(plan.all_red_ms, current.all_red_ms);

        let total = c.idle_weight * idle_cost
            + c.stop_weight * stop_cost
            + c.switch_weight * switch_cost
            + c.delay_weight * delay_penalty;

        CostBreakdown {
            idle_cost,
            stop_cost,
            switch_cost,
            delay_penalty,
            total,
        }
    }

    /// Strictly cheaper than `current × acceptance_threshold`
    pub fn is_improvement(&self, current_cost: f64, candidate_cost: f64) -> bool {
        candidate_cost < current_cost * self.config.acceptance_threshold
    }

    /// Score the running plan and every candidate and pick the cheapest
    pub fn select(
        &self,
        current: &TimingPlan,
        candidates: &[TimingPlan],
        lanes: &[LaneReading],
    ) -> CostSelection {
        let current_cost = self.evaluate(current, current, lanes);
        let best = candidates
            .iter()
            .map(|plan| self.evaluate(plan, current, lanes))
            .enumerate()
            .min_by(|a, b| a.1.total.total_cmp(&b.1.total));

        let accepted = best
            .as_ref()
            .is_some_and(|(_, cost)| self.is_improvement(current_cost.total, cost.total));
        let estimated_savings = match (&best, accepted) {
            (Some((_, cost)), true) => current_cost.total - cost.total,
            _ => 0.0,
        };

        CostSelection {
            current_cost,
            best,
            accepted,
            estimated_savings,
        }
    }
}
