//! Decide whether an intersection needs retiming at all

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::analytics::TrafficState;
use crate::simulation::IntersectionId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NeedConfig {
    pub queue_threshold: usize,
    pub wait_threshold_secs: f64,
    /// Max-to-min approach demand ratio that counts as imbalance
    pub imbalance_ratio: f64,
    /// Smallest demand used as the ratio's denominator
    pub min_demand_floor: f64,
    /// Imbalance is ignored unless the busiest approach has at least this
    /// many vehicles
    pub imbalance_min_demand: f64,
    pub reoptimize_interval_secs: f64,
}

impl Default for NeedConfig {
    fn default() -> Self {
        Self {
            queue_threshold: 10,
            wait_threshold_secs: 60.0,
            imbalance_ratio: 3.0,
            min_demand_floor: 1.0,
            imbalance_min_demand: 4.0,
            reoptimize_interval_secs: 30.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NeedReason {
    QueueExceeded,
    WaitExceeded,
    DemandImbalance,
    IntervalElapsed,
    MaintainCurrent,
}

impl NeedReason {
    pub fn message(self) -> &'static str {
        match self {
            NeedReason::QueueExceeded => "Queue length exceeded threshold",
            NeedReason::WaitExceeded => "Wait time exceeded limit",
            NeedReason::DemandImbalance => "Demand imbalance exceeded ratio",
            NeedReason::IntervalElapsed => "Re-optimization interval elapsed",
            NeedReason::MaintainCurrent => "Maintain current timing",
        }
    }
}

impl fmt::Display for NeedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NeedEvaluation {
    pub optimization_required: bool,
    pub reason: NeedReason,
    pub max_queue: usize,
    pub max_wait_secs: f64,
    pub imbalance_ratio: f64,
}

impl NeedEvaluation {
    pub fn reason_text(&self) -> &'static str {
        self.reason.message()
    }
}

#[derive(Debug, Clone, Default)]
pub struct NeedEvaluator {
    pub config: NeedConfig,
}

impl NeedEvaluator {
    pub fn new(config: NeedConfig) -> Self {
        Self { config }
    }

    /// The first triggered condition wins, in the order queue, wait,
    /// imbalance, interval. `last_triggered` is the last run that asked for
    /// a retiming; with none the interval counts from time zero.
    pub fn evaluate(
        &self,
        intersection: IntersectionId,
        state: &TrafficState,
        last_triggered: Option<f64>,
        now: f64,
    ) -> NeedEvaluation {
        let mut max_queue = 0;
        let mut max_wait_secs: f64 = 0.0;
        let mut max_demand: f64 = 0.0;
        let mut min_demand = f64::INFINITY;

        for lane in state.lanes_for(intersection) {
            max_queue = max_queue.max(lane.queue_length);
            max_wait_secs = max_wait_secs.max(lane.average_waiting_time);
            let demand = lane.vehicle_count as f64;
            max_demand = max_demand.max(demand);
            min_demand = min_demand.min(demand);
        }

        let imbalance_ratio = if min_demand.is_finite() {
            max_demand / min_demand.max(self.config.min_demand_floor)
        } else {
            0.0
        };

        let elapsed = now - last_triggered.unwrap_or(0.0);

        let reason = if max_queue > self.config.queue_threshold {
            NeedReason::QueueExceeded
        } else if max_wait_secs > self.config.wait_threshold_secs {
            NeedReason::WaitExceeded
        } else if max_demand >= self.config.imbalance_min_demand
            && imbalance_ratio > self.config.imbalance_ratio
        {
            NeedReason::DemandImbalance
        } else if elapsed >= self.config.reoptimize_interval_secs {
            NeedReason::IntervalElapsed
        } else {
            NeedReason::MaintainCurrent
        };

        NeedEvaluation {
            optimization_required: reason != NeedReason::MaintainCurrent,
            reason,
            max_queue,
            max_wait_secs,
            imbalance_ratio,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::{
        CongestionThresholds, LaneReading, PeriodThresholds, PressureWeights,
    };
    use crate::simulation::{Direction, SimId};

    fn state(lanes: Vec<LaneReading>) -> TrafficState {
        TrafficState::from_readings(
            1,
            0.0,
            lanes,
            &CongestionThresholds::default(),
            &PressureWeights::default(),
            &PeriodThresholds::default(),
        )
    }

    #[test]
    fn quiet_intersection_keeps_timing() {
        let id = IntersectionId(SimId(0));
        let lanes = Direction::ALL
            .iter()
            .map(|d| LaneReading::empty(id, *d, 20))
            .collect();
        let eval = NeedEvaluator::default().evaluate(id, &state(lanes), Some(0.0), 10.0);
        assert!(!eval.optimization_required);
        assert_eq!(eval.reason_text(), "Maintain current timing");
    }

    #[test]
    fn imbalance_needs_enough_demand() {
        let id = IntersectionId(SimId(0));
        let mut busy = LaneReading::empty(id, Direction::Eastbound, 20);
        busy.vehicle_count = 3;
        let idle = LaneReading::empty(id, Direction::Northbound, 20);
        let evaluator = NeedEvaluator::default();
        let eval = evaluator.evaluate(id, &state(vec![busy.clone(), idle.clone()]), Some(0.0), 1.0);
        assert_eq!(eval.reason, NeedReason::MaintainCurrent);

        busy.vehicle_count = 4;
        let eval = evaluator.evaluate(id, &state(vec![busy, idle]), Some(0.0), 1.0);
        assert_eq!(eval.reason, NeedReason::DemandImbalance);
    }

    #[test]
    fn interval_elapsed() {
        let id = IntersectionId(SimId(0));
        let lanes = vec![LaneReading::empty(id, Direction::Eastbound, 20)];
        let evaluator = NeedEvaluator::default();
        assert_eq!(
            evaluator.evaluate(id, &state(lanes.clone()), Some(10.0), 40.0).reason,
            NeedReason::IntervalElapsed
        );
        assert_eq!(
            evaluator.evaluate(id, &state(lanes), None, 29.0).reason,
            NeedReason::MaintainCurrent
        );
    }
}
