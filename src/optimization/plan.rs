//! Timing plans
//!
//! A plan is a plain value. Cycle time is always derived from the phase
//! durations, so "changing" a plan means building a new one.

use serde::{Deserialize, Serialize};

use crate::simulation::{Axis, Direction, SignalTimings, TimingUpdate};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Turn {
    Through,
    Left,
    Right,
}

/// One signalled movement through an intersection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Movement {
    pub approach: Direction,
    pub turn: Turn,
}

impl Movement {
    pub fn new(approach: Direction, turn: Turn) -> Self {
        Self { approach, turn }
    }

    pub fn axis(&self) -> Axis {
        self.approach.axis()
    }

    /// Movements from different axes may never be green together
    pub fn conflicts_with(&self, other: &Movement) -> bool {
        self.axis() != other.axis()
    }
}

/// A custom phase: the movements it serves and for how long
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseSpec {
    pub name: String,
    pub movements: Vec<Movement>,
    pub duration_ms: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingPlan {
    pub ew_green_ms: u32,
    pub ns_green_ms: u32,
    pub yellow_ms: u32,
    pub all_red_ms: u32,
    pub cycle_time_ms: u32,
    pub phases: Option<Vec<PhaseSpec>>,
}

impl TimingPlan {
    pub fn new(ew_green_ms: u32, ns_green_ms: u32, yellow_ms: u32, all_red_ms: u32) -> Self {
        Self {
            ew_green_ms,
            ns_green_ms,
            yellow_ms,
            all_red_ms,
            cycle_time_ms: Self::cycle_of(ew_green_ms, ns_green_ms, yellow_ms, all_red_ms),
            phases: None,
        }
    }

    fn cycle_of(ew: u32, ns: u32, yellow: u32, all_red: u32) -> u32 {
        ew.saturating_add(ns)
            .saturating_add(yellow.saturating_add(all_red).saturating_mul(2))
    }

    /// Yellow and all-red once per axis
    pub fn clearance_ms(&self) -> u32 {
        self.yellow_ms.saturating_add(self.all_red_ms).saturating_mul(2)
    }

    /// Cycle time recomputed from the components
    pub fn computed_cycle_ms(&self) -> u32 {
        Self::cycle_of(self.ew_green_ms, self.ns_green_ms, self.yellow_ms, self.all_red_ms)
    }

    pub fn is_consistent(&self) -> bool {
        self.cycle_time_ms == self.computed_cycle_ms()
    }

    pub fn green_for(&self, axis: Axis) -> u32 {
        match axis {
            Axis::EastWest => self.ew_green_ms,
            Axis::NorthSouth => self.ns_green_ms,
        }
    }

    pub fn total_green_ms(&self) -> u32 {
        self.ew_green_ms.saturating_add(self.ns_green_ms)
    }

    /// Same clearance, new greens
    pub fn with_greens(&self, ew_green_ms: u32, ns_green_ms: u32) -> Self {
        Self {
            phases: self.phases.clone(),
            ..Self::new(ew_green_ms, ns_green_ms, self.yellow_ms, self.all_red_ms)
        }
    }

    pub fn with_phases(mut self, phases: Vec<PhaseSpec>) -> Self {
        self.phases = Some(phases);
        self
    }

    /// Give `axis` `delta_ms` more green (or less, if negative) taken from
    /// the other axis, never dropping either below `min_green_ms`
    pub fn shifted(&self, axis: Axis, delta_ms: i64, min_green_ms: u32) -> Self {
        let total = self.total_green_ms() as i64;
        let min = min_green_ms as i64;
        let favoured =
            (self.green_for(axis) as i64 + delta_ms).clamp(min.min(total), (total - min).max(min));
        let other = (total - favoured).max(min);
        match axis {
            Axis::EastWest => self.with_greens(favoured as u32, other as u32),
            Axis::NorthSouth => self.with_greens(other as u32, favoured as u32),
        }
    }

    /// Split `total_green_ms` by the EW share in [0, 1]
    pub fn split(&self, total_green_ms: u32, ew_share: f64, min_green_ms: u32) -> Self {
        let share = ew_share.clamp(0.0, 1.0);
        let ew = ((total_green_ms as f64 * share).round() as u32).max(min_green_ms);
        let ns = total_green_ms.saturating_sub(ew).max(min_green_ms);
        self.with_greens(ew, ns)
    }

    /// Rescale the greens proportionally so the cycle lands within bounds
    pub fn normalized(&self, min_cycle_ms: u32, max_cycle_ms: u32, min_green_ms: u32) -> Self {
        let cycle = self.computed_cycle_ms();
        let target = cycle.clamp(min_cycle_ms, max_cycle_ms.max(min_cycle_ms));
        if target == cycle {
            return self.with_greens(self.ew_green_ms, self.ns_green_ms);
        }
        let available = target.saturating_sub(self.clearance_ms());
        let total = self.total_green_ms().max(1) as f64;
        let floor = min_green_ms.min(available);
        let ceiling = available.saturating_sub(min_green_ms).max(floor);
        let ew = ((self.ew_green_ms as f64 / total) * available as f64).round() as u32;
        let ew = ew.clamp(floor, ceiling);
        let ns = available.saturating_sub(ew);
        self.with_greens(ew, ns)
    }

    pub fn to_timings(&self) -> SignalTimings {
        SignalTimings {
            ew_green_ms: self.ew_green_ms,
            ns_green_ms: self.ns_green_ms,
            yellow_ms: self.yellow_ms,
            all_red_ms: self.all_red_ms,
        }
    }

    /// Retiming request for a controller
    pub fn to_update(&self) -> TimingUpdate {
        TimingUpdate::to_timings(&self.to_timings())
    }
}

impl From<SignalTimings> for TimingPlan {
    fn from(t: SignalTimings) -> Self {
        Self::new(t.ew_green_ms, t.ns_green_ms, t.yellow_ms, t.all_red_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_is_closed_form() {
        let plan = TimingPlan::new(20_000, 25_000, 3_000, 2_000);
        assert_eq!(plan.cycle_time_ms, 55_000);
        assert!(plan.is_consistent());
        assert!(plan.with_greens(30_000, 10_000).is_consistent());
    }

    #[test]
    fn shifting_keeps_total_green() {
        let plan = TimingPlan::new(20_000, 20_000, 3_000, 2_000);
        let shifted = plan.shifted(Axis::NorthSouth, 5_000, 5_000);
        assert_eq!(shifted.ns_green_ms, 25_000);
        assert_eq!(shifted.ew_green_ms, 15_000);
        let floored = plan.shifted(Axis::EastWest, -30_000, 5_000);
        assert_eq!(floored.ew_green_ms, 5_000);
        assert_eq!(floored.ns_green_ms, 35_000);
    }

    #[test]
    fn normalization_rescales_into_cycle_bounds() {
        let plan = TimingPlan::new(100_000, 100_000, 3_000, 2_000);
        let n = plan.normalized(30_000, 180_000, 5_000);
        assert_eq!(n.cycle_time_ms, 180_000);
        assert_eq!(n.ew_green_ms, n.ns_green_ms);

        let short = TimingPlan::new(5_000, 5_000, 3_000, 2_000).normalized(30_000, 180_000, 5_000);
        assert_eq!(short.cycle_time_ms, 30_000);
    }

    #[test]
    fn cross_axis_movements_conflict() {
        let east = Movement::new(Direction::Eastbound, Turn::Through);
        let west_left = Movement::new(Direction::Westbound, Turn::Left);
        let north = Movement::new(Direction::Northbound, Turn::Right);
        assert!(!east.conflicts_with(&west_left));
        assert!(east.conflicts_with(&north));
    }
}
