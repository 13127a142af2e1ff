//! Traffic state snapshots and their classification tables

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::SystemTime;

use super::reading::LaneReading;
use super::trend::TrendReport;
use crate::simulation::{Direction, IntersectionId};

/// Ordinal congestion classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CongestionLevel {
    #[default]
    Low,
    Medium,
    High,
    Critical,
}

impl CongestionLevel {
    /// Weight used when averaging levels across the network
    pub fn score(self) -> u8 {
        match self {
            CongestionLevel::Low => 1,
            CongestionLevel::Medium => 2,
            CongestionLevel::High => 3,
            CongestionLevel::Critical => 4,
        }
    }

    /// Nearest level to an averaged score
    pub fn from_score(score: f64) -> Self {
        match score.round() as i64 {
            i64::MIN..=1 => CongestionLevel::Low,
            2 => CongestionLevel::Medium,
            3 => CongestionLevel::High,
            _ => CongestionLevel::Critical,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            CongestionLevel::Low => "LOW",
            CongestionLevel::Medium => "MEDIUM",
            CongestionLevel::High => "HIGH",
            CongestionLevel::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for CongestionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Network load classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrafficPeriod {
    #[default]
    OffPeak,
    Peak,
    RushHour,
}

impl fmt::Display for TrafficPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TrafficPeriod::OffPeak => "OFF_PEAK",
            TrafficPeriod::Peak => "PEAK",
            TrafficPeriod::RushHour => "RUSH_HOUR",
        })
    }
}

/// Minimum (queue, wait, density) at which a level applies. Any one of the
/// three reaching its cutoff is enough.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CongestionCutoff {
    pub queue: usize,
    pub wait_secs: f64,
    pub density: f64,
}

impl CongestionCutoff {
    fn reached(&self, queue: usize, wait_secs: f64, density: f64) -> bool {
        queue >= self.queue || wait_secs >= self.wait_secs || density >= self.density
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CongestionThresholds {
    pub critical: CongestionCutoff,
    pub high: CongestionCutoff,
    pub medium: CongestionCutoff,
}

impl Default for CongestionThresholds {
    fn default() -> Self {
        Self {
            critical: CongestionCutoff {
                queue: 15,
                wait_secs: 90.0,
                density: 0.85,
            },
            high: CongestionCutoff {
                queue: 10,
                wait_secs: 60.0,
                density: 0.65,
            },
            medium: CongestionCutoff {
                queue: 5,
                wait_secs: 30.0,
                density: 0.40,
            },
        }
    }
}

impl CongestionThresholds {
    pub fn classify(&self, queue: usize, wait_secs: f64, density: f64) -> CongestionLevel {
        if self.critical.reached(queue, wait_secs, density) {
            CongestionLevel::Critical
        } else if self.high.reached(queue, wait_secs, density) {
            CongestionLevel::High
        } else if self.medium.reached(queue, wait_secs, density) {
            CongestionLevel::Medium
        } else {
            CongestionLevel::Low
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PressureWeights {
    pub density: f64,
    pub queue: f64,
    pub wait: f64,
    /// Queue length counted as full pressure
    pub queue_saturation: f64,
    /// Wait in seconds counted as full pressure
    pub wait_saturation_secs: f64,
}

impl Default for PressureWeights {
    fn default() -> Self {
        Self {
            density: 0.4,
            queue: 0.35,
            wait: 0.25,
            queue_saturation: 20.0,
            wait_saturation_secs: 120.0,
        }
    }
}

impl PressureWeights {
    /// Composite stress in [0, 100]
    pub fn score(&self, density: f64, queue: usize, wait_secs: f64) -> f64 {
        let d = density.clamp(0.0, 1.0);
        let q = (queue as f64 / self.queue_saturation.max(f64::EPSILON)).clamp(0.0, 1.0);
        let w = (wait_secs / self.wait_saturation_secs.max(f64::EPSILON)).clamp(0.0, 1.0);
        ((self.density * d + self.queue * q + self.wait * w) * 100.0).clamp(0.0, 100.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeriodThresholds {
    pub rush_hour_density: f64,
    pub peak_density: f64,
    /// Smoothing factor of the density baseline
    pub baseline_alpha: f64,
    /// Samples needed before the baseline is trusted
    pub baseline_min_samples: usize,
    pub rush_hour_ratio: f64,
    pub peak_ratio: f64,
}

impl Default for PeriodThresholds {
    fn default() -> Self {
        Self {
            rush_hour_density: 0.6,
            peak_density: 0.3,
            baseline_alpha: 0.1,
            baseline_min_samples: 10,
            rush_hour_ratio: 1.5,
            peak_ratio: 1.2,
        }
    }
}

impl PeriodThresholds {
    /// Classify from absolute density and network congestion
    pub fn classify_fixed(&self, avg_density: f64, congestion: CongestionLevel) -> TrafficPeriod {
        if avg_density >= self.rush_hour_density || congestion >= CongestionLevel::High {
            TrafficPeriod::RushHour
        } else if avg_density >= self.peak_density || congestion >= CongestionLevel::Medium {
            TrafficPeriod::Peak
        } else {
            TrafficPeriod::OffPeak
        }
    }

    /// Classify by ratio to the smoothed baseline density
    pub fn classify_relative(&self, avg_density: f64, baseline: f64) -> TrafficPeriod {
        if baseline <= f64::EPSILON {
            return if avg_density > 0.0 {
                TrafficPeriod::RushHour
            } else {
                TrafficPeriod::OffPeak
            };
        }
        let ratio = avg_density / baseline;
        if ratio >= self.rush_hour_ratio {
            TrafficPeriod::RushHour
        } else if ratio >= self.peak_ratio {
            TrafficPeriod::Peak
        } else {
            TrafficPeriod::OffPeak
        }
    }
}

/// Aggregate state of one intersection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntersectionState {
    pub intersection: IntersectionId,
    pub total_vehicles: usize,
    pub total_capacity: usize,
    pub total_queue: usize,
    /// Mean of the approach lanes' average waits, in seconds
    pub avg_wait_time: f64,
    pub density: f64,
    pub congestion_level: CongestionLevel,
    pub pressure_score: f64,
    /// Approach with the longest queue, if any vehicle is queued
    pub dominant_direction: Option<Direction>,
    pub trend: Option<TrendReport>,
}

impl IntersectionState {
    /// Aggregate the readings of one intersection's approaches
    pub fn from_readings<'a>(
        intersection: IntersectionId,
        readings: impl IntoIterator<Item = &'a LaneReading>,
        congestion: &CongestionThresholds,
        pressure: &PressureWeights,
    ) -> Self {
        let mut total_vehicles = 0;
        let mut total_capacity = 0;
        let mut total_queue = 0;
        let mut wait_sum = 0.0;
        let mut lanes = 0usize;
        let mut dominant: Option<(usize, usize, Direction)> = None;

        for reading in readings {
            total_vehicles += reading.vehicle_count;
            total_capacity += reading.capacity;
            total_queue += reading.queue_length;
            wait_sum += reading.average_waiting_time;
            lanes += 1;
            if reading.queue_length > 0 {
                let key = (reading.queue_length, reading.vehicle_count, reading.direction);
                if dominant.map_or(true, |(q, v, _)| (key.0, key.1) > (q, v)) {
                    dominant = Some(key);
                }
            }
        }

        let avg_wait_time = if lanes == 0 {
            0.0
        } else {
            wait_sum / lanes as f64
        };
        let density = if total_capacity == 0 {
            0.0
        } else {
            total_vehicles as f64 / total_capacity as f64
        };

        Self {
            intersection,
            total_vehicles,
            total_capacity,
            total_queue,
            avg_wait_time,
            density,
            congestion_level: congestion.classify(total_queue, avg_wait_time, density),
            pressure_score: pressure.score(density, total_queue, avg_wait_time),
            dominant_direction: dominant.map(|(_, _, d)| d),
            trend: None,
        }
    }

    pub fn is_critical(&self) -> bool {
        self.congestion_level >= CongestionLevel::High || self.pressure_score > 70.0
    }
}

/// Network-wide aggregate
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NetworkState {
    pub avg_density: f64,
    pub network_congestion: CongestionLevel,
    pub traffic_period: TrafficPeriod,
    /// Ranked by pressure, highest first
    pub critical_intersections: Vec<IntersectionId>,
    pub total_queue: usize,
    pub trend: Option<TrendReport>,
}

/// One immutable analytics snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrafficState {
    /// Increases by one with every published snapshot
    pub version: u64,
    pub sim_time: f64,
    pub wall_clock: SystemTime,
    pub lanes: Vec<LaneReading>,
    pub intersections: BTreeMap<IntersectionId, IntersectionState>,
    pub network: NetworkState,
}

impl TrafficState {
    pub fn intersection(&self, id: IntersectionId) -> Option<&IntersectionState> {
        self.intersections.get(&id)
    }

    /// Readings of one intersection's approaches
    pub fn lanes_for(&self, id: IntersectionId) -> impl Iterator<Item = &LaneReading> {
        self.lanes.iter().filter(move |r| r.intersection == id)
    }

    /// Simulated seconds since this snapshot was produced
    pub fn age(&self, now: f64) -> f64 {
        (now - self.sim_time).max(0.0)
    }

    /// Build a snapshot directly from readings, without history or baseline
    pub fn from_readings(
        version: u64,
        sim_time: f64,
        lanes: Vec<LaneReading>,
        congestion: &CongestionThresholds,
        pressure: &PressureWeights,
        period: &PeriodThresholds,
    ) -> Self {
        let mut ids: Vec<IntersectionId> = lanes.iter().map(|r| r.intersection).collect();
        ids.sort();
        ids.dedup();

        let intersections: BTreeMap<IntersectionId, IntersectionState> = ids
            .into_iter()
            .map(|id| {
                let state = IntersectionState::from_readings(
                    id,
                    lanes.iter().filter(|r| r.intersection == id),
                    congestion,
                    pressure,
                );
                (id, state)
            })
            .collect();

        let network = NetworkState::aggregate(&intersections, period, None);
        Self {
            version,
            sim_time,
            wall_clock: SystemTime::now(),
            lanes,
            intersections,
            network,
        }
    }
}

impl NetworkState {
    /// Combine intersection states. With a trusted baseline the period is
    /// classified relative to it, otherwise by fixed thresholds.
    pub fn aggregate(
        intersections: &BTreeMap<IntersectionId, IntersectionState>,
        period: &PeriodThresholds,
        baseline: Option<f64>,
    ) -> Self {
        if intersections.is_empty() {
            return Self::default();
        }
        let n = intersections.len() as f64;
        let avg_density = intersections.values().map(|s| s.density).sum::<f64>() / n;
        let avg_score = intersections
            .values()
            .map(|s| s.congestion_level.score() as f64)
            .sum::<f64>()
            / n;
        let network_congestion = CongestionLevel::from_score(avg_score);

        let traffic_period = match baseline {
            Some(b) => period.classify_relative(avg_density, b),
            None => period.classify_fixed(avg_density, network_congestion),
        };

        let mut critical: Vec<&IntersectionState> =
            intersections.values().filter(|s| s.is_critical()).collect();
        critical.sort_by(|a, b| b.pressure_score.total_cmp(&a.pressure_score));

        Self {
            avg_density,
            network_congestion,
            traffic_period,
            critical_intersections: critical.into_iter().map(|s| s.intersection).collect(),
            total_queue: intersections.values().map(|s| s.total_queue).sum(),
            trend: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::SimId;

    #[test]
    fn congestion_cutoffs() {
        let t = CongestionThresholds::default();
        assert_eq!(t.classify(0, 0.0, 0.0), CongestionLevel::Low);
        assert_eq!(t.classify(5, 0.0, 0.0), CongestionLevel::Medium);
        assert_eq!(t.classify(0, 60.0, 0.0), CongestionLevel::High);
        assert_eq!(t.classify(0, 0.0, 0.9), CongestionLevel::Critical);
        assert_eq!(t.classify(4, 29.0, 0.39), CongestionLevel::Low);
    }

    #[test]
    fn pressure_is_bounded() {
        let w = PressureWeights::default();
        assert_eq!(w.score(0.0, 0, 0.0), 0.0);
        assert!((w.score(5.0, 500, 1e6) - 100.0).abs() < 1e-9);
        assert!((w.score(0.5, 10, 60.0) - 50.0).abs() < 1e-9);
    }

    #[test]
    fn score_rounding() {
        assert_eq!(CongestionLevel::from_score(1.4), CongestionLevel::Low);
        assert_eq!(CongestionLevel::from_score(2.5), CongestionLevel::High);
        assert_eq!(CongestionLevel::from_score(3.6), CongestionLevel::Critical);
    }

    #[test]
    fn relative_period() {
        let p = PeriodThresholds::default();
        assert_eq!(p.classify_relative(0.3, 0.2), TrafficPeriod::RushHour);
        assert_eq!(p.classify_relative(0.25, 0.2), TrafficPeriod::Peak);
        assert_eq!(p.classify_relative(0.2, 0.2), TrafficPeriod::OffPeak);
    }

    #[test]
    fn dominant_direction_is_longest_queue() {
        let id = IntersectionId(SimId(0));
        let mut east = LaneReading::empty(id, Direction::Eastbound, 10);
        east.queue_length = 2;
        east.vehicle_count = 2;
        let mut north = LaneReading::empty(id, Direction::Northbound, 10);
        north.queue_length = 6;
        north.vehicle_count = 7;
        let state = IntersectionState::from_readings(
            id,
            [&east, &north],
            &CongestionThresholds::default(),
            &PressureWeights::default(),
        );
        assert_eq!(state.dominant_direction, Some(Direction::Northbound));
        assert_eq!(state.total_queue, 8);
        assert!((state.density - 0.45).abs() < 1e-9);
        assert_eq!(state.congestion_level, CongestionLevel::Medium);
    }
}
