//! Lane sensing
//!
//! The sensor layer samples every approach lane on its own interval and keeps
//! the latest reading per (intersection, direction).

use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::SystemTime;

use crate::simulation::{Direction, IntersectionId, LaneMetrics, SimWorld};

/// One sample of one approach lane
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaneReading {
    pub intersection: IntersectionId,
    pub direction: Direction,
    pub vehicle_count: usize,
    pub queue_length: usize,
    /// Seconds
    pub average_waiting_time: f64,
    pub occupancy_rate: f64,
    pub capacity: usize,
    pub is_full: bool,
    pub average_stops: f64,
    /// Seconds
    pub average_idle_time: f64,
    /// Vehicles per second
    pub arrival_rate: f64,
    pub wall_clock: SystemTime,
    pub sim_time: f64,
}

impl LaneReading {
    pub fn from_metrics(
        intersection: IntersectionId,
        direction: Direction,
        metrics: &LaneMetrics,
        sim_time: f64,
        wall_clock: SystemTime,
    ) -> Self {
        Self {
            intersection,
            direction,
            vehicle_count: metrics.vehicle_count,
            queue_length: metrics.queue_length,
            average_waiting_time: metrics.average_waiting_time,
            occupancy_rate: metrics.occupancy_rate,
            capacity: metrics.capacity,
            is_full: metrics.is_full,
            average_stops: metrics.average_stops,
            average_idle_time: metrics.average_idle_time,
            arrival_rate: metrics.arrival_rate,
            wall_clock,
            sim_time,
        }
    }

    /// An empty lane reading, mostly useful for building states by hand
    pub fn empty(intersection: IntersectionId, direction: Direction, capacity: usize) -> Self {
        Self::from_metrics(
            intersection,
            direction,
            &LaneMetrics {
                capacity,
                ..LaneMetrics::default()
            },
            0.0,
            SystemTime::UNIX_EPOCH,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    /// Seconds of simulated time between samples
    pub sample_interval_secs: f64,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            sample_interval_secs: 1.0,
        }
    }
}

/// Periodic lane sampler
#[derive(Debug, Default)]
pub struct SensorLayer {
    config: SensorConfig,
    latest: BTreeMap<(IntersectionId, Direction), LaneReading>,
    last_sample: Option<f64>,
    pub samples_taken: u64,
}

impl SensorLayer {
    pub fn new(config: SensorConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn is_due(&self, now: f64) -> bool {
        self.last_sample
            .map_or(true, |last| now - last >= self.config.sample_interval_secs)
    }

    /// Sample every lane of the world unconditionally
    pub fn sample(&mut self, world: &mut SimWorld) -> usize {
        let now = world.time;
        let wall_clock = SystemTime::now();
        let metrics = world.lane_metrics();
        let count = metrics.len();
        for (intersection, direction, m) in metrics {
            self.latest.insert(
                (intersection, direction),
                LaneReading::from_metrics(intersection, direction, &m, now, wall_clock),
            );
        }
        self.last_sample = Some(now);
        self.samples_taken += 1;
        debug!("Sensor sample at {:.1}s: {} lanes", now, count);
        count
    }

    /// Sample if the interval has elapsed. Returns whether a sample was taken.
    pub fn poll(&mut self, world: &mut SimWorld) -> bool {
        if !self.is_due(world.time) {
            return false;
        }
        self.sample(world);
        true
    }

    pub fn reading(&self, intersection: IntersectionId, direction: Direction) -> Option<&LaneReading> {
        self.latest.get(&(intersection, direction))
    }

    /// Latest reading of every lane
    pub fn readings(&self) -> Vec<LaneReading> {
        self.latest.values().cloned().collect()
    }
}
