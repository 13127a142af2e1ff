//! Analytics engine
//!
//! Turns lane readings into versioned [`TrafficState`] snapshots, keeps a
//! bounded history per intersection and for the network, maintains the
//! density baseline and publishes each snapshot to subscribers.

use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::time::SystemTime;

use super::reading::LaneReading;
use super::state::{
    CongestionLevel, CongestionThresholds, IntersectionState, NetworkState, PeriodThresholds,
    PressureWeights, TrafficState,
};
use super::trend::{TrendConfig, TrendReport, TrendScope};
use crate::simulation::IntersectionId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyticsConfig {
    /// Seconds of simulated time between snapshots
    pub interval_secs: f64,
    /// Snapshots kept per intersection and for the network
    pub history_size: usize,
    pub congestion: CongestionThresholds,
    pub pressure: PressureWeights,
    pub period: PeriodThresholds,
    pub trend: TrendConfig,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            interval_secs: 2.0,
            history_size: 120,
            congestion: CongestionThresholds::default(),
            pressure: PressureWeights::default(),
            period: PeriodThresholds::default(),
            trend: TrendConfig::default(),
        }
    }
}

/// Exponentially smoothed network density
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct DensityBaseline {
    value: f64,
    samples: usize,
}

impl DensityBaseline {
    fn update(&mut self, density: f64, alpha: f64) {
        self.value = if self.samples == 0 {
            density
        } else {
            alpha * density + (1.0 - alpha) * self.value
        };
        self.samples += 1;
    }
}

pub struct TrafficAnalytics {
    config: AnalyticsConfig,
    version: u64,
    last_run: Option<f64>,
    intersection_history: BTreeMap<IntersectionId, VecDeque<IntersectionState>>,
    pressure_history: BTreeMap<IntersectionId, VecDeque<f64>>,
    network_history: VecDeque<NetworkState>,
    density_history: VecDeque<f64>,
    baseline: DensityBaseline,
    latest: Option<Arc<TrafficState>>,
    subscribers: Vec<Sender<Arc<TrafficState>>>,
}

impl TrafficAnalytics {
    pub fn new(config: AnalyticsConfig) -> Self {
        Self {
            config,
            version: 0,
            last_run: None,
            intersection_history: BTreeMap::new(),
            pressure_history: BTreeMap::new(),
            network_history: VecDeque::new(),
            density_history: VecDeque::new(),
            baseline: DensityBaseline::default(),
            latest: None,
            subscribers: Vec::new(),
        }
    }

    pub fn config(&self) -> &AnalyticsConfig {
        &self.config
    }

    pub fn is_due(&self, now: f64) -> bool {
        self.last_run
            .map_or(true, |last| now - last >= self.config.interval_secs)
    }

    /// Receive every snapshot published from now on. Dropping the receiver
    /// unsubscribes.
    pub fn subscribe(&mut self) -> Receiver<Arc<TrafficState>> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.push(tx);
        rx
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// The most recently published snapshot
    pub fn latest(&self) -> Option<Arc<TrafficState>> {
        self.latest.clone()
    }

    pub fn history(&self, id: IntersectionId) -> impl Iterator<Item = &IntersectionState> {
        self.intersection_history.get(&id).into_iter().flatten()
    }

    pub fn network_history(&self) -> impl Iterator<Item = &NetworkState> {
        self.network_history.iter()
    }

    /// Baseline density, once enough samples have accumulated to trust it
    pub fn baseline(&self) -> Option<f64> {
        (self.baseline.samples >= self.config.period.baseline_min_samples)
            .then_some(self.baseline.value)
    }

    pub fn intersection_trend(&self, id: IntersectionId) -> Option<TrendReport> {
        self.config
            .trend
            .detect(self.pressure_history.get(&id)?, TrendScope::Intersection)
    }

    pub fn network_trend(&self) -> Option<TrendReport> {
        self.config
            .trend
            .detect(&self.density_history, TrendScope::Network)
    }

    fn push_bounded<T>(queue: &mut VecDeque<T>, value: T, limit: usize) {
        if limit == 0 {
            return;
        }
        while queue.len() >= limit {
            queue.pop_front();
        }
        queue.push_back(value);
    }

    /// Build, record and publish a new snapshot from the given readings
    pub fn analyze(&mut self, lanes: Vec<LaneReading>, sim_time: f64) -> Arc<TrafficState> {
        let limit = self.config.history_size;
        let previous_congestion = self
            .latest
            .as_ref()
            .map(|s| s.network.network_congestion);

        let mut state = TrafficState::from_readings(
            self.version + 1,
            sim_time,
            lanes,
            &self.config.congestion,
            &self.config.pressure,
            &self.config.period,
        );

        for (id, intersection) in state.intersections.iter_mut() {
            let pressures = self.pressure_history.entry(*id).or_default();
            Self::push_bounded(pressures, intersection.pressure_score, limit);
            intersection.trend = self
                .config
                .trend
                .detect(pressures, TrendScope::Intersection);
            Self::push_bounded(
                self.intersection_history.entry(*id).or_default(),
                intersection.clone(),
                limit,
            );
        }

        // Classify against the baseline as it stood before this sample
        let baseline = self.baseline();
        state.network =
            NetworkState::aggregate(&state.intersections, &self.config.period, baseline);
        self.baseline
            .update(state.network.avg_density, self.config.period.baseline_alpha);
        Self::push_bounded(&mut self.density_history, state.network.avg_density, limit);
        state.network.trend = self.network_trend();
        Self::push_bounded(&mut self.network_history, state.network.clone(), limit);

        if previous_congestion != Some(state.network.network_congestion) {
            info!(
                "Network congestion {} ({}), avg density {:.2}",
                state.network.network_congestion,
                state.network.traffic_period,
                state.network.avg_density
            );
        }
        if !state.network.critical_intersections.is_empty() {
            debug!(
                "Critical intersections: {:?}",
                state.network.critical_intersections
            );
        }

        self.version = state.version;
        self.last_run = Some(sim_time);
        let snapshot = Arc::new(state);
        self.publish(&snapshot);
        snapshot
    }

    /// Run [`analyze`](Self::analyze) if the interval has elapsed
    pub fn poll(&mut self, lanes: impl FnOnce() -> Vec<LaneReading>, now: f64) -> Option<Arc<TrafficState>> {
        if !self.is_due(now) {
            return None;
        }
        Some(self.analyze(lanes(), now))
    }

    fn publish(&mut self, snapshot: &Arc<TrafficState>) {
        let before = self.subscribers.len();
        self.subscribers
            .retain(|tx| tx.send(Arc::clone(snapshot)).is_ok());
        if self.subscribers.len() < before {
            debug!(
                "Dropped {} disconnected subscriber(s)",
                before - self.subscribers.len()
            );
        }
        self.latest = Some(Arc::clone(snapshot));
    }

    /// Wall-clock time of the latest snapshot
    pub fn latest_wall_clock(&self) -> Option<SystemTime> {
        self.latest.as_ref().map(|s| s.wall_clock)
    }

    pub fn network_congestion(&self) -> CongestionLevel {
        self.latest
            .as_ref()
            .map_or(CongestionLevel::Low, |s| s.network.network_congestion)
    }
}
