//! Top-level scheduler
//!
//! Owns the world, the sensing and analytics layer and the orchestrator, and
//! advances the two periodic drivers: the simulation tick runs every call,
//! the optimization tick on its own longer interval.

use anyhow::Result;
use log::{debug, info};
use std::sync::Arc;

use crate::analytics::{SensorLayer, TrafficAnalytics, TrafficState};
use crate::config::SimConfig;
use crate::optimization::{OptimizationOrchestrator, OptimizationResult, OptimizationStats};
use crate::simulation::SimWorld;

/// Fires at most once per interval of simulated time
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeriodicDriver {
    pub interval_secs: f64,
    last: Option<f64>,
}

impl PeriodicDriver {
    pub fn new(interval_secs: f64) -> Self {
        Self {
            interval_secs,
            last: None,
        }
    }

    /// Whether the driver fires at `now`; marks it if so
    pub fn poll(&mut self, now: f64) -> bool {
        let due = self
            .last
            .map_or(true, |last| now - last >= self.interval_secs);
        if due {
            self.last = Some(now);
        }
        due
    }
}

/// What happened during one scheduler tick
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    pub sim_time: f64,
    pub sampled: bool,
    pub snapshot: Option<Arc<TrafficState>>,
    /// Results of the optimization tick, if it ran
    pub optimization: Option<Vec<OptimizationResult>>,
}

pub struct TrafficSystem {
    pub world: SimWorld,
    pub sensor: SensorLayer,
    pub analytics: TrafficAnalytics,
    pub orchestrator: OptimizationOrchestrator,
    optimization_driver: PeriodicDriver,
    pub ticks: u64,
}

impl TrafficSystem {
    pub fn new(config: &SimConfig, seed: Option<u64>) -> Result<Self> {
        let world = config.build_world(seed)?;
        let orchestrator = config.build_orchestrator();
        let optimization_driver = PeriodicDriver::new(orchestrator.config.interval_secs);
        Ok(Self {
            world,
            sensor: config.build_sensor(),
            analytics: config.build_analytics(),
            orchestrator,
            optimization_driver,
            ticks: 0,
        })
    }

    /// Advance the simulation by `delta_secs` and run whatever periodic work
    /// has come due
    pub fn tick(&mut self, delta_secs: f32) -> TickReport {
        self.world.tick(delta_secs);
        self.ticks += 1;
        let now = self.world.time;

        let sampled = self.sensor.poll(&mut self.world);
        let sensor = &self.sensor;
        let snapshot = self.analytics.poll(|| sensor.readings(), now);

        let optimization = if self.optimization_driver.poll(now) {
            let latest = self.analytics.latest();
            Some(self.orchestrator.run_cycle(&mut self.world, latest.as_deref()))
        } else {
            None
        };

        TickReport {
            sim_time: now,
            sampled,
            snapshot,
            optimization,
        }
    }

    /// Run `ticks` ticks, printing the map every `report_every` ticks when
    /// `draw_map` is set
    pub fn run(&mut self, ticks: u32, delta_secs: f32, report_every: u32, draw_map: bool) {
        for i in 0..ticks {
            let report = self.tick(delta_secs);
            if let Some(results) = &report.optimization {
                debug!(
                    "Tick {}: optimization ran for {} intersection(s)",
                    i,
                    results.len()
                );
            }
            if report_every > 0 && (i + 1) % report_every == 0 {
                let stats = self.orchestrator.stats();
                info!(
                    "t={:.1}s vehicles={} completed={} optimizations={} deployed={} network={}",
                    self.world.time,
                    self.world.vehicles.len(),
                    self.world.stats.vehicles_completed,
                    stats.total_optimizations,
                    stats.successful,
                    self.analytics.network_congestion()
                );
                if draw_map {
                    self.world.draw_map();
                }
            }
        }
    }

    pub fn stats(&self) -> OptimizationStats {
        self.orchestrator.stats()
    }

    /// Put every signal into its terminal ALL_RED phase
    pub fn shutdown(&mut self) {
        self.world.shutdown();
        info!("All controllers shut down");
    }

    /// Log the end-of-run report
    pub fn log_report(&self) {
        let world = &self.world.stats;
        let stats = self.orchestrator.stats();
        info!("=== SIMULATION COMPLETE ===");
        info!("Elapsed time: {:.2}s", self.world.time);
        info!("Total vehicles spawned: {}", world.vehicles_spawned);
        info!("Total vehicles completed: {}", world.vehicles_completed);
        info!("Active vehicles: {}", self.world.vehicles.len());
        info!("Total intersections: {}", self.world.intersections.len());
        info!("Average trip time: {:.1}s", world.average_trip_time());
        info!(
            "Optimizations: {} total, {} successful, {} rejected by safety, {} rejected by cost",
            stats.total_optimizations,
            stats.successful,
            stats.rejected_by_safety,
            stats.rejected_by_cost
        );
        info!(
            "No need: {}, deferred deployments: {}, skipped cycles: {}",
            stats.no_need, stats.deployments_deferred, stats.cycles_skipped
        );
        info!("Optimization success rate: {:.1}%", stats.success_rate());
        info!("Cumulative estimated savings: {:.2}", stats.cumulative_savings);
        info!("Completion rate: {:.1}%", world.completion_rate());
    }
}
