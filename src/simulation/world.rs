//! Main simulation world that ties everything together
//!
//! The world is the single registry of intersections, lanes and vehicles,
//! all keyed by stable ids. It advances signal countdowns, spawns vehicles
//! at the grid boundary and runs the motion resolver each tick.

use anyhow::{Context, Result};
use log::{debug, info};
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use rand::Rng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::intersection::SimIntersection;
use super::lane::{Lane, LaneMetrics, LaneTable};
use super::motion::{MotionOutcome, MotionResolver, VehicleConfig};
use super::road_network::{GridNetwork, NodeKey};
use super::signal::{Phase, SignalConfig, SignalController};
use super::types::{Direction, IntersectionId, LaneId, Position, SimId, VehicleId};
use super::vehicle::Vehicle;

/// Grid layout and demand
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    pub rows: usize,
    pub cols: usize,
    /// Distance between neighbouring intersections, in metres
    pub spacing: f32,
    /// Length of the stub road from each boundary point to the grid
    pub approach_length: f32,
    /// Spawn probability per boundary point per second
    pub spawn_rate: f32,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            rows: 3,
            cols: 3,
            spacing: 120.0,
            approach_length: 120.0,
            spawn_rate: 0.12,
        }
    }
}

/// Running counters for the world
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorldStats {
    pub vehicles_spawned: u64,
    pub vehicles_completed: u64,
    /// Spawn attempts refused because the entry lane had no room
    pub spawns_blocked: u64,
    pub total_trip_time: f64,
    pub stop_line_crossings: u64,
}

impl WorldStats {
    pub fn average_trip_time(&self) -> f64 {
        if self.vehicles_completed == 0 {
            0.0
        } else {
            self.total_trip_time / self.vehicles_completed as f64
        }
    }

    pub fn completion_rate(&self) -> f64 {
        if self.vehicles_spawned == 0 {
            0.0
        } else {
            self.vehicles_completed as f64 / self.vehicles_spawned as f64 * 100.0
        }
    }
}

/// The main simulation world
pub struct SimWorld {
    /// Road network for routing
    pub road_network: GridNetwork,

    /// All intersections, each owning its signal controller
    pub intersections: BTreeMap<IntersectionId, SimIntersection>,

    /// All approach lanes
    pub lanes: LaneTable,

    /// All vehicles
    pub vehicles: BTreeMap<VehicleId, Vehicle>,

    resolver: MotionResolver,

    grid: GridConfig,

    /// Next ID to assign
    next_id: usize,

    /// Simulation time in seconds
    pub time: f64,

    /// Optional seeded RNG for reproducible simulations
    rng: Option<StdRng>,

    pub stats: WorldStats,
}

impl SimWorld {
    fn new_internal(
        grid: GridConfig,
        vehicle: VehicleConfig,
        rng: Option<StdRng>,
    ) -> Self {
        Self {
            road_network: GridNetwork::new(),
            intersections: BTreeMap::new(),
            lanes: LaneTable::new(),
            vehicles: BTreeMap::new(),
            resolver: MotionResolver::new(vehicle),
            grid,
            next_id: 0,
            time: 0.0,
            rng,
            stats: WorldStats::default(),
        }
    }

    /// Build a signalled grid from configuration
    pub fn new(grid: GridConfig, vehicle: VehicleConfig, signal: SignalConfig) -> Result<Self> {
        let mut world = Self::new_internal(grid, vehicle, None);
        world.build_grid(&signal)?;
        Ok(world)
    }

    /// Build a signalled grid with a seeded RNG for reproducible simulations
    pub fn new_with_seed(
        grid: GridConfig,
        vehicle: VehicleConfig,
        signal: SignalConfig,
        seed: u64,
    ) -> Result<Self> {
        let mut world = Self::new_internal(grid, vehicle, Some(StdRng::seed_from_u64(seed)));
        world.build_grid(&signal)?;
        Ok(world)
    }

    /// Create a default 3x3 world
    pub fn create_test_world() -> Result<Self> {
        Self::new(
            GridConfig::default(),
            VehicleConfig::default(),
            SignalConfig::default(),
        )
    }

    /// Create a default world with a seeded RNG for reproducible simulations
    pub fn create_test_world_with_seed(seed: u64) -> Result<Self> {
        Self::new_with_seed(
            GridConfig::default(),
            VehicleConfig::default(),
            SignalConfig::default(),
            seed,
        )
    }

    /// Get a random value in the given range, using seeded RNG if available
    fn random_range(&mut self, range: std::ops::Range<f32>) -> f32 {
        match &mut self.rng {
            Some(rng) => rng.random_range(range),
            None => rand::rng().random_range(range),
        }
    }

    /// Choose a random element from a slice, using seeded RNG if available
    fn choose_random<'a, T>(&mut self, slice: &'a [T]) -> Option<&'a T> {
        match &mut self.rng {
            Some(rng) => slice.choose(rng),
            None => slice.choose(&mut rand::rng()),
        }
    }

    fn next_sim_id(&mut self) -> SimId {
        let id = SimId(self.next_id);
        self.next_id += 1;
        id
    }

    pub fn grid(&self) -> &GridConfig {
        &self.grid
    }

    pub fn vehicle_config(&self) -> &VehicleConfig {
        &self.resolver.config
    }

    fn build_grid(&mut self, signal: &SignalConfig) -> Result<()> {
        let rows = self.grid.rows.max(1);
        let cols = self.grid.cols.max(1);
        let spacing = self.grid.spacing;
        let stub = self.grid.approach_length;

        let mut ids = vec![vec![IntersectionId(SimId(0)); cols]; rows];
        for (row, row_ids) in ids.iter_mut().enumerate() {
            for (col, slot) in row_ids.iter_mut().enumerate() {
                let position = Position::new(col as f32 * spacing, row as f32 * spacing);
                let id = IntersectionId(self.next_sim_id());
                self.intersections.insert(
                    id,
                    SimIntersection::new(id, position, row, col, signal.clone()),
                );
                self.road_network
                    .add_node(NodeKey::Intersection(id), position);
                *slot = id;
            }
        }

        for row in 0..rows {
            for col in 0..cols {
                if col + 1 < cols {
                    self.road_network.add_two_way_road(
                        NodeKey::Intersection(ids[row][col]),
                        NodeKey::Intersection(ids[row][col + 1]),
                    )?;
                }
                if row + 1 < rows {
                    self.road_network.add_two_way_road(
                        NodeKey::Intersection(ids[row][col]),
                        NodeKey::Intersection(ids[row + 1][col]),
                    )?;
                }
            }
        }

        let far_x = (cols - 1) as f32 * spacing;
        let far_y = (rows - 1) as f32 * spacing;
        for (row, row_ids) in ids.iter().enumerate() {
            let y = row as f32 * spacing;
            self.road_network
                .add_boundary(Position::new(-stub, y), row_ids[0], Direction::Eastbound)?;
            self.road_network.add_boundary(
                Position::new(far_x + stub, y),
                row_ids[cols - 1],
                Direction::Westbound,
            )?;
        }
        for col in 0..cols {
            let x = col as f32 * spacing;
            self.road_network
                .add_boundary(Position::new(x, -stub), ids[0][col], Direction::Southbound)?;
            self.road_network.add_boundary(
                Position::new(x, far_y + stub),
                ids[rows - 1][col],
                Direction::Northbound,
            )?;
        }

        // One approach lane per direction per intersection, sized by the
        // road feeding it
        let intersection_ids: Vec<IntersectionId> = self.intersections.keys().copied().collect();
        for id in intersection_ids {
            let position = self.intersections[&id].position;
            for upstream in self.road_network.neighbours(NodeKey::Intersection(id)) {
                let from = *self
                    .road_network
                    .position(upstream)
                    .context("Upstream node has no position")?;
                let direction = Direction::between(&from, &position);
                let length = (from.distance(&position) - self.resolver.config.stop_line_setback)
                    .max(self.resolver.config.length);
                let lane_id = LaneId(self.next_sim_id());
                self.lanes.insert(Lane::with_spacing(
                    lane_id,
                    id,
                    direction,
                    length,
                    self.resolver.config.length,
                    self.resolver.config.min_gap,
                ));
            }
        }

        info!(
            "Built {}x{} grid: {} intersections, {} lanes, {} boundary points",
            rows,
            cols,
            self.intersections.len(),
            self.lanes.len(),
            self.road_network.boundaries().len()
        );
        Ok(())
    }

    /// Intersections in row-major order, the order used for arterial offsets
    pub fn arterial_order(&self) -> Vec<IntersectionId> {
        let mut ids: Vec<&SimIntersection> = self.intersections.values().collect();
        ids.sort_by_key(|i| (i.row, i.col));
        ids.into_iter().map(|i| i.id).collect()
    }

    pub fn controller(&self, id: IntersectionId) -> Option<&SignalController> {
        self.intersections.get(&id).map(|i| &i.controller)
    }

    pub fn controller_mut(&mut self, id: IntersectionId) -> Option<&mut SignalController> {
        self.intersections.get_mut(&id).map(|i| &mut i.controller)
    }

    /// Disjoint mutable access to every controller
    pub fn controllers_mut(&mut self) -> impl Iterator<Item = (IntersectionId, &mut SignalController)> {
        self.intersections
            .iter_mut()
            .map(|(id, i)| (*id, &mut i.controller))
    }

    /// Current metrics of every approach lane
    pub fn lane_metrics(&mut self) -> Vec<(IntersectionId, Direction, LaneMetrics)> {
        let now = self.time;
        let vehicles = &self.vehicles;
        self.lanes
            .iter_mut()
            .map(|(_, lane)| (lane.intersection, lane.direction, lane.metrics(vehicles, now)))
            .collect()
    }

    /// Spawn a vehicle at one boundary point heading for another
    pub fn spawn_vehicle(&mut self, from: usize, to: usize) -> Result<VehicleId> {
        let entry = *self
            .road_network
            .boundary(from)
            .with_context(|| format!("Boundary {} not found", from))?;
        let route = self.road_network.route_between(from, to)?;

        let position = entry
            .position
            .right_hand_offset(entry.inbound, self.resolver.config.lane_offset);
        let lane_id = self
            .lanes
            .lane_for(entry.attached, entry.inbound)
            .context("Entry lane not found")?;
        let lane_full = self.lanes.get(lane_id).map_or(true, |lane| lane.is_full());
        let length = self.resolver.config.length;
        if lane_full
            || !self
                .resolver
                .entry_clear(&self.vehicles, entry.inbound, &position, length)
        {
            self.stats.spawns_blocked += 1;
            anyhow::bail!("Entry at boundary {} is blocked", from);
        }

        let id = VehicleId(self.next_sim_id());
        let mut vehicle = Vehicle::new(
            id,
            route,
            position,
            entry.inbound,
            self.resolver.config.speed,
            length,
            self.time,
        );
        if let Some(lane) = self.lanes.get_mut(lane_id) {
            if lane.enter(id, vehicle.progress(), self.time) {
                vehicle.lane = Some(lane_id);
            }
        }
        self.vehicles.insert(id, vehicle);
        self.stats.vehicles_spawned += 1;
        debug!("Spawned {} at boundary {} for boundary {}", id, from, to);
        Ok(id)
    }

    /// Randomly spawn vehicles at the boundary according to the spawn rate
    fn spawn_vehicles(&mut self, delta_secs: f32) {
        let boundary_count = self.road_network.boundaries().len();
        if boundary_count < 2 {
            return;
        }
        let chance = (self.grid.spawn_rate * delta_secs).clamp(0.0, 1.0);
        for from in 0..boundary_count {
            if self.random_range(0.0..1.0) >= chance {
                continue;
            }
            let exits: Vec<usize> = (0..boundary_count).filter(|b| *b != from).collect();
            let Some(&to) = self.choose_random(&exits) else {
                continue;
            };
            if let Err(e) = self.spawn_vehicle(from, to) {
                debug!("Spawn skipped: {:#}", e);
            }
        }
    }

    fn despawn_vehicle(&mut self, id: VehicleId) {
        self.lanes.remove_vehicle(id);
        if let Some(vehicle) = self.vehicles.remove(&id) {
            self.stats.vehicles_completed += 1;
            self.stats.total_trip_time += self.time - vehicle.spawned_at;
        }
    }

    /// Main simulation tick
    pub fn tick(&mut self, delta_secs: f32) -> MotionOutcome {
        self.time += delta_secs as f64;

        for intersection in self.intersections.values_mut() {
            intersection.update_timer(delta_secs);
        }

        self.spawn_vehicles(delta_secs);

        let outcome = self.resolver.resolve(
            delta_secs,
            self.time,
            &mut self.vehicles,
            &mut self.lanes,
            &self.intersections,
        );

        self.stats.stop_line_crossings += outcome.committed.len() as u64;
        for id in &outcome.completed {
            self.despawn_vehicle(*id);
        }

        outcome
    }

    /// Put every controller into its terminal ALL_RED phase
    pub fn shutdown(&mut self) {
        for intersection in self.intersections.values_mut() {
            intersection.controller.shutdown();
        }
    }

    /// Count same-lane vehicle pairs closer than the minimum gap
    pub fn overlap_violations(&self) -> usize {
        let mut by_lane: BTreeMap<_, Vec<&Vehicle>> = BTreeMap::new();
        for vehicle in self.vehicles.values() {
            by_lane
                .entry(self.resolver.lane_key(vehicle.direction, &vehicle.position))
                .or_default()
                .push(vehicle);
        }
        let gap = self.resolver.config.min_gap;
        by_lane
            .values_mut()
            .map(|members| {
                members.sort_by(|a, b| b.progress().total_cmp(&a.progress()));
                members
                    .windows(2)
                    .filter(|pair| pair[1].front_progress() > pair[0].rear_progress() - gap + 1e-3)
                    .count()
            })
            .sum()
    }

    /// Print a summary of the world state
    pub fn print_summary(&self) {
        println!("=== Signal Simulation Summary ===");
        println!("Time: {:.2}s", self.time);
        println!(
            "Intersections: {}, Lanes: {}, Roads: {}",
            self.intersections.len(),
            self.lanes.len(),
            self.road_network.road_count()
        );
        println!(
            "Vehicles: {} active, {} spawned, {} completed, {} spawns blocked",
            self.vehicles.len(),
            self.stats.vehicles_spawned,
            self.stats.vehicles_completed,
            self.stats.spawns_blocked
        );
        println!("Average trip time: {:.1}s", self.stats.average_trip_time());

        println!("--- Signals ---");
        for intersection in self.intersections.values() {
            let c = &intersection.controller;
            let t = c.timings();
            println!(
                "  {} ({},{}): {} {:.1}s left, EW {}ms / NS {}ms, cycle {}ms",
                intersection.id,
                intersection.row,
                intersection.col,
                c.phase(),
                c.remaining_ms() / 1000.0,
                t.ew_green_ms,
                t.ns_green_ms,
                t.cycle_time_ms()
            );
        }
    }

    /// Draw a visual map of the grid in the terminal.
    ///
    /// Each intersection shows its phase (`=` EW green, `|` NS green, `y`
    /// yellow, `x` all-red) followed by the vehicles queued on its approaches.
    pub fn draw_map(&self) {
        let rows = self.grid.rows.max(1);
        let cols = self.grid.cols.max(1);
        let mut cells = vec![vec![String::new(); cols]; rows];

        for intersection in self.intersections.values() {
            let symbol = match intersection.controller.phase() {
                Phase::EwGreen => '=',
                Phase::NsGreen => '|',
                Phase::EwYellow | Phase::NsYellow => 'y',
                Phase::AllRed => 'x',
            };
            let queued: usize = Direction::ALL
                .iter()
                .filter_map(|d| self.lanes.approach(intersection.id, *d))
                .flat_map(|lane| lane.vehicles())
                .filter(|v| self.vehicles.get(v).is_some_and(|v| v.stopped))
                .count();
            if let Some(cell) = cells
                .get_mut(intersection.row)
                .and_then(|r| r.get_mut(intersection.col))
            {
                *cell = format!("[{}{:>3}]", symbol, queued);
            }
        }

        for row in cells {
            println!("  {}", row.join("----"));
        }
    }
}
