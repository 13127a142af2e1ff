//! Vehicle state for the signal simulation
//!
//! Vehicles follow a precomputed waypoint route at constant speed. The motion
//! resolver decides how far each one actually moves per tick; this module only
//! holds per-vehicle state and the geometry helpers the resolver needs.

use super::types::{Axis, Direction, IntersectionId, LaneId, Position, VehicleId, STOPPED_EPSILON};

/// One point on a vehicle's route
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RouteWaypoint {
    /// Centreline position of the waypoint
    pub position: Position,
    /// Set when the waypoint is a signalled intersection the vehicle must
    /// commit to before crossing
    pub intersection: Option<IntersectionId>,
}

impl RouteWaypoint {
    pub fn intersection(position: Position, id: IntersectionId) -> Self {
        Self {
            position,
            intersection: Some(id),
        }
    }

    pub fn boundary(position: Position) -> Self {
        Self {
            position,
            intersection: None,
        }
    }
}

/// Why a vehicle did not get its full move this tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoldReason {
    /// Stopped at a stop line whose axis is not green
    Signal,
    /// Downstream lane already at the back-pressure limit
    Downstream,
    /// Waiting at a waypoint for room in the next lane
    Admission,
    /// Clamped behind a leader in the same lane
    Leader,
}

/// A vehicle in the signal simulation
#[derive(Debug, Clone)]
pub struct Vehicle {
    pub id: VehicleId,
    pub route: Vec<RouteWaypoint>,
    /// Index into `route` of the waypoint currently being approached
    pub next_waypoint: usize,
    /// Centre of the vehicle
    pub position: Position,
    pub direction: Direction,
    pub speed: f32,
    pub length: f32,
    /// Intersection whose stop line this vehicle's front has crossed. Once
    /// set, that intersection's signal is never consulted again.
    pub committed: Option<IntersectionId>,
    /// Approach lane this vehicle currently occupies
    pub lane: Option<LaneId>,
    pub stopped: bool,
    /// Seconds stopped since entering the current lane
    pub waiting_time: f64,
    /// Seconds stopped over the whole trip
    pub idle_time: f64,
    pub stops: u32,
    pub distance_travelled: f32,
    pub spawned_at: f64,
    pub hold: Option<HoldReason>,
}

impl Vehicle {
    pub fn new(
        id: VehicleId,
        route: Vec<RouteWaypoint>,
        position: Position,
        direction: Direction,
        speed: f32,
        length: f32,
        spawned_at: f64,
    ) -> Self {
        Self {
            id,
            route,
            next_waypoint: 0,
            position,
            direction,
            speed,
            length,
            committed: None,
            lane: None,
            stopped: false,
            waiting_time: 0.0,
            idle_time: 0.0,
            stops: 0,
            distance_travelled: 0.0,
            spawned_at,
            hold: None,
        }
    }

    pub fn axis(&self) -> Axis {
        self.direction.axis()
    }

    /// Signed coordinate along the direction of travel; grows as the vehicle advances
    pub fn progress(&self) -> f32 {
        self.direction.sign() * self.position.along(self.axis())
    }

    /// Progress of the front bumper
    pub fn front_progress(&self) -> f32 {
        self.progress() + self.length / 2.0
    }

    /// Progress of the rear bumper
    pub fn rear_progress(&self) -> f32 {
        self.progress() - self.length / 2.0
    }

    pub fn target(&self) -> Option<&RouteWaypoint> {
        self.route.get(self.next_waypoint)
    }

    /// The waypoint after the current target
    pub fn after_target(&self) -> Option<&RouteWaypoint> {
        self.route.get(self.next_waypoint + 1)
    }

    pub fn is_committed_to(&self, intersection: IntersectionId) -> bool {
        self.committed == Some(intersection)
    }

    /// Position at the given progress along the current lane
    pub fn position_at(&self, progress: f32) -> Position {
        self.position
            .with_along(self.axis(), progress * self.direction.sign())
    }

    /// Record how far the vehicle moved this tick and update stop metrics
    pub fn record_motion(&mut self, moved: f32, delta_secs: f32) {
        let now_stopped = moved < STOPPED_EPSILON;
        if now_stopped {
            if !self.stopped {
                self.stops += 1;
            }
            self.waiting_time += delta_secs as f64;
            self.idle_time += delta_secs as f64;
        } else {
            self.hold = None;
        }
        self.stopped = now_stopped;
        self.distance_travelled += moved.max(0.0);
    }

    /// Switch onto the segment heading to the next waypoint
    pub fn turn_onto(&mut self, direction: Direction, position: Position) {
        self.direction = direction;
        self.position = position;
        self.next_waypoint += 1;
        self.waiting_time = 0.0;
    }
}
