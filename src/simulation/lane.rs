//! Approach lanes
//!
//! A lane is the bounded container of vehicles approaching one intersection
//! from one direction. Membership changes only when a vehicle transfers into
//! the lane or commits past its stop line; positions inside the lane are
//! owned by the vehicles themselves.

use ordered_float::OrderedFloat;
use sorted_vec::SortedVec;
use std::cmp::Reverse;
use std::collections::{BTreeMap, VecDeque};

use super::types::{Direction, IntersectionId, LaneId, VehicleId, MIN_GAP, VEHICLE_LENGTH};
use super::vehicle::Vehicle;

/// Window over which the lane arrival rate is measured
pub const ARRIVAL_WINDOW_SECS: f64 = 60.0;

/// Ordering key for lane occupants: the vehicle furthest along sorts first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct LaneSlot {
    progress: Reverse<OrderedFloat<f32>>,
    vehicle: VehicleId,
}

impl LaneSlot {
    fn new(vehicle: VehicleId, progress: f32) -> Self {
        Self {
            progress: Reverse(OrderedFloat(progress)),
            vehicle,
        }
    }
}

/// Aggregated per-lane figures derived from the current occupants
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LaneMetrics {
    pub vehicle_count: usize,
    pub queue_length: usize,
    /// Mean time occupants have spent stopped in this lane, in seconds
    pub average_waiting_time: f64,
    pub average_stops: f64,
    /// Mean total stopped time of occupants over their whole trip, in seconds
    pub average_idle_time: f64,
    pub occupancy_rate: f64,
    pub capacity: usize,
    pub is_full: bool,
    /// Vehicles entering per second over the arrival window
    pub arrival_rate: f64,
}

/// A single approach lane
#[derive(Debug, Clone)]
pub struct Lane {
    pub id: LaneId,
    pub intersection: IntersectionId,
    pub direction: Direction,
    pub length: f32,
    pub capacity: usize,
    occupants: SortedVec<LaneSlot>,
    arrivals: VecDeque<f64>,
    pub total_entered: u64,
    pub total_exited: u64,
}

impl Lane {
    pub fn new(id: LaneId, intersection: IntersectionId, direction: Direction, length: f32) -> Self {
        Self::with_spacing(id, intersection, direction, length, VEHICLE_LENGTH, MIN_GAP)
    }

    /// Create a lane whose capacity is the number of vehicles that fit bumper
    /// to bumper with the given spacing
    pub fn with_spacing(
        id: LaneId,
        intersection: IntersectionId,
        direction: Direction,
        length: f32,
        vehicle_length: f32,
        gap: f32,
    ) -> Self {
        let slot = (vehicle_length + gap).max(0.1);
        let capacity = ((length / slot).floor() as usize).max(1);
        Self {
            id,
            intersection,
            direction,
            length,
            capacity,
            occupants: SortedVec::new(),
            arrivals: VecDeque::new(),
            total_entered: 0,
            total_exited: 0,
        }
    }

    pub fn occupant_count(&self) -> usize {
        self.occupants.len()
    }

    pub fn is_full(&self) -> bool {
        self.occupants.len() >= self.capacity
    }

    pub fn contains(&self, vehicle: VehicleId) -> bool {
        self.occupants.iter().any(|slot| slot.vehicle == vehicle)
    }

    /// Occupants ordered leader to follower
    pub fn vehicles(&self) -> impl Iterator<Item = VehicleId> + '_ {
        self.occupants.iter().map(|slot| slot.vehicle)
    }

    pub fn leader(&self) -> Option<VehicleId> {
        self.occupants.first().map(|slot| slot.vehicle)
    }

    pub fn occupancy_rate(&self) -> f64 {
        self.occupants.len() as f64 / self.capacity as f64
    }

    /// Admit a vehicle. Returns false and leaves the lane untouched when full
    /// or when the vehicle is already present.
    pub fn enter(&mut self, vehicle: VehicleId, progress: f32, now: f64) -> bool {
        if self.is_full() || self.contains(vehicle) {
            return false;
        }
        self.occupants.insert(LaneSlot::new(vehicle, progress));
        self.arrivals.push_back(now);
        self.total_entered += 1;
        true
    }

    /// Remove a vehicle. Returns whether it was present.
    pub fn exit(&mut self, vehicle: VehicleId) -> bool {
        if !self.contains(vehicle) {
            return false;
        }
        let remaining: Vec<LaneSlot> = self
            .occupants
            .iter()
            .copied()
            .filter(|slot| slot.vehicle != vehicle)
            .collect();
        self.occupants = SortedVec::from_unsorted(remaining);
        self.total_exited += 1;
        true
    }

    /// Re-sort occupants after a motion step
    pub fn refresh_order(&mut self, vehicles: &BTreeMap<VehicleId, Vehicle>) {
        let slots: Vec<LaneSlot> = self
            .occupants
            .iter()
            .map(|slot| {
                let progress = vehicles
                    .get(&slot.vehicle)
                    .map(|v| v.progress())
                    .unwrap_or(slot.progress.0.into_inner());
                LaneSlot::new(slot.vehicle, progress)
            })
            .collect();
        self.occupants = SortedVec::from_unsorted(slots);
    }

    /// Vehicles entered per second over the trailing window ending at `now`
    pub fn arrival_rate(&mut self, now: f64) -> f64 {
        while let Some(&front) = self.arrivals.front() {
            if now - front > ARRIVAL_WINDOW_SECS {
                self.arrivals.pop_front();
            } else {
                break;
            }
        }
        let window = ARRIVAL_WINDOW_SECS.min(now.max(1.0));
        self.arrivals.len() as f64 / window
    }

    /// Compute the lane's current metrics from its occupants
    pub fn metrics(&mut self, vehicles: &BTreeMap<VehicleId, Vehicle>, now: f64) -> LaneMetrics {
        let arrival_rate = self.arrival_rate(now);
        let occupants: Vec<&Vehicle> = self
            .occupants
            .iter()
            .filter_map(|slot| vehicles.get(&slot.vehicle))
            .collect();

        let vehicle_count = occupants.len();
        let queue_length = occupants.iter().filter(|v| v.stopped).count();
        let (wait, stops, idle) = occupants.iter().fold((0.0, 0.0, 0.0), |acc, v| {
            (
                acc.0 + v.waiting_time,
                acc.1 + v.stops as f64,
                acc.2 + v.idle_time,
            )
        });
        let n = vehicle_count.max(1) as f64;

        LaneMetrics {
            vehicle_count,
            queue_length,
            average_waiting_time: if vehicle_count > 0 { wait / n } else { 0.0 },
            average_stops: if vehicle_count > 0 { stops / n } else { 0.0 },
            average_idle_time: if vehicle_count > 0 { idle / n } else { 0.0 },
            occupancy_rate: self.occupancy_rate(),
            capacity: self.capacity,
            is_full: self.is_full(),
            arrival_rate,
        }
    }
}

/// Arena of lanes keyed by id, with a lookup from (intersection, direction)
#[derive(Debug, Clone, Default)]
pub struct LaneTable {
    lanes: BTreeMap<LaneId, Lane>,
    index: BTreeMap<(IntersectionId, Direction), LaneId>,
}

impl LaneTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, lane: Lane) {
        self.index.insert((lane.intersection, lane.direction), lane.id);
        self.lanes.insert(lane.id, lane);
    }

    pub fn get(&self, id: LaneId) -> Option<&Lane> {
        self.lanes.get(&id)
    }

    pub fn get_mut(&mut self, id: LaneId) -> Option<&mut Lane> {
        self.lanes.get_mut(&id)
    }

    pub fn lane_for(&self, intersection: IntersectionId, direction: Direction) -> Option<LaneId> {
        self.index.get(&(intersection, direction)).copied()
    }

    pub fn approach(&self, intersection: IntersectionId, direction: Direction) -> Option<&Lane> {
        self.lane_for(intersection, direction)
            .and_then(|id| self.lanes.get(&id))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&LaneId, &Lane)> {
        self.lanes.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&LaneId, &mut Lane)> {
        self.lanes.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.lanes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lanes.is_empty()
    }

    /// Remove a vehicle from whichever lane holds it
    pub fn remove_vehicle(&mut self, vehicle: VehicleId) {
        for lane in self.lanes.values_mut() {
            lane.exit(vehicle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::types::SimId;

    fn lane(length: f32) -> Lane {
        Lane::new(LaneId(SimId(1)), IntersectionId(SimId(0)), Direction::Eastbound, length)
    }

    #[test]
    fn capacity_is_derived_from_spacing() {
        // 65 m / 6.5 m per vehicle
        assert_eq!(lane(65.0).capacity, 10);
        assert_eq!(lane(1.0).capacity, 1);
    }

    #[test]
    fn enter_refuses_when_full() {
        let mut l = lane(13.0);
        assert_eq!(l.capacity, 2);
        assert!(l.enter(VehicleId(SimId(1)), 10.0, 0.0));
        assert!(l.enter(VehicleId(SimId(2)), 5.0, 0.0));
        assert!(!l.enter(VehicleId(SimId(3)), 0.0, 0.0));
        assert_eq!(l.occupant_count(), 2);
        assert!(l.is_full());
    }

    #[test]
    fn occupants_are_leader_first() {
        let mut l = lane(100.0);
        l.enter(VehicleId(SimId(1)), 5.0, 0.0);
        l.enter(VehicleId(SimId(2)), 30.0, 0.0);
        l.enter(VehicleId(SimId(3)), 12.0, 0.0);
        let order: Vec<_> = l.vehicles().collect();
        assert_eq!(order, vec![VehicleId(SimId(2)), VehicleId(SimId(3)), VehicleId(SimId(1))]);
        assert!(l.exit(VehicleId(SimId(2))));
        assert_eq!(l.leader(), Some(VehicleId(SimId(3))));
        assert!(!l.exit(VehicleId(SimId(2))));
    }

    #[test]
    fn arrival_rate_forgets_old_entries() {
        let mut l = lane(100.0);
        l.enter(VehicleId(SimId(1)), 0.0, 0.0);
        l.enter(VehicleId(SimId(2)), 0.0, 100.0);
        let rate = l.arrival_rate(100.0);
        assert!((rate - 1.0 / ARRIVAL_WINDOW_SECS).abs() < 1e-9);
    }
}
