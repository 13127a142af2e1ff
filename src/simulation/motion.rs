//! Per-tick motion resolution
//!
//! Every tick runs three passes over all vehicles:
//! 1. each vehicle proposes a move at constant speed, stopping short of a
//!    stop line whose axis is not green or whose downstream lane is backed up
//! 2. vehicles are grouped by lane (axis, sign, snapped lane coordinate) and
//!    each follower is clamped behind its leader
//! 3. moves are committed, stop-line crossings mark the vehicle committed, and
//!    vehicles reaching a waypoint transfer onto the next segment
//!
//! Clamping never moves a vehicle backwards and never past its leader, so the
//! no-overlap invariant holds without collision detection.

use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::intersection::SignalView;
use super::lane::LaneTable;
use super::types::{
    Axis, Direction, IntersectionId, Position, VehicleId, CRUISE_SPEED, LANE_OFFSET,
    LANE_SNAP_TOLERANCE, MIN_GAP, STOP_LINE_SETBACK, VEHICLE_LENGTH,
};
use super::vehicle::{HoldReason, Vehicle};

const PROGRESS_EPSILON: f32 = 1e-3;

/// Vehicle geometry and movement parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VehicleConfig {
    pub length: f32,
    pub min_gap: f32,
    pub speed: f32,
    pub lane_snap_tolerance: f32,
    pub stop_line_setback: f32,
    pub lane_offset: f32,
    /// A vehicle will not cross a stop line while the lane it would enter
    /// holds at least this many vehicles
    pub back_pressure_limit: usize,
}

impl Default for VehicleConfig {
    fn default() -> Self {
        Self {
            length: VEHICLE_LENGTH,
            min_gap: MIN_GAP,
            speed: CRUISE_SPEED,
            lane_snap_tolerance: LANE_SNAP_TOLERANCE,
            stop_line_setback: STOP_LINE_SETBACK,
            lane_offset: LANE_OFFSET,
            back_pressure_limit: 8,
        }
    }
}

/// Identity of a physical lane for ordering purposes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LaneKey {
    pub axis: Axis,
    pub sign: i8,
    pub coordinate: i64,
}

impl LaneKey {
    pub fn new(direction: Direction, position: &Position, tolerance: f32) -> Self {
        let axis = direction.axis();
        let tolerance = tolerance.max(1e-3);
        Self {
            axis,
            sign: if direction.sign() > 0.0 { 1 } else { -1 },
            coordinate: (position.across(axis) / tolerance).round() as i64,
        }
    }
}

/// What happened during one resolution pass
#[derive(Debug, Clone, Default)]
pub struct MotionOutcome {
    /// Vehicles that reached the end of their route
    pub completed: Vec<VehicleId>,
    /// Stop-line crossings this tick
    pub committed: Vec<(VehicleId, IntersectionId)>,
    /// Vehicles that moved onto their next segment
    pub transferred: usize,
    /// Vehicles that did not get their full move
    pub held: usize,
}

#[derive(Debug, Clone)]
struct Proposal {
    id: VehicleId,
    key: LaneKey,
    current: f32,
    proposed: f32,
    resolved: f32,
    half_length: f32,
    hold: Option<HoldReason>,
}

/// Occupied stretch of a lane, by progress
#[derive(Debug, Clone, Copy)]
struct Footprint {
    id: VehicleId,
    progress: f32,
    half_length: f32,
}

/// Resolves one tick of vehicle motion
#[derive(Debug, Clone, Default)]
pub struct MotionResolver {
    pub config: VehicleConfig,
}

impl MotionResolver {
    pub fn new(config: VehicleConfig) -> Self {
        Self { config }
    }

    pub fn lane_key(&self, direction: Direction, position: &Position) -> LaneKey {
        LaneKey::new(direction, position, self.config.lane_snap_tolerance)
    }

    /// Whether a vehicle of `length` could be placed at `position` heading
    /// `direction` without overlapping anyone already in that lane
    pub fn entry_clear(
        &self,
        vehicles: &BTreeMap<VehicleId, Vehicle>,
        direction: Direction,
        position: &Position,
        length: f32,
    ) -> bool {
        let key = self.lane_key(direction, position);
        let progress = direction.sign() * position.along(direction.axis());
        vehicles.values().all(|other| {
            self.lane_key(other.direction, &other.position) != key
                || (other.progress() - progress).abs()
                    >= other.length / 2.0 + length / 2.0 + self.config.min_gap
        })
    }

    /// The downstream lane behind the upcoming intersection is backed up
    fn downstream_blocked(&self, vehicle: &Vehicle, lanes: &LaneTable) -> bool {
        let (Some(target), Some(after)) = (vehicle.target(), vehicle.after_target()) else {
            return false;
        };
        let Some(next_intersection) = after.intersection else {
            return false;
        };
        let direction = Direction::between(&target.position, &after.position);
        lanes
            .approach(next_intersection, direction)
            .map_or(false, |lane| {
                lane.is_full() || lane.occupant_count() >= self.config.back_pressure_limit
            })
    }

    fn propose(
        &self,
        vehicle: &Vehicle,
        delta_secs: f32,
        lanes: &LaneTable,
        signals: &impl SignalView,
    ) -> Proposal {
        let current = vehicle.progress();
        let key = self.lane_key(vehicle.direction, &vehicle.position);
        let mut proposal = Proposal {
            id: vehicle.id,
            key,
            current,
            proposed: current,
            resolved: current,
            half_length: vehicle.length / 2.0,
            hold: None,
        };

        let Some(target) = vehicle.target() else {
            return proposal;
        };
        let target_progress = vehicle.direction.sign() * target.position.along(vehicle.axis());
        let mut proposed = (current + vehicle.speed * delta_secs).min(target_progress).max(current);

        if let Some(intersection) = target.intersection {
            if !vehicle.is_committed_to(intersection) {
                let stop_line = target_progress - self.config.stop_line_setback;
                if vehicle.front_progress() <= stop_line + PROGRESS_EPSILON {
                    let red = !signals.is_green(intersection, vehicle.axis());
                    let backed_up = !red && self.downstream_blocked(vehicle, lanes);
                    if red || backed_up {
                        let limit = (stop_line - vehicle.length / 2.0).max(current);
                        if proposed > limit {
                            proposed = limit;
                            proposal.hold = Some(if red {
                                HoldReason::Signal
                            } else {
                                HoldReason::Downstream
                            });
                        }
                    }
                }
            }
        }

        proposal.proposed = proposed;
        proposal.resolved = proposed;
        proposal
    }

    /// Run one tick of motion over every vehicle
    pub fn resolve(
        &self,
        delta_secs: f32,
        now: f64,
        vehicles: &mut BTreeMap<VehicleId, Vehicle>,
        lanes: &mut LaneTable,
        signals: &impl SignalView,
    ) -> MotionOutcome {
        let mut outcome = MotionOutcome::default();

        // 1. propose
        let lane_view: &LaneTable = lanes;
        let mut proposals: Vec<Proposal> = vehicles
            .values()
            .map(|v| self.propose(v, delta_secs, lane_view, signals))
            .collect();

        // 2. group by lane, leader first, and clamp followers
        let mut groups: BTreeMap<LaneKey, Vec<usize>> = BTreeMap::new();
        for (index, p) in proposals.iter().enumerate() {
            groups.entry(p.key).or_default().push(index);
        }
        for members in groups.values_mut() {
            members.sort_by(|&a, &b| {
                proposals[b]
                    .current
                    .total_cmp(&proposals[a].current)
                    .then(proposals[a].id.cmp(&proposals[b].id))
            });
            for pair in 1..members.len() {
                let leader = &proposals[members[pair - 1]];
                let limit = leader.resolved
                    - leader.half_length
                    - proposals[members[pair]].half_length
                    - self.config.min_gap;
                let follower = &mut proposals[members[pair]];
                let resolved = follower.proposed.min(limit).max(follower.current);
                if resolved < follower.proposed && follower.hold.is_none() {
                    follower.hold = Some(HoldReason::Leader);
                }
                follower.resolved = resolved;
            }
        }

        let mut footprints: BTreeMap<LaneKey, Vec<Footprint>> = BTreeMap::new();
        for p in &proposals {
            footprints.entry(p.key).or_default().push(Footprint {
                id: p.id,
                progress: p.resolved,
                half_length: p.half_length,
            });
        }

        // 3. commit
        for p in &proposals {
            let Some(vehicle) = vehicles.get_mut(&p.id) else {
                continue;
            };
            vehicle.position = vehicle.position_at(p.resolved);
            vehicle.record_motion(p.resolved - p.current, delta_secs);
            if p.hold.is_some() {
                vehicle.hold = p.hold;
            }

            let Some(target) = vehicle.target().copied() else {
                outcome.completed.push(vehicle.id);
                continue;
            };
            let target_progress = vehicle.direction.sign() * target.position.along(vehicle.axis());

            if let Some(intersection) = target.intersection {
                let stop_line = target_progress - self.config.stop_line_setback;
                if !vehicle.is_committed_to(intersection)
                    && vehicle.front_progress() > stop_line + PROGRESS_EPSILON
                {
                    vehicle.committed = Some(intersection);
                    if let Some(lane_id) = vehicle.lane.take() {
                        if let Some(lane) = lanes.get_mut(lane_id) {
                            lane.exit(vehicle.id);
                        }
                    }
                    outcome.committed.push((vehicle.id, intersection));
                }
            }

            if p.resolved < target_progress - PROGRESS_EPSILON {
                if vehicle.hold.is_some() && p.resolved <= p.current {
                    outcome.held += 1;
                }
                continue;
            }

            // At the waypoint: finish, or transfer onto the next segment
            let Some(after) = vehicle.after_target().copied() else {
                vehicle.next_waypoint += 1;
                if let Some(lane_id) = vehicle.lane.take() {
                    if let Some(lane) = lanes.get_mut(lane_id) {
                        lane.exit(vehicle.id);
                    }
                }
                outcome.completed.push(vehicle.id);
                continue;
            };

            let direction = Direction::between(&target.position, &after.position);
            let entry = target
                .position
                .right_hand_offset(direction, self.config.lane_offset);
            let next_lane = after
                .intersection
                .and_then(|next| lanes.lane_for(next, direction));
            let lane_has_room = next_lane
                .and_then(|id| lanes.get(id))
                .map_or(true, |lane| !lane.is_full());

            let entry_key = self.lane_key(direction, &entry);
            let entry_progress = direction.sign() * entry.along(direction.axis());
            let half_length = vehicle.length / 2.0;
            let vehicle_id = vehicle.id;
            let clear = direction == vehicle.direction
                || footprints.get(&entry_key).map_or(true, |lane| {
                    lane.iter().all(|f| {
                        f.id == vehicle_id
                            || (f.progress - entry_progress).abs()
                                >= f.half_length + half_length + self.config.min_gap
                    })
                });

            if !(lane_has_room && clear) {
                vehicle.hold = Some(HoldReason::Admission);
                outcome.held += 1;
                continue;
            }

            vehicle.turn_onto(direction, entry);
            if let Some(lane_id) = next_lane {
                if let Some(lane) = lanes.get_mut(lane_id) {
                    if lane.enter(vehicle.id, vehicle.progress(), now) {
                        vehicle.lane = Some(lane_id);
                    }
                }
            }
            if entry_key != p.key {
                footprints.entry(entry_key).or_default().push(Footprint {
                    id: vehicle.id,
                    progress: entry_progress,
                    half_length,
                });
            }
            outcome.transferred += 1;
        }

        for (_, lane) in lanes.iter_mut() {
            lane.refresh_order(vehicles);
        }

        if !outcome.committed.is_empty() || !outcome.completed.is_empty() {
            debug!(
                "motion: {} committed, {} completed, {} transferred, {} held",
                outcome.committed.len(),
                outcome.completed.len(),
                outcome.transferred,
                outcome.held
            );
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::lane::Lane;
    use crate::simulation::types::{LaneId, SimId};
    use crate::simulation::vehicle::RouteWaypoint;

    struct Fixed(bool);

    impl SignalView for Fixed {
        fn is_green(&self, _: IntersectionId, _: Axis) -> bool {
            self.0
        }
    }

    const CROSSING: IntersectionId = IntersectionId(SimId(0));

    fn eastbound(id: usize, x: f32) -> Vehicle {
        let route = vec![
            RouteWaypoint::intersection(Position::new(100.0, 0.0), CROSSING),
            RouteWaypoint::boundary(Position::new(200.0, 0.0)),
        ];
        Vehicle::new(
            VehicleId(SimId(id)),
            route,
            Position::new(x, LANE_OFFSET),
            Direction::Eastbound,
            CRUISE_SPEED,
            VEHICLE_LENGTH,
            0.0,
        )
    }

    fn world(xs: &[f32]) -> (BTreeMap<VehicleId, Vehicle>, LaneTable) {
        let mut lanes = LaneTable::new();
        lanes.insert(Lane::new(LaneId(SimId(100)), CROSSING, Direction::Eastbound, 100.0));
        let mut vehicles = BTreeMap::new();
        for (i, x) in xs.iter().enumerate() {
            let mut v = eastbound(i + 1, *x);
            let lane = lanes.lane_for(CROSSING, Direction::Eastbound).unwrap();
            lanes.get_mut(lane).unwrap().enter(v.id, v.progress(), 0.0);
            v.lane = Some(lane);
            vehicles.insert(v.id, v);
        }
        (vehicles, lanes)
    }

    #[test]
    fn vehicle_stops_at_red_stop_line() {
        let resolver = MotionResolver::default();
        let (mut vehicles, mut lanes) = world(&[50.0]);
        for _ in 0..200 {
            resolver.resolve(0.1, 0.0, &mut vehicles, &mut lanes, &Fixed(false));
        }
        let v = &vehicles[&VehicleId(SimId(1))];
        assert!((v.front_progress() - (100.0 - STOP_LINE_SETBACK)).abs() < 1e-3);
        assert!(v.stopped);
        assert_eq!(v.hold, Some(HoldReason::Signal));
        assert!(v.committed.is_none());
    }

    #[test]
    fn follower_never_overlaps_leader() {
        let resolver = MotionResolver::default();
        let (mut vehicles, mut lanes) = world(&[60.0, 50.0, 40.0, 30.0]);
        for _ in 0..300 {
            resolver.resolve(0.1, 0.0, &mut vehicles, &mut lanes, &Fixed(false));
            let mut fronts: Vec<&Vehicle> = vehicles.values().collect();
            fronts.sort_by(|a, b| b.progress().total_cmp(&a.progress()));
            for pair in fronts.windows(2) {
                assert!(pair[1].front_progress() <= pair[0].rear_progress() - MIN_GAP + 1e-3);
            }
        }
        assert_eq!(lanes.approach(CROSSING, Direction::Eastbound).unwrap().occupant_count(), 4);
    }

    #[test]
    fn committed_vehicle_ignores_later_red() {
        let resolver = MotionResolver::default();
        let (mut vehicles, mut lanes) = world(&[89.0]);
        let outcome = resolver.resolve(0.1, 0.0, &mut vehicles, &mut lanes, &Fixed(true));
        assert_eq!(outcome.committed.len(), 1);
        assert_eq!(lanes.approach(CROSSING, Direction::Eastbound).unwrap().occupant_count(), 0);
        let before = vehicles[&VehicleId(SimId(1))].progress();
        resolver.resolve(0.1, 0.1, &mut vehicles, &mut lanes, &Fixed(false));
        assert!(vehicles[&VehicleId(SimId(1))].progress() > before);
    }

    #[test]
    fn vehicle_completes_route() {
        let resolver = MotionResolver::default();
        let (mut vehicles, mut lanes) = world(&[90.0]);
        let mut completed = Vec::new();
        for _ in 0..200 {
            let outcome = resolver.resolve(0.1, 0.0, &mut vehicles, &mut lanes, &Fixed(true));
            completed.extend(outcome.completed.iter().copied());
            for id in &outcome.completed {
                vehicles.remove(id);
            }
        }
        assert_eq!(completed, vec![VehicleId(SimId(1))]);
    }

    #[test]
    fn entry_clear_detects_overlap() {
        let resolver = MotionResolver::default();
        let (vehicles, _) = world(&[10.0]);
        let near = Position::new(13.0, LANE_OFFSET);
        let far = Position::new(30.0, LANE_OFFSET);
        assert!(!resolver.entry_clear(&vehicles, Direction::Eastbound, &near, VEHICLE_LENGTH));
        assert!(resolver.entry_clear(&vehicles, Direction::Eastbound, &far, VEHICLE_LENGTH));
        // opposite direction is a different lane
        assert!(resolver.entry_clear(&vehicles, Direction::Westbound, &near, VEHICLE_LENGTH));
    }
}
