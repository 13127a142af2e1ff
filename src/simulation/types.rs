//! Core types for the signal simulation
//!
//! Identifiers, travel directions and planar geometry shared by the motion
//! model, the signal controllers and the analytics layer.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A unique identifier for simulation entities
/// This is a simple wrapper around a usize for type safety
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SimId(pub usize);

/// A wrapper type for intersection IDs
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct IntersectionId(pub SimId);

/// A wrapper type for lane IDs
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LaneId(pub SimId);

/// A wrapper type for vehicle IDs
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VehicleId(pub SimId);

impl fmt::Display for IntersectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "I{}", self.0 .0)
    }
}

impl fmt::Display for LaneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0 .0)
    }
}

impl fmt::Display for VehicleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "V{}", self.0 .0)
    }
}

/// One of the two movement axes served by a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Axis {
    EastWest,
    NorthSouth,
}

/// Direction of travel. Each intersection has one approach lane per direction.
///
/// x grows eastwards and y grows southwards, so `sign` is +1 for eastbound and
/// southbound travel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Direction {
    Eastbound,
    Westbound,
    Northbound,
    Southbound,
}

impl Direction {
    pub const ALL: [Direction; 4] = [
        Direction::Eastbound,
        Direction::Westbound,
        Direction::Northbound,
        Direction::Southbound,
    ];

    pub fn axis(self) -> Axis {
        match self {
            Direction::Eastbound | Direction::Westbound => Axis::EastWest,
            Direction::Northbound | Direction::Southbound => Axis::NorthSouth,
        }
    }

    pub fn sign(self) -> f32 {
        match self {
            Direction::Eastbound | Direction::Southbound => 1.0,
            Direction::Westbound | Direction::Northbound => -1.0,
        }
    }

    /// Direction of travel from `from` to `to` along the dominant axis
    pub fn between(from: &Position, to: &Position) -> Direction {
        let dx = to.x - from.x;
        let dy = to.y - from.y;
        if dx.abs() >= dy.abs() {
            if dx >= 0.0 {
                Direction::Eastbound
            } else {
                Direction::Westbound
            }
        } else if dy >= 0.0 {
            Direction::Southbound
        } else {
            Direction::Northbound
        }
    }
}

/// A 2D position in the simulation, in metres
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

impl Position {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Position) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }

    /// Coordinate along the axis of travel
    pub fn along(&self, axis: Axis) -> f32 {
        match axis {
            Axis::EastWest => self.x,
            Axis::NorthSouth => self.y,
        }
    }

    /// Coordinate across the axis of travel (the lane coordinate)
    pub fn across(&self, axis: Axis) -> f32 {
        match axis {
            Axis::EastWest => self.y,
            Axis::NorthSouth => self.x,
        }
    }

    pub fn with_along(&self, axis: Axis, value: f32) -> Position {
        match axis {
            Axis::EastWest => Position::new(value, self.y),
            Axis::NorthSouth => Position::new(self.x, value),
        }
    }

    /// Offset to the right-hand side of travel in `direction`
    pub fn right_hand_offset(&self, direction: Direction, offset: f32) -> Position {
        match direction {
            Direction::Eastbound => Position::new(self.x, self.y + offset),
            Direction::Westbound => Position::new(self.x, self.y - offset),
            Direction::Southbound => Position::new(self.x - offset, self.y),
            Direction::Northbound => Position::new(self.x + offset, self.y),
        }
    }
}

/// Length of a vehicle in metres
pub const VEHICLE_LENGTH: f32 = 4.5;

/// Minimum bumper-to-bumper gap kept behind a leader
pub const MIN_GAP: f32 = 2.0;

/// Cruise speed in metres per second
pub const CRUISE_SPEED: f32 = 11.0;

/// Tolerance used to snap lane coordinates into the same lane group
pub const LANE_SNAP_TOLERANCE: f32 = 0.5;

/// Distance of the stop line before the intersection centre
pub const STOP_LINE_SETBACK: f32 = 8.0;

/// Right-hand offset of a lane from the road centreline
pub const LANE_OFFSET: f32 = 2.0;

/// Below this distance per tick a vehicle counts as stopped
pub const STOPPED_EPSILON: f32 = 0.01;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_between_picks_dominant_axis() {
        let a = Position::new(0.0, 0.0);
        assert_eq!(Direction::between(&a, &Position::new(10.0, 1.0)), Direction::Eastbound);
        assert_eq!(Direction::between(&a, &Position::new(-10.0, 1.0)), Direction::Westbound);
        assert_eq!(Direction::between(&a, &Position::new(0.0, 7.0)), Direction::Southbound);
        assert_eq!(Direction::between(&a, &Position::new(0.0, -7.0)), Direction::Northbound);
    }

    #[test]
    fn right_hand_offsets_separate_opposing_lanes() {
        let centre = Position::new(50.0, 50.0);
        let eb = centre.right_hand_offset(Direction::Eastbound, LANE_OFFSET);
        let wb = centre.right_hand_offset(Direction::Westbound, LANE_OFFSET);
        assert!((eb.across(Axis::EastWest) - wb.across(Axis::EastWest)).abs() > 2.0 * LANE_SNAP_TOLERANCE);
    }
}
