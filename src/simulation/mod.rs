//! Grid traffic simulation
//!
//! Intersections with signal controllers, approach lanes and vehicles, all
//! owned by [`SimWorld`] and advanced tick by tick. Runs headless and is
//! driven from the console or from tests.

mod intersection;
mod lane;
mod motion;
mod road_network;
mod signal;
mod types;
mod vehicle;
mod world;

pub use intersection::{SignalView, SimIntersection};
pub use lane::{Lane, LaneMetrics, LaneTable, ARRIVAL_WINDOW_SECS};
pub use motion::{LaneKey, MotionOutcome, MotionResolver, VehicleConfig};
pub use road_network::{BoundaryPoint, GridNetwork, NodeKey, RoadEdge};
pub use signal::{
    AppliedTimings, Phase, PhaseRecord, SignalConfig, SignalController, SignalTimings,
    TimingBounds, TimingUpdate, TimingUpdateResult,
};
pub use types::{
    Axis, Direction, IntersectionId, LaneId, Position, SimId, VehicleId, CRUISE_SPEED,
    LANE_OFFSET, LANE_SNAP_TOLERANCE, MIN_GAP, STOPPED_EPSILON, STOP_LINE_SETBACK,
    VEHICLE_LENGTH,
};
pub use vehicle::{HoldReason, RouteWaypoint, Vehicle};
pub use world::{GridConfig, SimWorld, WorldStats};
