//! Signalled intersections
//!
//! Each intersection owns exactly one signal controller. Vehicles and lanes
//! refer to intersections by id only.

use std::collections::BTreeMap;

use super::signal::{SignalConfig, SignalController};
use super::types::{Axis, IntersectionId, Position};

/// An intersection in the signal simulation
#[derive(Debug, Clone)]
pub struct SimIntersection {
    pub id: IntersectionId,
    pub position: Position,
    pub row: usize,
    pub col: usize,
    pub controller: SignalController,
}

impl SimIntersection {
    pub fn new(
        id: IntersectionId,
        position: Position,
        row: usize,
        col: usize,
        signal: SignalConfig,
    ) -> Self {
        Self {
            id,
            position,
            row,
            col,
            controller: SignalController::new(id, signal),
        }
    }

    /// Advance the signal countdown
    pub fn update_timer(&mut self, delta_secs: f32) {
        self.controller.tick(delta_secs);
    }
}

/// Read-only view of signal state, the only thing vehicles need to see
pub trait SignalView {
    fn is_green(&self, intersection: IntersectionId, axis: Axis) -> bool;
}

impl SignalView for BTreeMap<IntersectionId, SimIntersection> {
    /// Unknown intersections are unsignalled and never hold traffic
    fn is_green(&self, intersection: IntersectionId, axis: Axis) -> bool {
        self.get(&intersection)
            .map_or(true, |i| i.controller.is_green(axis))
    }
}
