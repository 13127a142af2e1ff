//! Signal Simulation Library
//!
//! A closed-loop traffic signal simulator: vehicles move through a grid of
//! signalled intersections, sensors and analytics summarise the traffic,
//! and an orchestrator retimes each signal within safety bounds.

pub mod analytics;
pub mod config;
pub mod optimization;
pub mod simulation;
pub mod system;

pub use config::SimConfig;
pub use system::TrafficSystem;
