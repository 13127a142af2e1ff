//! Sensing and traffic analytics
//!
//! Lane readings go in, immutable [`TrafficState`] snapshots come out.

mod engine;
mod reading;
mod state;
mod trend;

pub use engine::{AnalyticsConfig, TrafficAnalytics};
pub use reading::{LaneReading, SensorConfig, SensorLayer};
pub use state::{
    CongestionCutoff, CongestionLevel, CongestionThresholds, IntersectionState, NetworkState,
    PeriodThresholds, PressureWeights, TrafficPeriod, TrafficState,
};
pub use trend::{TrendConfig, TrendDirection, TrendReport, TrendScope};
