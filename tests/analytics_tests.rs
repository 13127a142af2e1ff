//! Sensing and analytics over a live world and over hand-built readings

use std::sync::Arc;

use signal_sim::analytics::{
    AnalyticsConfig, CongestionLevel, CongestionThresholds, LaneReading, PeriodThresholds,
    PressureWeights, SensorConfig, SensorLayer, TrafficAnalytics, TrafficPeriod, TrafficState,
    TrendDirection,
};
use signal_sim::simulation::{
    Direction, GridConfig, IntersectionId, SignalConfig, SimId, SimWorld, VehicleConfig,
};

fn reading(id: usize, direction: Direction, vehicles: usize, queue: usize) -> LaneReading {
    let mut r = LaneReading::empty(IntersectionId(SimId(id)), direction, 17);
    r.vehicle_count = vehicles;
    r.queue_length = queue;
    r.occupancy_rate = vehicles as f64 / 17.0;
    r
}

fn intersection_readings(id: usize, vehicles: usize, queue: usize) -> Vec<LaneReading> {
    Direction::ALL
        .iter()
        .map(|d| reading(id, *d, vehicles, queue))
        .collect()
}

#[test]
fn test_snapshots_track_a_running_world() {
    let grid = GridConfig {
        spawn_rate: 0.5,
        ..GridConfig::default()
    };
    let mut world =
        SimWorld::new_with_seed(grid, VehicleConfig::default(), SignalConfig::default(), 17)
            .unwrap();
    let mut sensor = SensorLayer::new(SensorConfig::default());
    let mut analytics = TrafficAnalytics::new(AnalyticsConfig::default());
    let rx = analytics.subscribe();

    for _ in 0..600 {
        world.tick(0.1);
        sensor.poll(&mut world);
        let s = &sensor;
        analytics.poll(|| s.readings(), world.time);
    }

    let received: Vec<Arc<TrafficState>> = rx.try_iter().collect();
    assert!(received.len() >= 25, "only {} snapshots", received.len());
    for (i, snapshot) in received.iter().enumerate() {
        assert_eq!(snapshot.version, i as u64 + 1);
        assert_eq!(snapshot.intersections.len(), 9);
        assert_eq!(snapshot.lanes.len(), 36);
    }
    for pair in received.windows(2) {
        assert!(pair[1].sim_time > pair[0].sim_time);
    }

    let latest = analytics.latest().unwrap();
    assert!(Arc::ptr_eq(&latest, received.last().unwrap()));
    assert!(analytics.baseline().is_some());
}

#[test]
fn test_long_queue_marks_intersection_critical() {
    let mut lanes = intersection_readings(0, 1, 0);
    lanes[0].vehicle_count = 12;
    lanes[0].queue_length = 12;
    lanes.extend(intersection_readings(1, 0, 0));

    let state = TrafficState::from_readings(
        1,
        10.0,
        lanes,
        &CongestionThresholds::default(),
        &PressureWeights::default(),
        &PeriodThresholds::default(),
    );

    let busy = state.intersection(IntersectionId(SimId(0))).unwrap();
    assert_eq!(busy.total_queue, 12);
    assert_eq!(busy.congestion_level, CongestionLevel::High);
    assert_eq!(busy.dominant_direction, Some(Direction::ALL[0]));
    assert!(busy.is_critical());

    let quiet = state.intersection(IntersectionId(SimId(1))).unwrap();
    assert_eq!(quiet.congestion_level, CongestionLevel::Low);
    assert!(!quiet.is_critical());

    assert_eq!(state.network.critical_intersections, vec![IntersectionId(SimId(0))]);
    assert_eq!(state.network.total_queue, 12);
    assert_eq!(state.lanes_for(IntersectionId(SimId(1))).count(), 4);
    assert_eq!(state.age(14.5), 4.5);
}

#[test]
fn test_rising_load_is_reported_as_a_trend() {
    let mut analytics = TrafficAnalytics::new(AnalyticsConfig::default());
    let id = IntersectionId(SimId(0));

    for i in 0..5 {
        analytics.analyze(intersection_readings(0, 1, 0), i as f64 * 2.0);
    }
    assert!(analytics.intersection_trend(id).is_none());

    for i in 5..10 {
        analytics.analyze(intersection_readings(0, 10, 8), i as f64 * 2.0);
    }

    let local = analytics.intersection_trend(id).unwrap();
    assert_eq!(local.direction, TrendDirection::Increasing);
    assert!(local.change_percent > 10.0);

    let network = analytics.network_trend().unwrap();
    assert_eq!(network.direction, TrendDirection::Worsening);

    let latest = analytics.latest().unwrap();
    assert_eq!(latest.intersection(id).unwrap().trend, Some(local));
    assert_eq!(latest.network.trend, Some(network));
}

#[test]
fn test_falling_load_is_improving() {
    let mut analytics = TrafficAnalytics::new(AnalyticsConfig::default());
    for i in 0..10 {
        let vehicles = if i < 5 { 12 } else { 2 };
        analytics.analyze(intersection_readings(0, vehicles, vehicles / 2), i as f64);
    }
    assert_eq!(
        analytics.network_trend().unwrap().direction,
        TrendDirection::Improving
    );
    assert_eq!(
        analytics
            .intersection_trend(IntersectionId(SimId(0)))
            .unwrap()
            .direction,
        TrendDirection::Decreasing
    );
}

#[test]
fn test_period_without_baseline_uses_fixed_thresholds() {
    let mut analytics = TrafficAnalytics::new(AnalyticsConfig::default());
    let quiet = analytics.analyze(intersection_readings(0, 0, 0), 0.0);
    assert_eq!(quiet.network.traffic_period, TrafficPeriod::OffPeak);

    let jammed = analytics.analyze(intersection_readings(0, 16, 15), 2.0);
    assert_eq!(jammed.network.network_congestion, CongestionLevel::Critical);
    assert_eq!(jammed.network.traffic_period, TrafficPeriod::RushHour);
    assert_eq!(analytics.network_congestion(), CongestionLevel::Critical);
}

#[test]
fn test_poll_respects_interval() {
    let mut analytics = TrafficAnalytics::new(AnalyticsConfig::default());
    assert!(analytics.poll(|| intersection_readings(0, 0, 0), 0.0).is_some());
    assert!(analytics.poll(|| intersection_readings(0, 0, 0), 1.0).is_none());
    assert!(analytics.poll(|| intersection_readings(0, 0, 0), 2.0).is_some());
    assert_eq!(analytics.latest().unwrap().version, 2);
}
