//! Need evaluation, candidate generation, cost selection and validation
//! chained the way the orchestrator runs them

use signal_sim::analytics::{
    CongestionThresholds, LaneReading, PeriodThresholds, PressureWeights, TrafficState,
};
use signal_sim::optimization::{
    CandidateStrategy, CostEvaluator, Movement, NeedEvaluator, NeedReason, OptimizerConfig,
    PhaseSpec, SafetyConstraints, SafetyValidator, Severity, TimingOptimizer, TimingPlan, Turn,
    ViolationKind,
};
use signal_sim::simulation::{Axis, Direction, IntersectionId, SimId};

const CROSSING: IntersectionId = IntersectionId(SimId(0));

fn lane(direction: Direction, vehicles: usize, queue: usize, wait: f64) -> LaneReading {
    let mut r = LaneReading::empty(CROSSING, direction, 17);
    r.vehicle_count = vehicles;
    r.queue_length = queue;
    r.average_waiting_time = wait;
    r
}

fn quiet_lanes() -> Vec<LaneReading> {
    Direction::ALL.iter().map(|d| lane(*d, 1, 0, 0.0)).collect()
}

/// Both east-west approaches backed up, north-south empty
fn east_west_jam() -> Vec<LaneReading> {
    vec![
        lane(Direction::Eastbound, 12, 12, 30.0),
        lane(Direction::Westbound, 12, 12, 30.0),
        lane(Direction::Northbound, 0, 0, 0.0),
        lane(Direction::Southbound, 0, 0, 0.0),
    ]
}

fn state(lanes: Vec<LaneReading>) -> TrafficState {
    TrafficState::from_readings(
        1,
        100.0,
        lanes,
        &CongestionThresholds::default(),
        &PressureWeights::default(),
        &PeriodThresholds::default(),
    )
}

fn current_plan() -> TimingPlan {
    TimingPlan::new(20_000, 20_000, 3_000, 1_000)
}

#[test]
fn test_long_queue_requires_optimization() {
    let mut lanes = quiet_lanes();
    lanes[0].queue_length = 12;
    lanes[0].vehicle_count = 12;
    let eval = NeedEvaluator::default().evaluate(CROSSING, &state(lanes), Some(95.0), 100.0);
    assert!(eval.optimization_required);
    assert_eq!(eval.reason, NeedReason::QueueExceeded);
    assert_eq!(eval.reason_text(), "Queue length exceeded threshold");
    assert_eq!(eval.max_queue, 12);
}

#[test]
fn test_thresholds_are_strict() {
    let need = NeedEvaluator::default();

    let mut at_limit = quiet_lanes();
    at_limit[0].queue_length = 10;
    at_limit[1].average_waiting_time = 60.0;
    let eval = need.evaluate(CROSSING, &state(at_limit), Some(95.0), 100.0);
    assert!(!eval.optimization_required);
    assert_eq!(eval.reason_text(), "Maintain current timing");

    let mut over = quiet_lanes();
    over[1].average_waiting_time = 60.5;
    let eval = need.evaluate(CROSSING, &state(over), Some(95.0), 100.0);
    assert_eq!(eval.reason, NeedReason::WaitExceeded);
}

#[test]
fn test_imbalance_and_interval_triggers() {
    let need = NeedEvaluator::default();

    let mut skewed = quiet_lanes();
    skewed[0].vehicle_count = 8;
    let eval = need.evaluate(CROSSING, &state(skewed), Some(95.0), 100.0);
    assert_eq!(eval.reason, NeedReason::DemandImbalance);
    assert!(eval.imbalance_ratio > 3.0);

    let eval = need.evaluate(CROSSING, &state(quiet_lanes()), Some(70.0), 100.0);
    assert_eq!(eval.reason, NeedReason::IntervalElapsed);

    // first run counts from the start of the simulation
    let eval = need.evaluate(CROSSING, &state(quiet_lanes()), None, 12.0);
    assert!(!eval.optimization_required);
}

#[test]
fn test_candidates_are_consistent_and_safe() {
    let optimizer = TimingOptimizer::new(OptimizerConfig::default());
    let validator = SafetyValidator::default();
    let lanes = east_west_jam();
    let priorities = optimizer.priorities(&lanes);
    assert_eq!(priorities[0].direction.axis(), Axis::EastWest);

    let current = current_plan();
    let candidates = optimizer.generate(&current, &priorities);
    let strategies: Vec<CandidateStrategy> = candidates.iter().map(|c| c.strategy).collect();
    assert_eq!(
        strategies,
        vec![
            CandidateStrategy::SmallStep,
            CandidateStrategy::LargeStep,
            CandidateStrategy::PriorityProportional,
            CandidateStrategy::DemandRatio,
        ]
    );

    for candidate in &candidates {
        let plan = &candidate.plan;
        assert!(plan.is_consistent(), "{:?}", candidate);
        assert!(plan.ew_green_ms >= 5_000 && plan.ns_green_ms >= 5_000);
        assert!(plan.ew_green_ms >= current.ew_green_ms);
        assert!(validator.check(plan).approved, "{:?}", validator.check(plan));
    }
    assert_eq!(candidates[0].plan.ew_green_ms, 22_000);
    assert_eq!(candidates[1].plan.ew_green_ms, 25_000);
}

#[test]
fn test_no_traffic_means_no_candidates() {
    let optimizer = TimingOptimizer::default();
    assert!(optimizer.generate(&current_plan(), &[]).is_empty());
}

#[test]
fn test_cost_selection_favours_jammed_axis() {
    let optimizer = TimingOptimizer::default();
    let cost = CostEvaluator::default();
    let lanes = east_west_jam();
    let current = current_plan();
    let plans: Vec<TimingPlan> = optimizer
        .generate(&current, &optimizer.priorities(&lanes))
        .into_iter()
        .map(|c| c.plan)
        .collect();

    let selection = cost.select(&current, &plans, &lanes);
    assert!(selection.accepted);
    let (index, best) = selection.best.unwrap();
    assert!(plans[index].ew_green_ms > current.ew_green_ms);
    assert!(best.total < selection.current_cost.total * 0.95);
    assert!((selection.estimated_savings - (selection.current_cost.total - best.total)).abs() < 1e-9);
    assert_eq!(selection.current_cost.switch_cost, 0.0);
}

#[test]
fn test_marginal_gain_is_not_worth_switching() {
    let cost = CostEvaluator::default();
    assert!(!cost.is_improvement(100.0, 97.0));

    let lanes = east_west_jam();
    let current = current_plan();
    let selection = cost.select(&current, &[current.clone()], &lanes);
    assert!(!selection.accepted);
    assert_eq!(selection.estimated_savings, 0.0);
}

#[test]
fn test_validation_is_repeatable() {
    let validator = SafetyValidator::default();
    let plan = TimingPlan::new(20_000, 20_000, 2_000, 0);
    let first = validator.check(&plan);
    let second = validator.check(&plan);
    assert_eq!(first, second);
    assert!(!first.approved);
    assert_eq!(first.worst(), Some(Severity::Critical));
    assert_eq!(first.count(Severity::Critical), 2);
    assert!(validator.history().is_empty());

    validator.validate(&plan);
    validator.validate(&current_plan());
    let history = validator.history();
    assert_eq!(history.len(), 2);
    assert!(!history[0].approved);
    assert!(history[1].approved);
}

#[test]
fn test_strict_mode_rejects_warnings() {
    let plan = TimingPlan::new(100_000, 20_000, 4_000, 2_000);
    let lenient = SafetyValidator::default().check(&plan);
    assert!(lenient.approved);
    assert_eq!(lenient.count(Severity::Warning), 1);

    let strict = SafetyValidator::new(SafetyConstraints {
        strict_mode: true,
        ..SafetyConstraints::default()
    })
    .check(&plan);
    assert!(!strict.approved);
}

#[test]
fn test_inconsistent_cycle_and_conflicting_phase() {
    let validator = SafetyValidator::default();

    let mut tampered = current_plan();
    tampered.cycle_time_ms += 1_000;
    let result = validator.check(&tampered);
    assert!(!result.approved);
    assert!(result
        .violations
        .iter()
        .any(|v| v.kind == ViolationKind::CycleConsistency));

    let phased = current_plan().with_phases(vec![PhaseSpec {
        name: "mixed".to_string(),
        movements: vec![
            Movement::new(Direction::Eastbound, Turn::Through),
            Movement::new(Direction::Northbound, Turn::Left),
        ],
        duration_ms: 20_000,
    }]);
    let result = validator.check(&phased);
    assert!(!result.approved);
    assert!(result
        .violations
        .iter()
        .any(|v| v.kind == ViolationKind::ConflictingMovements && v.severity == Severity::Critical));
}
