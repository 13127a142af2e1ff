//! Signal controller behaviour under long runs and arbitrary retiming

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use signal_sim::simulation::{
    Axis, IntersectionId, Phase, SignalConfig, SignalController, SimId, TimingUpdate,
};

fn controller(config: SignalConfig) -> SignalController {
    SignalController::new(IntersectionId(SimId(0)), config)
}

fn random_update(rng: &mut StdRng) -> TimingUpdate {
    let maybe = |rng: &mut StdRng, lo: u32, hi: u32| -> Option<u32> {
        if rng.random_bool(0.5) {
            Some(rng.random_range(lo..hi))
        } else {
            None
        }
    };
    TimingUpdate {
        green_ms: maybe(rng, 0, 200_000),
        ew_green_ms: maybe(rng, 0, 200_000),
        ns_green_ms: maybe(rng, 0, 200_000),
        yellow_ms: maybe(rng, 0, 8_000),
        all_red_ms: maybe(rng, 0, 5_000),
    }
}

#[test]
fn test_at_most_one_axis_green_under_random_retiming() {
    let config = SignalConfig::default();
    let yellow_min = config.yellow_bounds.min_ms;
    let mut c = controller(config);
    let mut rng = StdRng::seed_from_u64(42);

    for step in 0..20_000 {
        if step % 37 == 0 {
            let update = random_update(&mut rng);
            let immediate = rng.random_bool(0.5);
            let validate = rng.random_bool(0.8);
            c.update_timings(update, immediate, validate);
        }
        c.tick(0.1);

        let ew = c.is_green(Axis::EastWest);
        let ns = c.is_green(Axis::NorthSouth);
        assert!(!(ew && ns), "both axes green at step {}", step);
        assert!(c.timings().yellow_ms >= yellow_min);
        if let Some(pending) = c.pending() {
            assert!(pending.yellow_ms >= yellow_min);
        }
    }
    assert!(c.cycles_completed() > 0);
}

#[test]
fn test_green_change_is_bounded_per_call() {
    let config = SignalConfig::default();
    let cap = config.max_green_change_ms as i64;
    let mut c = controller(config);
    let mut rng = StdRng::seed_from_u64(7);

    for _ in 0..500 {
        let before = c.effective_timings();
        let update = random_update(&mut rng);
        let result = c.update_timings(update, rng.random_bool(0.5), true);
        if let Some(ew) = result.applied.ew_green_ms {
            assert!((ew as i64 - before.ew_green_ms as i64).abs() <= cap);
        }
        if let Some(ns) = result.applied.ns_green_ms {
            assert!((ns as i64 - before.ns_green_ms as i64).abs() <= cap);
        }
        c.tick(rng.random_range(0.0..10.0));
    }
}

#[test]
fn test_large_green_request_is_capped_not_applied_wholesale() {
    let mut c = controller(SignalConfig::default());
    let result = c.update_timings(TimingUpdate::green(80_000), false, true);
    assert!(result.success);
    assert_eq!(result.applied.green_ms, Some(30_000));
    assert!(result.warnings.iter().any(|w| w.contains("exceeds max")));
}

#[test]
fn test_yellow_below_safety_minimum_is_rejected() {
    let mut c = controller(SignalConfig::default());
    let before = c.effective_timings();
    let result = c.update_timings(TimingUpdate::yellow(500), false, true);
    assert!(!result.success);
    assert!(result
        .rejections
        .iter()
        .any(|r| r.contains("below SAFETY MINIMUM 1000ms")));
    assert_eq!(c.effective_timings(), before);
    assert!(c.pending().is_none());
}

#[test]
fn test_rejection_leaves_other_fields_untouched() {
    let mut c = controller(SignalConfig::default());
    let update = TimingUpdate {
        green_ms: Some(25_000),
        yellow_ms: Some(200),
        ..TimingUpdate::default()
    };
    let result = c.update_timings(update, true, true);
    assert!(!result.success);
    assert_eq!(c.effective_timings().ew_green_ms, 20_000);
}

#[test]
fn test_green_above_bounds_is_clamped_with_one_warning() {
    let mut c = controller(SignalConfig {
        green_ms: 115_000,
        ..SignalConfig::default()
    });
    let result = c.update_timings(TimingUpdate::green(150_000), false, true);
    assert!(result.success);
    assert_eq!(result.applied.green_ms, Some(120_000));
    assert_eq!(result.warnings.len(), 1, "{:?}", result.warnings);
    assert!(result.warnings[0].contains("clamped"));
}

#[test]
fn test_shutdown_holds_all_red() {
    let mut c = controller(SignalConfig::default());
    c.tick(7.5);
    c.shutdown();
    for _ in 0..100 {
        c.tick(1.0);
        assert_eq!(c.phase(), Phase::AllRed);
    }
}

#[test]
fn test_offset_staggers_start() {
    let c = controller(SignalConfig::default()).with_offset(21_000);
    assert_eq!(c.phase(), Phase::EwYellow);
}
