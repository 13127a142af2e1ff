use std::process::{Command, Output};

fn run_binary(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_signal_sim"))
        .args(args)
        .env("RUST_LOG", "warn,signal_sim=info")
        .output()
        .expect("Failed to execute simulation")
}

/// Pull the number following `label` out of a log line
fn parse_stat(stderr: &str, label: &str) -> f64 {
    let line = stderr
        .lines()
        .find(|line| line.contains(label))
        .unwrap_or_else(|| panic!("Could not find '{}' line", label));
    let parts: Vec<&str> = line.split(label).collect();
    parts
        .get(1)
        .map(|s| s.trim().trim_end_matches('%'))
        .and_then(|s| s.split_whitespace().next())
        .and_then(|s| s.trim_end_matches(',').parse().ok())
        .unwrap_or_else(|| panic!("Could not parse value from line: {}", line))
}

/// Test that the simulation runs to completion without crashing
#[test]
fn test_headless_simulation_runs() {
    let output = run_binary(&["--ticks", "600", "--seed", "7"]);

    assert!(
        output.status.success(),
        "Simulation failed to run. stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("SIMULATION COMPLETE"),
        "Simulation did not complete properly. stderr: {}",
        stderr
    );
}

/// Test that the end-of-run statistics are logged
#[test]
fn test_simulation_statistics_logged() {
    let output = run_binary(&["--ticks", "600", "--seed", "7"]);
    assert!(output.status.success(), "Simulation failed to run");

    let stderr = String::from_utf8_lossy(&output.stderr);
    for label in [
        "Total vehicles spawned:",
        "Total vehicles completed:",
        "Active vehicles:",
        "Total intersections:",
        "Optimizations:",
        "Cumulative estimated savings:",
        "Completion rate:",
    ] {
        assert!(stderr.contains(label), "Missing '{}' statistic", label);
    }
    assert_eq!(parse_stat(&stderr, "Total intersections:"), 9.0);
}

/// Test that vehicles are spawned and optimization runs happen
#[test]
fn test_vehicles_spawn_and_signals_optimize() {
    let output = run_binary(&["--ticks", "1200", "--seed", "11", "--strategy", "coordinated"]);
    assert!(output.status.success(), "Simulation failed to run");

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(parse_stat(&stderr, "Total vehicles spawned:") > 0.0);
    assert!(parse_stat(&stderr, "Optimizations:") > 0.0);
}

/// Test that grid size flags are honoured
#[test]
fn test_grid_flags() {
    let output = run_binary(&["--ticks", "50", "--rows", "2", "--cols", "4", "--seed", "1"]);
    assert!(output.status.success(), "Simulation failed to run");

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert_eq!(parse_stat(&stderr, "Total intersections:"), 8.0);
}

/// Test that a malformed config file is reported instead of ignored
#[test]
fn test_bad_config_fails() {
    let output = run_binary(&["--config", "/nonexistent/signal_sim.json"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Failed to read config file"), "stderr: {}", stderr);
}
