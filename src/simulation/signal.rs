//! Signal controller state machine
//!
//! Cycles EW_GREEN -> EW_YELLOW -> ALL_RED -> NS_GREEN -> NS_YELLOW -> ALL_RED
//! and exposes a bounded, phase-aware retiming API. Every retiming call
//! reports what was actually applied; callers must inspect the result.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

use super::types::{Axis, IntersectionId};

/// Symbolic signal phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    EwGreen,
    EwYellow,
    AllRed,
    NsGreen,
    NsYellow,
}

impl Phase {
    /// The axis allowed to move in this phase
    pub fn green_axis(self) -> Option<Axis> {
        match self {
            Phase::EwGreen => Some(Axis::EastWest),
            Phase::NsGreen => Some(Axis::NorthSouth),
            _ => None,
        }
    }

    /// Yellow and all-red phases separate conflicting greens
    pub fn is_clearance(self) -> bool {
        matches!(self, Phase::EwYellow | Phase::NsYellow | Phase::AllRed)
    }

    pub fn label(self) -> &'static str {
        match self {
            Phase::EwGreen => "EW_GREEN",
            Phase::EwYellow => "EW_YELLOW",
            Phase::AllRed => "ALL_RED",
            Phase::NsGreen => "NS_GREEN",
            Phase::NsYellow => "NS_YELLOW",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Inclusive millisecond bounds for one timing field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingBounds {
    pub min_ms: u32,
    pub max_ms: u32,
}

impl TimingBounds {
    pub const fn new(min_ms: u32, max_ms: u32) -> Self {
        Self { min_ms, max_ms }
    }

    pub fn clamp(&self, value: u32) -> u32 {
        value.clamp(self.min_ms, self.max_ms)
    }

    pub fn contains(&self, value: u32) -> bool {
        value >= self.min_ms && value <= self.max_ms
    }
}

/// Controller defaults, hard bounds and per-update change caps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalConfig {
    pub green_ms: u32,
    pub yellow_ms: u32,
    pub all_red_ms: u32,
    pub green_bounds: TimingBounds,
    pub yellow_bounds: TimingBounds,
    pub all_red_bounds: TimingBounds,
    pub max_green_change_ms: u32,
    pub max_yellow_change_ms: u32,
    pub max_all_red_change_ms: u32,
    /// Minimum time left in a green phase for a change to apply immediately
    pub min_remaining_for_immediate_ms: u32,
    pub history_size: usize,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            green_ms: 20_000,
            yellow_ms: 3_000,
            all_red_ms: 2_000,
            green_bounds: TimingBounds::new(3_000, 120_000),
            yellow_bounds: TimingBounds::new(1_000, 6_000),
            all_red_bounds: TimingBounds::new(0, 3_000),
            max_green_change_ms: 10_000,
            max_yellow_change_ms: 1_000,
            max_all_red_change_ms: 1_000,
            min_remaining_for_immediate_ms: 2_000,
            history_size: 32,
        }
    }
}

/// Phase durations currently configured on a controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalTimings {
    pub ew_green_ms: u32,
    pub ns_green_ms: u32,
    pub yellow_ms: u32,
    pub all_red_ms: u32,
}

impl SignalTimings {
    pub fn uniform(green_ms: u32, yellow_ms: u32, all_red_ms: u32) -> Self {
        Self {
            ew_green_ms: green_ms,
            ns_green_ms: green_ms,
            yellow_ms,
            all_red_ms,
        }
    }

    pub fn green_for(&self, axis: Axis) -> u32 {
        match axis {
            Axis::EastWest => self.ew_green_ms,
            Axis::NorthSouth => self.ns_green_ms,
        }
    }

    pub fn cycle_time_ms(&self) -> u32 {
        self.ew_green_ms + self.ns_green_ms + 2 * (self.yellow_ms + self.all_red_ms)
    }

    fn duration_of(&self, phase: Phase) -> u32 {
        match phase {
            Phase::EwGreen => self.ew_green_ms,
            Phase::NsGreen => self.ns_green_ms,
            Phase::EwYellow | Phase::NsYellow => self.yellow_ms,
            Phase::AllRed => self.all_red_ms,
        }
    }
}

/// A retiming request. Unset fields are left alone. `green_ms` sets both axes;
/// the per-axis fields take precedence over it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TimingUpdate {
    pub green_ms: Option<u32>,
    pub ew_green_ms: Option<u32>,
    pub ns_green_ms: Option<u32>,
    pub yellow_ms: Option<u32>,
    pub all_red_ms: Option<u32>,
}

impl TimingUpdate {
    pub fn green(ms: u32) -> Self {
        Self {
            green_ms: Some(ms),
            ..Self::default()
        }
    }

    pub fn yellow(ms: u32) -> Self {
        Self {
            yellow_ms: Some(ms),
            ..Self::default()
        }
    }

    pub fn all_red(ms: u32) -> Self {
        Self {
            all_red_ms: Some(ms),
            ..Self::default()
        }
    }

    /// Request a full set of timings
    pub fn to_timings(target: &SignalTimings) -> Self {
        Self {
            green_ms: None,
            ew_green_ms: Some(target.ew_green_ms),
            ns_green_ms: Some(target.ns_green_ms),
            yellow_ms: Some(target.yellow_ms),
            all_red_ms: Some(target.all_red_ms),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.green_ms.is_none()
            && self.ew_green_ms.is_none()
            && self.ns_green_ms.is_none()
            && self.yellow_ms.is_none()
            && self.all_red_ms.is_none()
    }
}

/// Post-clamp values accepted by a retiming call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AppliedTimings {
    /// Set when both axes ended on the same green
    pub green_ms: Option<u32>,
    pub ew_green_ms: Option<u32>,
    pub ns_green_ms: Option<u32>,
    pub yellow_ms: Option<u32>,
    pub all_red_ms: Option<u32>,
}

/// Outcome of a retiming call
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TimingUpdateResult {
    pub success: bool,
    pub applied: AppliedTimings,
    /// The new timings took effect in the running phase
    pub applied_immediately: bool,
    /// The new timings were staged for the next phase
    pub deferred: bool,
    pub warnings: Vec<String>,
    pub rejections: Vec<String>,
}

/// A completed phase
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhaseRecord {
    pub phase: Phase,
    pub started_at_ms: f64,
    pub duration_ms: f64,
}

/// Which timing field a bound or cap applies to
#[derive(Debug, Clone, Copy)]
enum Field {
    /// Both axes from one request
    Green,
    EwGreen,
    NsGreen,
    Yellow,
    AllRed,
}

impl Field {
    fn label(self) -> &'static str {
        match self {
            Field::Green => "Green",
            Field::EwGreen => "EW green",
            Field::NsGreen => "NS green",
            Field::Yellow => "Yellow",
            Field::AllRed => "All-red",
        }
    }
}

fn push_unique(messages: &mut Vec<String>, message: String) {
    if !messages.contains(&message) {
        messages.push(message);
    }
}

/// The signal controller for one intersection
#[derive(Debug, Clone)]
pub struct SignalController {
    pub intersection: IntersectionId,
    config: SignalConfig,
    phase: Phase,
    remaining_ms: f64,
    timings: SignalTimings,
    pending: Option<SignalTimings>,
    /// Axis served after the next ALL_RED
    next_green: Axis,
    elapsed_ms: f64,
    phase_started_ms: f64,
    history: VecDeque<PhaseRecord>,
    ramp: VecDeque<TimingUpdate>,
    cycles_completed: u64,
    shut_down: bool,
}

impl SignalController {
    pub fn new(intersection: IntersectionId, config: SignalConfig) -> Self {
        let timings = SignalTimings::uniform(
            config.green_bounds.clamp(config.green_ms),
            config.yellow_bounds.clamp(config.yellow_ms),
            config.all_red_bounds.clamp(config.all_red_ms),
        );
        Self {
            intersection,
            phase: Phase::EwGreen,
            remaining_ms: timings.ew_green_ms as f64,
            timings,
            pending: None,
            next_green: Axis::NorthSouth,
            elapsed_ms: 0.0,
            phase_started_ms: 0.0,
            history: VecDeque::with_capacity(config.history_size),
            ramp: VecDeque::new(),
            cycles_completed: 0,
            shut_down: false,
            config,
        }
    }

    /// Start the controller part-way into its cycle. Used to stagger
    /// neighbouring intersections.
    pub fn with_offset(mut self, offset_ms: u32) -> Self {
        self.tick(offset_ms as f32 / 1000.0);
        self
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn remaining_ms(&self) -> f64 {
        self.remaining_ms
    }

    pub fn config(&self) -> &SignalConfig {
        &self.config
    }

    /// Timings driving the current cycle
    pub fn timings(&self) -> SignalTimings {
        self.timings
    }

    /// Timings staged for the next phase, if any
    pub fn pending(&self) -> Option<SignalTimings> {
        self.pending
    }

    /// The timings that will be in force once any staged change lands
    pub fn effective_timings(&self) -> SignalTimings {
        self.pending.unwrap_or(self.timings)
    }

    pub fn history(&self) -> impl Iterator<Item = &PhaseRecord> {
        self.history.iter()
    }

    pub fn cycles_completed(&self) -> u64 {
        self.cycles_completed
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    pub fn ramp_len(&self) -> usize {
        self.ramp.len()
    }

    /// Whether vehicles travelling on `axis` may proceed
    pub fn is_green(&self, axis: Axis) -> bool {
        !self.shut_down && self.phase.green_axis() == Some(axis)
    }

    /// A change may land mid-phase only during green with enough time left
    pub fn is_safe_to_disturb(&self) -> bool {
        !self.shut_down
            && !self.phase.is_clearance()
            && self.remaining_ms >= self.config.min_remaining_for_immediate_ms as f64
    }

    /// Advance the phase countdown
    pub fn tick(&mut self, delta_secs: f32) {
        if self.shut_down {
            return;
        }
        let delta_ms = delta_secs as f64 * 1000.0;
        self.elapsed_ms += delta_ms;
        self.remaining_ms -= delta_ms;

        // Zero-length all-red phases are legal, so several transitions may land in one tick
        let mut guard = 0;
        while self.remaining_ms <= 0.0 && guard < 8 {
            let overshoot = -self.remaining_ms;
            self.advance_phase();
            self.remaining_ms -= overshoot;
            guard += 1;
        }
    }

    fn advance_phase(&mut self) {
        let finished = PhaseRecord {
            phase: self.phase,
            started_at_ms: self.phase_started_ms,
            duration_ms: self.elapsed_ms - self.phase_started_ms,
        };
        self.push_history(finished);

        let next = match self.phase {
            Phase::EwGreen => Phase::EwYellow,
            Phase::NsGreen => Phase::NsYellow,
            Phase::EwYellow => {
                self.next_green = Axis::NorthSouth;
                Phase::AllRed
            }
            Phase::NsYellow => {
                self.next_green = Axis::EastWest;
                Phase::AllRed
            }
            Phase::AllRed => match self.next_green {
                Axis::EastWest => Phase::EwGreen,
                Axis::NorthSouth => Phase::NsGreen,
            },
        };

        if next == Phase::EwGreen {
            self.cycles_completed += 1;
            if let Some(step) = self.ramp.pop_front() {
                let outcome = self.update_timings(step, false, true);
                if !outcome.success {
                    warn!(
                        "{}: ramp step rejected ({}), abandoning {} remaining steps",
                        self.intersection,
                        outcome.rejections.join("; "),
                        self.ramp.len()
                    );
                    self.ramp.clear();
                }
            }
        }

        if let Some(pending) = self.pending.take() {
            debug!(
                "{}: staged timings take effect at {} (cycle {} ms)",
                self.intersection,
                next,
                pending.cycle_time_ms()
            );
            self.timings = pending;
        }

        self.phase = next;
        self.phase_started_ms = self.elapsed_ms;
        self.remaining_ms = self.timings.duration_of(next) as f64;
    }

    fn push_history(&mut self, record: PhaseRecord) {
        if self.config.history_size == 0 {
            return;
        }
        while self.history.len() >= self.config.history_size {
            self.history.pop_front();
        }
        self.history.push_back(record);
    }

    /// Bound one field: clamp to hard bounds, reject unsafe yellow, cap the
    /// change magnitude. Returns `None` when the value is rejected.
    fn bound_field(
        &self,
        field: Field,
        requested: u32,
        current: u32,
        validate_safety: bool,
        warnings: &mut Vec<String>,
        rejections: &mut Vec<String>,
    ) -> Option<u32> {
        let (bounds, cap) = match field {
            Field::Green | Field::EwGreen | Field::NsGreen => {
                (self.config.green_bounds, self.config.max_green_change_ms)
            }
            Field::Yellow => (self.config.yellow_bounds, self.config.max_yellow_change_ms),
            Field::AllRed => (self.config.all_red_bounds, self.config.max_all_red_change_ms),
        };

        if matches!(field, Field::Yellow) && requested < bounds.min_ms && validate_safety {
            rejections.push(format!(
                "Yellow time {}ms is below SAFETY MINIMUM {}ms",
                requested, bounds.min_ms
            ));
            return None;
        }

        let mut value = requested;
        if !bounds.contains(value) {
            value = bounds.clamp(value);
            push_unique(
                warnings,
                format!(
                    "{} time {}ms out of range [{}, {}]ms, clamped to {}ms",
                    field.label(),
                    requested,
                    bounds.min_ms,
                    bounds.max_ms,
                    value
                ),
            );
        }

        let delta = value as i64 - current as i64;
        if delta.unsigned_abs() > cap as u64 {
            let limited = if delta > 0 {
                current.saturating_add(cap)
            } else {
                current.saturating_sub(cap)
            };
            push_unique(
                warnings,
                format!(
                    "{} change of {}ms exceeds max {}ms per update, limited to {}ms",
                    field.label(),
                    delta,
                    cap,
                    limited
                ),
            );
            value = bounds.clamp(limited);
        }

        Some(value)
    }

    /// Retime the controller.
    ///
    /// Each provided field is clamped into its hard bounds and its change is
    /// capped per call. A yellow below the safety minimum is rejected outright
    /// when `validate_safety` is set, and any rejection leaves the controller
    /// untouched. With `apply_immediately` the change lands in the running
    /// phase only if [`is_safe_to_disturb`](Self::is_safe_to_disturb);
    /// otherwise it is staged for the next phase.
    pub fn update_timings(
        &mut self,
        update: TimingUpdate,
        apply_immediately: bool,
        validate_safety: bool,
    ) -> TimingUpdateResult {
        let mut result = TimingUpdateResult::default();
        if self.shut_down {
            result
                .rejections
                .push("Controller is shut down".to_string());
            return result;
        }
        if update.is_empty() {
            result.success = true;
            result.warnings.push("No timing fields supplied".to_string());
            return result;
        }

        let base = self.effective_timings();
        let mut target = base;
        let mut warnings = Vec::new();
        let mut rejections = Vec::new();

        let ew_request = update.ew_green_ms.or(update.green_ms);
        let ns_request = update.ns_green_ms.or(update.green_ms);
        let ew_field = if update.ew_green_ms.is_some() {
            Field::EwGreen
        } else {
            Field::Green
        };
        let ns_field = if update.ns_green_ms.is_some() {
            Field::NsGreen
        } else {
            Field::Green
        };

        if let Some(requested) = ew_request {
            if let Some(v) = self.bound_field(
                ew_field,
                requested,
                base.ew_green_ms,
                validate_safety,
                &mut warnings,
                &mut rejections,
            ) {
                target.ew_green_ms = v;
                result.applied.ew_green_ms = Some(v);
            }
        }
        if let Some(requested) = ns_request {
            if let Some(v) = self.bound_field(
                ns_field,
                requested,
                base.ns_green_ms,
                validate_safety,
                &mut warnings,
                &mut rejections,
            ) {
                target.ns_green_ms = v;
                result.applied.ns_green_ms = Some(v);
            }
        }
        if let Some(requested) = update.yellow_ms {
            if let Some(v) = self.bound_field(
                Field::Yellow,
                requested,
                base.yellow_ms,
                validate_safety,
                &mut warnings,
                &mut rejections,
            ) {
                target.yellow_ms = v;
                result.applied.yellow_ms = Some(v);
            }
        }
        if let Some(requested) = update.all_red_ms {
            if let Some(v) = self.bound_field(
                Field::AllRed,
                requested,
                base.all_red_ms,
                validate_safety,
                &mut warnings,
                &mut rejections,
            ) {
                target.all_red_ms = v;
                result.applied.all_red_ms = Some(v);
            }
        }

        if let (Some(ew), Some(ns)) = (result.applied.ew_green_ms, result.applied.ns_green_ms) {
            if ew == ns {
                result.applied.green_ms = Some(ew);
            }
        }

        for w in &warnings {
            warn!("{}: {}", self.intersection, w);
        }

        if !rejections.is_empty() {
            for r in &rejections {
                warn!("{}: timing update rejected: {}", self.intersection, r);
            }
            result.applied = AppliedTimings::default();
            result.warnings = warnings;
            result.rejections = rejections;
            return result;
        }

        if apply_immediately && self.is_safe_to_disturb() {
            if let Some(axis) = self.phase.green_axis() {
                let delta = target.green_for(axis) as f64 - self.timings.green_for(axis) as f64;
                let floor = self.config.min_remaining_for_immediate_ms as f64;
                self.remaining_ms = (self.remaining_ms + delta).max(floor);
            }
            self.timings = target;
            self.pending = None;
            result.applied_immediately = true;
            info!(
                "{}: timings applied immediately (EW {} / NS {} / Y {} / AR {} ms)",
                self.intersection,
                target.ew_green_ms,
                target.ns_green_ms,
                target.yellow_ms,
                target.all_red_ms
            );
        } else {
            if apply_immediately {
                let w = format!(
                    "Not safe to apply during {} with {:.0}ms remaining; change deferred to next phase",
                    self.phase, self.remaining_ms
                );
                warn!("{}: {}", self.intersection, w);
                warnings.push(w);
            }
            self.pending = Some(target);
            result.deferred = true;
        }

        result.success = true;
        result.warnings = warnings;
        result
    }

    /// Break a move to `target` into linear steps, each within the per-update
    /// caps. At least `steps` steps are produced; more if a cap requires it.
    pub fn schedule_gradual_transition(
        &self,
        target: &SignalTimings,
        steps: usize,
    ) -> Vec<TimingUpdate> {
        let base = self.effective_timings();
        let fields = [
            (base.ew_green_ms, target.ew_green_ms, self.config.max_green_change_ms),
            (base.ns_green_ms, target.ns_green_ms, self.config.max_green_change_ms),
            (base.yellow_ms, target.yellow_ms, self.config.max_yellow_change_ms),
            (base.all_red_ms, target.all_red_ms, self.config.max_all_red_change_ms),
        ];

        let mut n = steps.max(1) as i64;
        for (from, to, cap) in fields {
            let delta = (to as i64 - from as i64).abs();
            let cap = cap.max(1) as i64;
            n = n.max((delta + cap - 1) / cap);
        }

        let interpolate = |from: u32, to: u32, i: i64| -> u32 {
            let delta = to as i64 - from as i64;
            (from as i64 + delta * i / n) as u32
        };

        (1..=n)
            .map(|i| TimingUpdate {
                green_ms: None,
                ew_green_ms: Some(interpolate(base.ew_green_ms, target.ew_green_ms, i)),
                ns_green_ms: Some(interpolate(base.ns_green_ms, target.ns_green_ms, i)),
                yellow_ms: Some(interpolate(base.yellow_ms, target.yellow_ms, i)),
                all_red_ms: Some(interpolate(base.all_red_ms, target.all_red_ms, i)),
            })
            .collect()
    }

    /// Queue a gradual transition; one step is applied at each cycle start.
    /// Replaces any ramp already in progress. Returns the number of steps.
    pub fn begin_gradual_transition(&mut self, target: &SignalTimings, steps: usize) -> usize {
        let plan = self.schedule_gradual_transition(target, steps);
        self.ramp = plan.into();
        self.ramp.len()
    }

    /// Force the terminal ALL_RED phase
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        let finished = PhaseRecord {
            phase: self.phase,
            started_at_ms: self.phase_started_ms,
            duration_ms: self.elapsed_ms - self.phase_started_ms,
        };
        self.push_history(finished);
        self.phase = Phase::AllRed;
        self.phase_started_ms = self.elapsed_ms;
        self.remaining_ms = 0.0;
        self.ramp.clear();
        self.pending = None;
        self.shut_down = true;
        info!("{}: controller shut down (ALL_RED)", self.intersection);
    }
}
