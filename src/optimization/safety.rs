//! Independent safety check of timing plans
//!
//! Validation is a pure function of the plan and the constraints. The
//! validator additionally keeps a bounded history of validation summaries.

use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Mutex;

use super::plan::TimingPlan;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyConstraints {
    pub min_green_ms: u32,
    pub max_green_ms: u32,
    pub min_yellow_ms: u32,
    pub max_yellow_ms: u32,
    pub min_all_red_ms: u32,
    pub max_all_red_ms: u32,
    pub min_cycle_ms: u32,
    pub max_cycle_ms: u32,
    /// Reject on any violation, warnings included
    pub strict_mode: bool,
    pub history_size: usize,
}

impl Default for SafetyConstraints {
    fn default() -> Self {
        Self {
            min_green_ms: 5_000,
            max_green_ms: 90_000,
            min_yellow_ms: 3_000,
            max_yellow_ms: 6_000,
            min_all_red_ms: 1_000,
            max_all_red_ms: 3_000,
            min_cycle_ms: 30_000,
            max_cycle_ms: 180_000,
            strict_mode: false,
            history_size: 100,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Warning,
    Error,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Warning => "WARNING",
            Severity::Error => "ERROR",
            Severity::Critical => "CRITICAL",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ViolationKind {
    PhaseDuration,
    Clearance,
    CycleTime,
    CycleConsistency,
    ConflictingMovements,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Violation {
    pub kind: ViolationKind,
    pub severity: Severity,
    pub message: String,
    pub field: String,
    pub value: u32,
    pub limit: u32,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.severity, self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub approved: bool,
    pub violations: Vec<Violation>,
}

impl ValidationResult {
    pub fn count(&self, severity: Severity) -> usize {
        self.violations
            .iter()
            .filter(|v| v.severity == severity)
            .count()
    }

    pub fn worst(&self) -> Option<Severity> {
        self.violations.iter().map(|v| v.severity).max()
    }

    /// Violation messages joined for logs and result reasons
    pub fn summary(&self) -> String {
        self.violations
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// One entry of the validator's history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationRecord {
    pub approved: bool,
    pub cycle_time_ms: u32,
    pub warnings: usize,
    pub errors: usize,
    pub critical: usize,
}

#[derive(Debug, Default)]
pub struct SafetyValidator {
    pub constraints: SafetyConstraints,
    history: Mutex<VecDeque<ValidationRecord>>,
}

impl SafetyValidator {
    pub fn new(constraints: SafetyConstraints) -> Self {
        Self {
            constraints,
            history: Mutex::new(VecDeque::new()),
        }
    }

    fn check_range(
        violations: &mut Vec<Violation>,
        kind: ViolationKind,
        field: &str,
        value: u32,
        (min, max): (u32, u32),
        (below, above): (Severity, Severity),
    ) {
        if value < min {
            violations.push(Violation {
                kind,
                severity: below,
                message: format!("{} {}ms is below minimum {}ms", field, value, min),
                field: field.to_string(),
                value,
                limit: min,
            });
        } else if value > max {
            violations.push(Violation {
                kind,
                severity: above,
                message: format!("{} {}ms exceeds maximum {}ms", field, value, max),
                field: field.to_string(),
                value,
                limit: max,
            });
        }
    }

    /// Check a plan. Same plan, same violations.
    pub fn check(&self, plan: &TimingPlan) -> ValidationResult {
        let c = &self.constraints;
        let mut violations = Vec::new();

        for (field, value) in [("ew_green", plan.ew_green_ms), ("ns_green", plan.ns_green_ms)] {
            Self::check_range(
                &mut violations,
                ViolationKind::PhaseDuration,
                field,
                value,
                (c.min_green_ms, c.max_green_ms),
                (Severity::Error, Severity::Warning),
            );
        }
        Self::check_range(
            &mut violations,
            ViolationKind::Clearance,
            "yellow",
            plan.yellow_ms,
            (c.min_yellow_ms, c.max_yellow_ms),
            (Severity::Critical, Severity::Warning),
        );
        Self::check_range(
            &mut violations,
            ViolationKind::Clearance,
            "all_red",
            plan.all_red_ms,
            (c.min_all_red_ms, c.max_all_red_ms),
            (Severity::Critical, Severity::Warning),
        );
        Self::check_range(
            &mut violations,
            ViolationKind::CycleTime,
            "cycle_time",
            plan.cycle_time_ms,
            (c.min_cycle_ms, c.max_cycle_ms),
            (Severity::Error, Severity::Error),
        );

        let computed = plan.computed_cycle_ms();
        if plan.cycle_time_ms != computed {
            violations.push(Violation {
                kind: ViolationKind::CycleConsistency,
                severity: Severity::Error,
                message: format!(
                    "cycle_time {}ms does not match phase sum {}ms",
                    plan.cycle_time_ms, computed
                ),
                field: "cycle_time".to_string(),
                value: plan.cycle_time_ms,
                limit: computed,
            });
        }

        if let Some(phases) = &plan.phases {
            for phase in phases {
                for (i, a) in phase.movements.iter().enumerate() {
                    for b in &phase.movements[i + 1..] {
                        if a.conflicts_with(b) {
                            violations.push(Violation {
                                kind: ViolationKind::ConflictingMovements,
                                severity: Severity::Critical,
                                message: format!(
                                    "phase '{}' serves conflicting movements {:?} and {:?}",
                                    phase.name, a, b
                                ),
                                field: phase.name.clone(),
                                value: phase.duration_ms,
                                limit: 0,
                            });
                        }
                    }
                }
            }
        }

        let approved = if c.strict_mode {
            violations.is_empty()
        } else {
            violations.iter().all(|v| v.severity == Severity::Warning)
        };

        ValidationResult {
            approved,
            violations,
        }
    }

    /// Check a plan and record the outcome
    pub fn validate(&self, plan: &TimingPlan) -> ValidationResult {
        let result = self.check(plan);
        if !result.approved {
            warn!("Plan rejected by safety validation: {}", result.summary());
        }

        let record = ValidationRecord {
            approved: result.approved,
            cycle_time_ms: plan.cycle_time_ms,
            warnings: result.count(Severity::Warning),
            errors: result.count(Severity::Error),
            critical: result.count(Severity::Critical),
        };
        if let Ok(mut history) = self.history.lock() {
            if self.constraints.history_size > 0 {
                while history.len() >= self.constraints.history_size {
                    history.pop_front();
                }
                history.push_back(record);
            }
        }
        result
    }

    pub fn history(&self) -> Vec<ValidationRecord> {
        self.history
            .lock()
            .map(|h| h.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimization::plan::{Movement, PhaseSpec, Turn};
    use crate::simulation::Direction;

    #[test]
    fn valid_plan_is_approved() {
        let validator = SafetyValidator::default();
        let result = validator.check(&TimingPlan::new(20_000, 25_000, 3_000, 2_000));
        assert!(result.approved);
        assert!(result.violations.is_empty());
    }

    #[test]
    fn short_yellow_is_critical() {
        let validator = SafetyValidator::default();
        let result = validator.check(&TimingPlan::new(20_000, 20_000, 2_000, 2_000));
        assert!(!result.approved);
        assert_eq!(result.worst(), Some(Severity::Critical));
    }

    #[test]
    fn long_green_warns_unless_strict() {
        let plan = TimingPlan::new(95_000, 20_000, 3_000, 2_000);
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
    fn inconsistent_cycle_is_an_error() {
        let mut plan = TimingPlan::new(20_000, 20_000, 3_000, 2_000);
        plan.cycle_time_ms += 1_000;
        let result = SafetyValidator::default().check(&plan);
        assert!(!result.approved);
        assert!(result
            .violations
            .iter()
            .any(|v| v.kind == ViolationKind::CycleConsistency));
    }

    #[test]
    fn conflicting_phase_is_rejected() {
        let plan = TimingPlan::new(20_000, 20_000, 3_000, 2_000).with_phases(vec![PhaseSpec {
            name: "bad".to_string(),
            movements: vec![
                Movement::new(Direction::Eastbound, Turn::Through),
                Movement::new(Direction::Southbound, Turn::Left),
            ],
            duration_ms: 20_000,
        }]);
        let result = SafetyValidator::default().check(&plan);
        assert!(!result.approved);
        assert_eq!(result.count(Severity::Critical), 1);
    }

    #[test]
    fn history_is_bounded() {
        let validator = SafetyValidator::new(SafetyConstraints {
            history_size: 2,
            ..SafetyConstraints::default()
        });
        let plan = TimingPlan::new(20_000, 20_000, 3_000, 2_000);
        for _ in 0..5 {
            validator.validate(&plan);
        }
        assert_eq!(validator.history().len(), 2);
    }
}
