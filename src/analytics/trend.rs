//! Trend detection over a bounded history

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrendDirection {
    Increasing,
    Decreasing,
    Stable,
    /// Network scope: load rising
    Worsening,
    /// Network scope: load falling
    Improving,
}

/// Which vocabulary a trend is reported in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrendScope {
    Intersection,
    Network,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrendReport {
    pub direction: TrendDirection,
    pub change_percent: f64,
    /// Grows with history depth, saturating at 1
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrendConfig {
    pub window: usize,
    pub change_threshold_percent: f64,
}

impl Default for TrendConfig {
    fn default() -> Self {
        Self {
            window: 5,
            change_threshold_percent: 10.0,
        }
    }
}

impl TrendConfig {
    /// Compare the mean of the latest window with the window before it.
    /// Needs two full windows of history.
    pub fn detect(&self, history: &VecDeque<f64>, scope: TrendScope) -> Option<TrendReport> {
        let window = self.window.max(1);
        if history.len() < 2 * window {
            return None;
        }

        let n = history.len();
        let mean = |range: std::ops::Range<usize>| -> f64 {
            range.clone().map(|i| history[i]).sum::<f64>() / range.len() as f64
        };
        let recent = mean(n - window..n);
        let previous = mean(n - 2 * window..n - window);

        let change_percent = if previous.abs() <= f64::EPSILON {
            if recent.abs() <= f64::EPSILON {
                0.0
            } else {
                100.0
            }
        } else {
            (recent - previous) / previous.abs() * 100.0
        };

        let direction = if change_percent > self.change_threshold_percent {
            match scope {
                TrendScope::Intersection => TrendDirection::Increasing,
                TrendScope::Network => TrendDirection::Worsening,
            }
        } else if change_percent < -self.change_threshold_percent {
            match scope {
                TrendScope::Intersection => TrendDirection::Decreasing,
                TrendScope::Network => TrendDirection::Improving,
            }
        } else {
            TrendDirection::Stable
        };

        Some(TrendReport {
            direction,
            change_percent,
            confidence: (n as f64 / (4 * window) as f64).min(1.0),
        })
    }
}
