//! Experience, level and rolling performance history.
//!
//! Progression is only ever advanced by [`ProgressionTracker::record_case`],
//! once per successfully scored case. Nothing here is rolled back.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::model::{ScoreAxis, Scores};

/// Experience needed per level.
pub const XP_PER_LEVEL: u64 = 100;

/// A diagnostic reasoning score strictly above this counts as a correct
/// diagnosis.
pub const CORRECT_DIAGNOSIS_THRESHOLD: f64 = 80.0;

/// Level reached with `xp` experience points: `floor(xp / 100) + 1`.
#[must_use]
pub fn level_for_xp(xp: u64) -> u32 {
    u32::try_from(xp / XP_PER_LEVEL)
        .unwrap_or(u32::MAX)
        .saturating_add(1)
}

/// Experience earned for a case: the rounded axis mean, never negative.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn earned_xp(scores: &Scores) -> u64 {
    let rounded = (scores.sum() / 4.0).round();
    if rounded <= 0.0 {
        0
    } else {
        rounded as u64
    }
}

// ============================================================================
// PerformanceHistory
// ============================================================================

/// Per-axis score sequences, index-aligned by case.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoresByArea {
    /// Diagnostic reasoning scores.
    pub diagnostic_reasoning: Vec<f64>,
    /// Exam request scores.
    pub exam_requests: Vec<f64>,
    /// Patient safety scores.
    pub patient_safety: Vec<f64>,
    /// Final conduct scores.
    pub final_conduct: Vec<f64>,
}

impl ScoresByArea {
    /// The sequence recorded for `axis`.
    #[must_use]
    pub fn series(&self, axis: ScoreAxis) -> &[f64] {
        match axis {
            ScoreAxis::DiagnosticReasoning => &self.diagnostic_reasoning,
            ScoreAxis::ExamRequests => &self.exam_requests,
            ScoreAxis::PatientSafety => &self.patient_safety,
            ScoreAxis::FinalConduct => &self.final_conduct,
        }
    }

    fn push(&mut self, scores: &Scores) {
        self.diagnostic_reasoning.push(scores.diagnostic_reasoning);
        self.exam_requests.push(scores.exam_requests);
        self.patient_safety.push(scores.patient_safety);
        self.final_conduct.push(scores.final_conduct);
    }
}

/// Aggregate statistics over every case completed in this session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceHistory {
    /// Number of scored cases.
    pub total_cases: u32,
    /// Cases whose diagnostic reasoning exceeded the threshold.
    pub correct_diagnoses: u32,
    /// Running mean of the per-case overall score.
    pub average_score: f64,
    /// Per-axis scores for every case, oldest first.
    pub scores_by_area: ScoresByArea,
}

impl PerformanceHistory {
    /// Mean of each axis over all recorded cases, 0 when empty.
    #[must_use]
    pub fn axis_averages(&self) -> Vec<(ScoreAxis, f64)> {
        ScoreAxis::ALL
            .iter()
            .map(|axis| {
                let series = self.scores_by_area.series(*axis);
                let mean = if series.is_empty() {
                    0.0
                } else {
                    series.iter().sum::<f64>() / f64::from(self.total_cases.max(1))
                };
                (*axis, mean)
            })
            .collect()
    }

    /// Percentage of cases with a correct diagnosis, 0 when empty.
    #[must_use]
    pub fn correct_diagnosis_rate(&self) -> f64 {
        if self.total_cases == 0 {
            0.0
        } else {
            f64::from(self.correct_diagnoses) / f64::from(self.total_cases) * 100.0
        }
    }
}

// ============================================================================
// ProgressionState
// ============================================================================

/// Experience, level and history for the current session.
///
/// Fields are private so that `level` always agrees with `xp` and every
/// per-axis sequence has `total_cases` entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressionState {
    xp: u64,
    level: u32,
    history: PerformanceHistory,
}

impl Default for ProgressionState {
    fn default() -> Self {
        Self {
            xp: 0,
            level: 1,
            history: PerformanceHistory::default(),
        }
    }
}

impl ProgressionState {
    /// Total experience points.
    #[must_use]
    pub const fn xp(&self) -> u64 {
        self.xp
    }

    /// Current level, starting at 1.
    #[must_use]
    pub const fn level(&self) -> u32 {
        self.level
    }

    /// Performance history.
    #[must_use]
    pub const fn history(&self) -> &PerformanceHistory {
        &self.history
    }

    /// Experience still needed to reach the next level.
    #[must_use]
    pub const fn xp_to_next_level(&self) -> u64 {
        XP_PER_LEVEL - self.xp % XP_PER_LEVEL
    }
}

/// What recording one case changed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseOutcome {
    /// Overall score (axis mean).
    pub total: f64,
    /// Experience points awarded.
    pub earned_xp: u64,
    /// Whether the diagnosis counted as correct.
    pub correct_diagnosis: bool,
    /// Level before the case.
    pub level_before: u32,
    /// Level after the case.
    pub level_after: u32,
}

impl CaseOutcome {
    /// Returns `true` if the case pushed the player to a new level.
    #[must_use]
    pub const fn leveled_up(&self) -> bool {
        self.level_after > self.level_before
    }
}

// ============================================================================
// ProgressionTracker
// ============================================================================

/// Owns the session's [`ProgressionState`] and folds scored cases into it.
#[derive(Debug, Clone, Default)]
pub struct ProgressionTracker {
    state: ProgressionState,
}

impl ProgressionTracker {
    /// Creates a tracker at level 1 with no history.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current progression.
    #[must_use]
    pub const fn state(&self) -> &ProgressionState {
        &self.state
    }

    /// Folds one scored case into the progression.
    pub fn record_case(&mut self, scores: &Scores) -> CaseOutcome {
        let total = scores.mean();
        let earned = earned_xp(scores);
        let correct_diagnosis = scores.diagnostic_reasoning > CORRECT_DIAGNOSIS_THRESHOLD;
        let level_before = self.state.level;

        let state = &mut self.state;
        state.xp = state.xp.saturating_add(earned);
        state.level = level_for_xp(state.xp);

        let history = &mut state.history;
        let previous = f64::from(history.total_cases);
        history.average_score = history
            .average_score
            .mul_add(previous, total)
            / (previous + 1.0);
        history.total_cases = history.total_cases.saturating_add(1);
        if correct_diagnosis {
            history.correct_diagnoses = history.correct_diagnoses.saturating_add(1);
        }
        history.scores_by_area.push(scores);

        let outcome = CaseOutcome {
            total,
            earned_xp: earned,
            correct_diagnosis,
            level_before,
            level_after: state.level,
        };

        info!(
            total,
            earned_xp = earned,
            xp = state.xp,
            level = state.level,
            correct_diagnosis,
            "Case recorded"
        );

        outcome
    }
}
