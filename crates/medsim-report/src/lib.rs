//! MedSim Report Generation
//!
//! Turns a finished session into a document: the player's progression plus
//! one entry per scored case, with its transcript and feedback. Reports can
//! be serialized to JSON or rendered to Markdown.
//!
//! # Types
//!
//! - [`SessionReport`] - Progression plus every case completed in the session
//! - [`CaseReport`] - One scored case
//! - [`HistoryReport`] - Experience, level and performance statistics
//!
//! # Generators
//!
//! - [`json::JsonGenerator`] - Compact or pretty JSON
//! - [`MarkdownGenerator`] - Human-readable Markdown

pub mod json;
mod markdown;

pub use markdown::MarkdownGenerator;

use chrono::{DateTime, Utc};
use medsim_session::{
    ActionType, CaseOutcome, CaseView, CompletedCase, Difficulty, Feedback, ProgressionState,
    ScenarioId, ScoreAxis, UserAction,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur during report generation.
#[derive(Debug, Error)]
pub enum ReportError {
    /// Failed to serialize the report to JSON.
    #[error("failed to serialize report: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Failed to read or write report files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid report data.
    #[error("invalid report data: {0}")]
    InvalidData(String),
}

/// Result type for report operations.
pub type Result<T> = std::result::Result<T, ReportError>;

// ============================================================================
// SessionReport
// ============================================================================

/// Everything a session produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionReport {
    /// When the report was assembled.
    pub generated_at: DateTime<Utc>,

    /// Progression at the time of the report.
    pub progression: HistoryReport,

    /// Scored cases, oldest first.
    pub cases: Vec<CaseReport>,
}

impl SessionReport {
    /// Assembles a report.
    ///
    /// # Errors
    ///
    /// Returns `ReportError::InvalidData` if there are more cases than the
    /// progression has recorded.
    pub fn new(
        progression: HistoryReport,
        cases: Vec<CaseReport>,
        generated_at: DateTime<Utc>,
    ) -> Result<Self> {
        let recorded = usize::try_from(progression.total_cases).unwrap_or(usize::MAX);
        if cases.len() > recorded {
            return Err(ReportError::InvalidData(format!(
                "{} cases supplied but progression records only {recorded}",
                cases.len()
            )));
        }

        Ok(Self {
            generated_at,
            progression,
            cases,
        })
    }

    /// Serializes the report to JSON.
    ///
    /// # Errors
    ///
    /// Returns `ReportError::Serialization` if JSON serialization fails.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(ReportError::from)
    }

    /// Returns `true` if no case was completed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }

    /// The case with the highest overall score.
    #[must_use]
    pub fn best_case(&self) -> Option<&CaseReport> {
        self.cases
            .iter()
            .max_by(|a, b| a.total_score().total_cmp(&b.total_score()))
    }
}

// ============================================================================
// CaseReport
// ============================================================================

/// One scored case.
///
/// Built from the archived [`CompletedCase`]; it never carries the case's
/// hidden description.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseReport {
    /// Care setting.
    pub scenario: ScenarioId,

    /// Difficulty.
    pub difficulty: Difficulty,

    /// Patient data as shown to the player.
    pub case: CaseView,

    /// Transcript, closing entries included.
    pub transcript: Vec<UserAction>,

    /// The evaluation.
    pub feedback: Feedback,

    /// Progression change caused by the case.
    pub outcome: CaseOutcome,

    /// When the feedback arrived.
    pub completed_at: DateTime<Utc>,
}

impl CaseReport {
    /// Overall score (axis mean).
    #[must_use]
    pub const fn total_score(&self) -> f64 {
        self.outcome.total
    }

    /// Inquiry entries in order, without the closing entries.
    pub fn inquiries(&self) -> impl Iterator<Item = &UserAction> {
        self.transcript.iter().filter(|a| !a.kind.is_closing())
    }

    /// Text of the closing entry of `kind`, if the player wrote one.
    #[must_use]
    pub fn closing_entry(&self, kind: ActionType) -> Option<&str> {
        self.transcript
            .iter()
            .find(|a| a.kind == kind)
            .map(|a| a.query.trim())
            .filter(|q| !q.is_empty())
    }
}

impl From<&CompletedCase> for CaseReport {
    fn from(completed: &CompletedCase) -> Self {
        Self {
            scenario: completed.scenario,
            difficulty: completed.difficulty,
            case: completed.case.clone(),
            transcript: completed.transcript.clone(),
            feedback: completed.feedback.clone(),
            outcome: completed.outcome,
            completed_at: completed.completed_at,
        }
    }
}

// ============================================================================
// HistoryReport
// ============================================================================

/// Mean score on one axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AxisSummary {
    /// The axis.
    pub axis: ScoreAxis,
    /// Display label.
    pub label: String,
    /// Mean over all cases, 0 when none.
    pub average: f64,
}

/// Flattened progression for reporting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryReport {
    /// Total experience points.
    pub xp: u64,
    /// Current level.
    pub level: u32,
    /// Experience still needed for the next level.
    pub xp_to_next_level: u64,
    /// Scored cases.
    pub total_cases: u32,
    /// Cases with a correct diagnosis.
    pub correct_diagnoses: u32,
    /// Correct diagnoses as a percentage.
    pub correct_diagnosis_rate: f64,
    /// Mean overall score.
    pub average_score: f64,
    /// Per-axis means.
    pub axis_averages: Vec<AxisSummary>,
}

impl From<&ProgressionState> for HistoryReport {
    fn from(state: &ProgressionState) -> Self {
        let history = state.history();
        Self {
            xp: state.xp(),
            level: state.level(),
            xp_to_next_level: state.xp_to_next_level(),
            total_cases: history.total_cases,
            correct_diagnoses: history.correct_diagnoses,
            correct_diagnosis_rate: history.correct_diagnosis_rate(),
            average_score: history.average_score,
            axis_averages: history
                .axis_averages()
                .into_iter()
                .map(|(axis, average)| AxisSummary {
                    axis,
                    label: axis.label().to_string(),
                    average,
                })
                .collect(),
        }
    }
}
