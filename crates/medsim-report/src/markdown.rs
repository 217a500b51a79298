//! Markdown rendering of a [`SessionReport`].
//!
//! The document has a progression summary with per-area averages, followed
//! by one section per case: patient data, the transcript, the closing
//! entries and the preceptor feedback.

use chrono::{DateTime, Utc};
use std::fmt::Write;

use crate::{CaseReport, HistoryReport, SessionReport};
use medsim_session::{ActionType, ScoreAxis};

/// Shown in place of a closing entry the player never wrote.
const NOT_PROVIDED: &str = "Não informado";

/// Generates Markdown reports from a finished session.
pub struct MarkdownGenerator<'a> {
    report: &'a SessionReport,
}

impl<'a> MarkdownGenerator<'a> {
    /// Creates a new Markdown generator for the given report.
    #[must_use]
    pub const fn new(report: &'a SessionReport) -> Self {
        Self { report }
    }

    /// Generates the complete Markdown report.
    #[must_use]
    pub fn generate(&self) -> String {
        let mut output = String::new();

        self.write_title(&mut output);
        Self::write_progression(&mut output, &self.report.progression);
        self.write_cases(&mut output);
        Self::write_footer(&mut output);

        output
    }

    fn write_title(&self, output: &mut String) {
        let _ = writeln!(output, "# MedSim Session Report\n");
        let _ = writeln!(
            output,
            "*Generated at {}*\n",
            format_timestamp(&self.report.generated_at)
        );
    }

    fn write_progression(output: &mut String, progression: &HistoryReport) {
        let _ = writeln!(output, "## Progression\n");
        let _ = writeln!(output, "| Metric | Value |");
        let _ = writeln!(output, "|--------|-------|");
        let _ = writeln!(output, "| Level | {} |", progression.level);
        let _ = writeln!(
            output,
            "| XP | {} ({} to next level) |",
            progression.xp, progression.xp_to_next_level
        );
        let _ = writeln!(output, "| Cases | {} |", progression.total_cases);
        let _ = writeln!(
            output,
            "| Correct diagnoses | {} ({:.0}%) |",
            progression.correct_diagnoses, progression.correct_diagnosis_rate
        );
        let _ = writeln!(
            output,
            "| Average score | {:.1} |",
            progression.average_score
        );
        let _ = writeln!(output);

        let _ = writeln!(output, "### Scores by Area\n");
        let _ = writeln!(output, "| Area | Average |");
        let _ = writeln!(output, "|------|---------|");
        for summary in &progression.axis_averages {
            let _ = writeln!(
                output,
                "| {} | {:.1} |",
                escape_cell(&summary.label),
                summary.average
            );
        }
        let _ = writeln!(output);
    }

    fn write_cases(&self, output: &mut String) {
        let _ = writeln!(output, "## Cases\n");

        if self.report.is_empty() {
            let _ = writeln!(output, "*No cases completed.*\n");
            return;
        }

        for (index, case) in self.report.cases.iter().enumerate() {
            Self::write_case(output, index + 1, case);
        }
    }

    fn write_case(output: &mut String, number: usize, case: &CaseReport) {
        let _ = writeln!(
            output,
            "### Case {number}: {} ({})\n",
            case.scenario.label(),
            case.difficulty.label()
        );
        let _ = writeln!(
            output,
            "*Completed at {}*\n",
            format_timestamp(&case.completed_at)
        );

        let _ = writeln!(output, "- **Patient**: {}", case.case.patient_info);
        let _ = writeln!(
            output,
            "- **Chief complaint**: {}",
            case.case.initial_complaint
        );
        let vitals = case
            .case
            .vital_signs
            .readings()
            .into_iter()
            .map(|(label, value)| format!("{label} {value}"))
            .collect::<Vec<_>>()
            .join(", ");
        let _ = writeln!(output, "- **Vital signs**: {vitals}\n");

        Self::write_transcript(output, case);
        Self::write_feedback(output, case);
    }

    fn write_transcript(output: &mut String, case: &CaseReport) {
        let _ = writeln!(output, "#### Transcript\n");

        let mut empty = true;
        for (index, action) in case.inquiries().enumerate() {
            empty = false;
            let _ = writeln!(
                output,
                "{}. **{}**: {}",
                index + 1,
                action.kind.label(),
                action.query
            );
            if let Some(response) = &action.response {
                let _ = writeln!(output, "   > {}", single_line(response));
            }
        }
        if empty {
            let _ = writeln!(output, "*No inquiries.*");
        }
        let _ = writeln!(output);

        let hypotheses = case
            .closing_entry(ActionType::Hypotheses)
            .unwrap_or(NOT_PROVIDED);
        let conduct = case
            .closing_entry(ActionType::FinalConduct)
            .unwrap_or(NOT_PROVIDED);
        let _ = writeln!(output, "- **Hypotheses**: {hypotheses}");
        let _ = writeln!(output, "- **Final conduct**: {conduct}\n");
    }

    fn write_feedback(output: &mut String, case: &CaseReport) {
        let feedback = &case.feedback;
        let outcome = &case.outcome;

        let _ = writeln!(output, "#### Feedback\n");
        let _ = writeln!(
            output,
            "- **Final diagnosis**: {}",
            feedback.final_diagnosis
        );
        let _ = writeln!(
            output,
            "- **Overall score**: {:.1} (+{} XP{})\n",
            outcome.total,
            outcome.earned_xp,
            if outcome.leveled_up() {
                format!(", level {}", outcome.level_after)
            } else {
                String::new()
            }
        );

        let _ = writeln!(output, "| Area | Score |");
        let _ = writeln!(output, "|------|-------|");
        for axis in ScoreAxis::ALL {
            let _ = writeln!(
                output,
                "| {} | {:.0} |",
                axis.label(),
                feedback.scores.get(axis)
            );
        }
        let _ = writeln!(output);

        let _ = writeln!(
            output,
            "**Differential diagnosis**: {}\n",
            feedback.differential_feedback
        );
        let _ = writeln!(
            output,
            "**What went well**\n\n{}\n",
            feedback.correct_actions.trim()
        );
        let _ = writeln!(
            output,
            "**What to improve**\n\n{}\n",
            feedback.inadequate_actions.trim()
        );
        let _ = writeln!(output, "**References**: {}\n", feedback.references);
    }

    fn write_footer(output: &mut String) {
        let _ = writeln!(output, "---");
        let _ = writeln!(output, "*Generated by MedSim*");
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Format: "YYYY-MM-DD HH:MM:SS UTC"
fn format_timestamp(dt: &DateTime<Utc>) -> String {
    dt.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

/// Escapes pipes so text can sit inside a table cell.
fn escape_cell(text: &str) -> String {
    single_line(text).replace('|', "\\|")
}

/// Collapses line breaks so text fits in a blockquote line.
fn single_line(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
