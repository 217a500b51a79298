//! Data contracts shared by the session, the progression tracker and the
//! content provider.
//!
//! Labels exposed by `label()` are the pt-BR strings shown to players and
//! sent to the content provider.

use std::fmt;

use serde::{Deserialize, Serialize};

// ============================================================================
// SessionMode
// ============================================================================

/// Which screen of the simulator is currently active.
///
/// Legal transitions:
/// - `Menu` -> `InCase` -> `Feedback` -> `Menu`
/// - `Menu` -> `SkillTraining` -> `Menu` (with `SkillTraining` -> `SkillTraining`
///   for the next challenge)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    /// Scenario and skill selection.
    #[default]
    Menu,
    /// A clinical case is being worked.
    InCase,
    /// The scored feedback for the last case is on screen.
    Feedback,
    /// A skill challenge is active.
    SkillTraining,
}

impl fmt::Display for SessionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Menu => write!(f, "menu"),
            Self::InCase => write!(f, "in_case"),
            Self::Feedback => write!(f, "feedback"),
            Self::SkillTraining => write!(f, "skill_training"),
        }
    }
}

// ============================================================================
// Catalog: scenarios, difficulties, skills
// ============================================================================

/// Care setting in which a case takes place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScenarioId {
    /// Urgent care unit.
    #[serde(rename = "UPA")]
    Upa,
    /// Primary care walk-in clinic.
    #[serde(rename = "UBS")]
    Ubs,
    /// High-complexity emergency department.
    #[serde(rename = "HOSPITAL")]
    Hospital,
    /// Intensive care unit.
    #[serde(rename = "UTI")]
    Uti,
    /// Operating room.
    #[serde(rename = "CENTRO_CIRURGICO")]
    Surgery,
}

impl ScenarioId {
    /// Display label, also used in case generation requests.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Upa => "UPA / Pronto Atendimento",
            Self::Ubs => "Demanda Espontânea de UBS",
            Self::Hospital => "P.S. de Alta Complexidade",
            Self::Uti => "UTI",
            Self::Surgery => "Centro Cirúrgico",
        }
    }

    /// Short description of the kind of cases the scenario produces.
    #[must_use]
    pub const fn description(&self) -> &'static str {
        match self {
            Self::Upa => "Casos de complexidade intermediária.",
            Self::Ubs => "Casos de baixa complexidade e atenção primária.",
            Self::Hospital => "Casos graves e desafiadores.",
            Self::Uti => "Manejo de pacientes críticos.",
            Self::Surgery => "Emergências cirúrgicas.",
        }
    }

    /// Minimum player level needed to start a case in this scenario.
    #[must_use]
    pub const fn required_level(&self) -> u32 {
        match self {
            Self::Upa | Self::Ubs => 1,
            Self::Hospital => 3,
            Self::Uti => 5,
            Self::Surgery => 8,
        }
    }

    /// Returns `true` if a player at `level` may start this scenario.
    #[must_use]
    pub const fn is_unlocked(&self, level: u32) -> bool {
        level >= self.required_level()
    }
}

impl fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Case difficulty requested from the content provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    /// Straightforward presentations.
    #[default]
    Beginner,
    /// Some confounders.
    Intermediate,
    /// Atypical or critical presentations.
    Advanced,
}

impl Difficulty {
    /// Display label, also used in case generation requests.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Beginner => "Iniciante",
            Self::Intermediate => "Intermediário",
            Self::Advanced => "Avançado",
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Focused skill that can be drilled outside of a full case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Skill {
    /// ECG interpretation.
    Ecg,
    /// Chest X-ray reading.
    ChestXray,
    /// Hypertensive crisis management.
    HypertensiveCrisis,
}

impl Skill {
    /// Display label, also used in challenge generation requests.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Ecg => "Interpretação de ECG",
            Self::ChestXray => "Análise de Raio-X de Tórax",
            Self::HypertensiveCrisis => "Manejo de Crise Hipertensiva",
        }
    }
}

impl fmt::Display for Skill {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ============================================================================
// ClinicalCase
// ============================================================================

/// Bedside vital signs, as free-form readings with their units.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VitalSigns {
    /// Heart rate (bpm).
    pub heart_rate: String,
    /// Respiratory rate (breaths per minute).
    pub respiratory_rate: String,
    /// Blood pressure (mmHg).
    pub blood_pressure: String,
    /// Temperature (°C).
    pub temperature: String,
    /// Peripheral oxygen saturation (%).
    pub oxygen_saturation: String,
    /// Capillary glycemia (mg/dL), when measured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub glycemia: Option<String>,
}

impl VitalSigns {
    /// Labeled readings in display order, skipping glycemia when absent.
    #[must_use]
    pub fn readings(&self) -> Vec<(&'static str, &str)> {
        let mut readings = vec![
            ("FC", self.heart_rate.as_str()),
            ("FR", self.respiratory_rate.as_str()),
            ("PA", self.blood_pressure.as_str()),
            ("Temp", self.temperature.as_str()),
            ("SatO₂", self.oxygen_saturation.as_str()),
        ];
        if let Some(glycemia) = &self.glycemia {
            readings.push(("Glicemia", glycemia.as_str()));
        }
        readings
    }
}

/// A generated patient encounter.
///
/// `full_case_description` holds the ground truth (diagnosis and rationale).
/// It is sent back to the content provider for replies and scoring but never
/// exposed to the player; use [`ClinicalCase::view`] for anything rendered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClinicalCase {
    /// Age, sex and relevant comorbidities.
    pub patient_info: String,
    /// Chief complaint and a short history of present illness.
    pub initial_complaint: String,
    /// Vital signs at presentation.
    pub vital_signs: VitalSigns,
    /// Hidden ground truth used for replies and scoring.
    pub full_case_description: String,
}

impl ClinicalCase {
    /// Player-visible projection of the case.
    #[must_use]
    pub fn view(&self) -> CaseView {
        CaseView {
            patient_info: self.patient_info.clone(),
            initial_complaint: self.initial_complaint.clone(),
            vital_signs: self.vital_signs.clone(),
        }
    }
}

/// The part of a [`ClinicalCase`] that may be shown to the player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseView {
    /// Age, sex and relevant comorbidities.
    pub patient_info: String,
    /// Chief complaint.
    pub initial_complaint: String,
    /// Vital signs at presentation.
    pub vital_signs: VitalSigns,
}

// ============================================================================
// UserAction
// ============================================================================

/// Kind of transcript entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    /// History taking; answered in the patient's voice.
    Anamnesis,
    /// Physical examination; answered with findings.
    PhysicalExam,
    /// Laboratory or imaging request; answered with results.
    LabsImaging,
    /// Diagnostic hypotheses, recorded when the case is finished.
    Hypotheses,
    /// Final conduct, recorded when the case is finished.
    FinalConduct,
}

impl ActionType {
    /// Action types the player may submit while working a case.
    pub const INQUIRIES: [Self; 3] = [Self::Anamnesis, Self::PhysicalExam, Self::LabsImaging];

    /// Display label, also used to prefix queries sent to the provider.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Anamnesis => "Anamnese",
            Self::PhysicalExam => "Exame Físico",
            Self::LabsImaging => "Exames",
            Self::Hypotheses => "Hipóteses",
            Self::FinalConduct => "Conduta",
        }
    }

    /// Returns `true` for the two entries that close a case.
    #[must_use]
    pub const fn is_closing(&self) -> bool {
        matches!(self, Self::Hypotheses | Self::FinalConduct)
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One transcript entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAction {
    /// What kind of request this is.
    #[serde(rename = "type")]
    pub kind: ActionType,
    /// The player's text.
    pub query: String,
    /// The provider's reply; `None` while pending and for closing entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
}

impl UserAction {
    /// Creates an entry with no response yet.
    #[must_use]
    pub fn new(kind: ActionType, query: impl Into<String>) -> Self {
        Self {
            kind,
            query: query.into(),
            response: None,
        }
    }

    /// The action string sent to the provider, e.g. `"Anamnese: tem febre?"`.
    #[must_use]
    pub fn prompt_line(&self) -> String {
        format!("{}: {}", self.kind.label(), self.query)
    }
}

// ============================================================================
// Scores and Feedback
// ============================================================================

/// Lowest valid score on any axis.
pub const SCORE_MIN: f64 = 0.0;

/// Highest valid score on any axis.
pub const SCORE_MAX: f64 = 100.0;

/// One of the four scoring dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ScoreAxis {
    /// Quality of the diagnostic reasoning.
    DiagnosticReasoning,
    /// Relevance of the exams requested.
    ExamRequests,
    /// Patient safety throughout the encounter.
    PatientSafety,
    /// Adequacy of the final conduct.
    FinalConduct,
}

impl ScoreAxis {
    /// Every axis, in report order.
    pub const ALL: [Self; 4] = [
        Self::DiagnosticReasoning,
        Self::ExamRequests,
        Self::PatientSafety,
        Self::FinalConduct,
    ];

    /// Short display label.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::DiagnosticReasoning => "Raciocínio Diag.",
            Self::ExamRequests => "Exames",
            Self::PatientSafety => "Segurança",
            Self::FinalConduct => "Conduta",
        }
    }
}

impl fmt::Display for ScoreAxis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// How out-of-range scores from the provider are handled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ScorePolicy {
    /// Clamp finite values into `[0, 100]` (default).
    #[default]
    Clamp,
    /// Treat any out-of-range value as a provider failure.
    Reject,
    /// Keep values as reported.
    PassThrough,
}

impl ScorePolicy {
    /// Parses a string into a `ScorePolicy`, case-insensitively.
    fn from_str_case_insensitive(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "clamp" => Some(Self::Clamp),
            "reject" => Some(Self::Reject),
            "passthrough" | "pass_through" | "pass-through" => Some(Self::PassThrough),
            _ => None,
        }
    }
}

impl<'de> Deserialize<'de> for ScorePolicy {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_str_case_insensitive(&s).ok_or_else(|| {
            serde::de::Error::custom(format!(
                "invalid score policy '{s}': expected one of 'clamp', 'reject', 'passThrough'"
            ))
        })
    }
}

impl Serialize for ScorePolicy {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let s = match self {
            Self::Clamp => "clamp",
            Self::Reject => "reject",
            Self::PassThrough => "passThrough",
        };
        serializer.serialize_str(s)
    }
}

/// A score that could not be accepted under the active [`ScorePolicy`].
#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
#[error("score for {axis} is out of range: {value}")]
pub struct ScoreRangeError {
    /// The offending axis.
    pub axis: ScoreAxis,
    /// The value the provider reported.
    pub value: f64,
}

/// Per-axis scores for one case.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scores {
    /// Diagnostic reasoning score.
    pub diagnostic_reasoning: f64,
    /// Exam request score.
    pub exam_requests: f64,
    /// Patient safety score.
    pub patient_safety: f64,
    /// Final conduct score.
    pub final_conduct: f64,
}

impl Scores {
    /// Creates a score record from the four axis values.
    #[must_use]
    pub const fn new(
        diagnostic_reasoning: f64,
        exam_requests: f64,
        patient_safety: f64,
        final_conduct: f64,
    ) -> Self {
        Self {
            diagnostic_reasoning,
            exam_requests,
            patient_safety,
            final_conduct,
        }
    }

    /// Value of a single axis.
    #[must_use]
    pub const fn get(&self, axis: ScoreAxis) -> f64 {
        match axis {
            ScoreAxis::DiagnosticReasoning => self.diagnostic_reasoning,
            ScoreAxis::ExamRequests => self.exam_requests,
            ScoreAxis::PatientSafety => self.patient_safety,
            ScoreAxis::FinalConduct => self.final_conduct,
        }
    }

    fn map(self, f: impl Fn(f64) -> f64) -> Self {
        Self::new(
            f(self.diagnostic_reasoning),
            f(self.exam_requests),
            f(self.patient_safety),
            f(self.final_conduct),
        )
    }

    /// Sum of the four axes.
    #[must_use]
    pub fn sum(&self) -> f64 {
        ScoreAxis::ALL.iter().map(|axis| self.get(*axis)).sum()
    }

    /// Overall case score: arithmetic mean of the four axes.
    #[must_use]
    pub fn mean(&self) -> f64 {
        self.sum() / 4.0
    }

    /// Returns `true` if every axis lies in `[0, 100]`.
    #[must_use]
    pub fn is_within_range(&self) -> bool {
        ScoreAxis::ALL
            .iter()
            .all(|axis| (SCORE_MIN..=SCORE_MAX).contains(&self.get(*axis)))
    }

    /// Applies `policy` to the raw provider scores.
    ///
    /// Non-finite values are rejected under every policy.
    ///
    /// # Errors
    ///
    /// Returns `ScoreRangeError` for the first axis that cannot be accepted.
    pub fn apply_policy(self, policy: ScorePolicy) -> Result<Self, ScoreRangeError> {
        for axis in ScoreAxis::ALL {
            let value = self.get(axis);
            let in_range = (SCORE_MIN..=SCORE_MAX).contains(&value);
            if !value.is_finite() || (policy == ScorePolicy::Reject && !in_range) {
                return Err(ScoreRangeError { axis, value });
            }
        }
        Ok(match policy {
            ScorePolicy::Clamp => self.map(|v| v.clamp(SCORE_MIN, SCORE_MAX)),
            ScorePolicy::Reject | ScorePolicy::PassThrough => self,
        })
    }
}

/// Structured evaluation of a finished case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Feedback {
    /// Most likely final diagnosis.
    pub final_diagnosis: String,
    /// Commentary on the differentials considered or missed.
    pub differential_feedback: String,
    /// Markdown bullet list of what went well.
    pub correct_actions: String,
    /// Markdown bullet list of what was inadequate, unsafe or unnecessary.
    pub inadequate_actions: String,
    /// Guidelines and protocols the evaluation relied on.
    pub references: String,
    /// Per-axis scores.
    pub scores: Scores,
}

// ============================================================================
// Skill training
// ============================================================================

/// A short focused exercise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillChallenge {
    /// Text shown to the player.
    pub challenge_text: String,
    /// Hidden answer key used for evaluation.
    pub full_description: String,
}

impl SkillChallenge {
    /// Player-visible projection of the challenge.
    #[must_use]
    pub fn view(&self) -> ChallengeView {
        ChallengeView {
            challenge_text: self.challenge_text.clone(),
        }
    }
}

/// The part of a [`SkillChallenge`] that may be shown to the player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeView {
    /// Text shown to the player.
    pub challenge_text: String,
}

/// Verdict on a skill attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillFeedback {
    /// Whether the answer was correct or mostly correct.
    pub is_correct: bool,
    /// Short educational explanation.
    pub explanation: String,
}
