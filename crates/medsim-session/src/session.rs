//! The session state machine.
//!
//! Every operation that needs the content provider is split in two phases:
//! a `begin_*` method that checks preconditions, applies the pre-call
//! mutations and hands back a [`RequestTicket`] together with the request
//! payload, and a matching `complete_*` method that folds the provider's
//! result back in. The split keeps [`Session`] synchronous so it can sit
//! behind a plain mutex while the provider call runs without holding it.
//!
//! A ticket is only honoured if it is still the pending request and the
//! session has not been reset since it was issued. Anything else is stale
//! and discarded.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Result, SessionError};
use crate::model::{
    ActionType, CaseView, ChallengeView, ClinicalCase, Difficulty, Feedback, ScenarioId,
    ScorePolicy, SessionMode, Skill, SkillChallenge, SkillFeedback, UserAction,
};
use crate::progression::{CaseOutcome, ProgressionState, ProgressionTracker};
use crate::provider::ProviderError;

// ============================================================================
// OperationKind
// ============================================================================

/// The provider-backed operations a session can have in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Generating a new clinical case.
    GenerateCase,
    /// Getting the reply to a player action.
    Interaction,
    /// Scoring a finished case.
    Feedback,
    /// Generating a skill challenge (first or next).
    GenerateChallenge,
    /// Judging a skill answer.
    EvaluateSkill,
}

impl OperationKind {
    /// Localized message shown to the player when the operation fails.
    #[must_use]
    pub const fn failure_message(&self) -> &'static str {
        match self {
            Self::GenerateCase => "Falha ao gerar o caso clínico. Tente novamente.",
            Self::Interaction => "Falha ao obter resposta da IA. Tente novamente.",
            Self::Feedback => {
                "Falha ao gerar o feedback. Por favor, tente finalizar o caso novamente."
            }
            Self::GenerateChallenge => "Falha ao gerar o desafio. Tente novamente.",
            Self::EvaluateSkill => "Falha ao avaliar a resposta. Tente novamente.",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GenerateCase => write!(f, "start a case"),
            Self::Interaction => write!(f, "submit an action"),
            Self::Feedback => write!(f, "finish the case"),
            Self::GenerateChallenge => write!(f, "generate a skill challenge"),
            Self::EvaluateSkill => write!(f, "evaluate a skill attempt"),
        }
    }
}

// ============================================================================
// Tickets and requests
// ============================================================================

/// Identifies one outstanding provider call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestTicket {
    id: u64,
    epoch: u64,
    operation: OperationKind,
}

impl RequestTicket {
    /// Monotonic request id within the session.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// The session epoch at the time the request was issued.
    #[must_use]
    pub const fn epoch(&self) -> u64 {
        self.epoch
    }

    /// The operation the ticket was issued for.
    #[must_use]
    pub const fn operation(&self) -> OperationKind {
        self.operation
    }
}

/// Payload for case generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaseRequest {
    /// Requested care setting.
    pub scenario: ScenarioId,
    /// Requested difficulty.
    pub difficulty: Difficulty,
}

/// Payload for an interaction reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InteractionRequest {
    /// The full case, hidden description included.
    pub case: ClinicalCase,
    /// Transcript before the new action.
    pub history: Vec<UserAction>,
    /// The labeled action line.
    pub action: String,
}

/// Payload for scoring a finished case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedbackRequest {
    /// The full case, hidden description included.
    pub case: ClinicalCase,
    /// The full transcript, closing entries included.
    pub transcript: Vec<UserAction>,
}

/// Payload for skill challenge generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChallengeRequest {
    /// The skill to drill.
    pub skill: Skill,
}

/// Payload for judging a skill answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluationRequest {
    /// The active challenge, answer key included.
    pub challenge: SkillChallenge,
    /// The player's answer.
    pub answer: String,
}

/// Result of folding a provider response into the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum Completion {
    /// The response was applied.
    Applied,
    /// The provider failed; the session now carries an error message.
    Failed,
    /// The ticket no longer matched and the response was dropped.
    Stale,
}

// ============================================================================
// Snapshot
// ============================================================================

/// What the presentation layer should draw.
///
/// A mode whose data is missing resolves to [`Screen::Nothing`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Screen {
    /// The history overlay.
    History,
    /// Scenario and skill selection.
    Menu,
    /// The case workspace.
    Case,
    /// The feedback for the last case.
    Feedback,
    /// The active skill challenge.
    SkillTraining,
    /// Nothing to draw.
    Nothing,
}

/// A finished and scored case, as archived for reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedCase {
    /// Care setting.
    pub scenario: ScenarioId,
    /// Difficulty.
    pub difficulty: Difficulty,
    /// Player-visible case data.
    pub case: CaseView,
    /// Full transcript, closing entries included.
    pub transcript: Vec<UserAction>,
    /// The feedback, with scores after the score policy.
    pub feedback: Feedback,
    /// Progression change caused by this case.
    pub outcome: CaseOutcome,
    /// When the feedback arrived.
    pub completed_at: DateTime<Utc>,
}

/// Read-only view of the session for rendering.
///
/// Hidden fields (the case's full description and the challenge's answer
/// key) are never included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    /// Active mode.
    pub mode: SessionMode,
    /// Screen to render, derived from mode, data and overlay.
    pub screen: Screen,
    /// Scenario of the active case.
    pub scenario: Option<ScenarioId>,
    /// Difficulty of the active case.
    pub difficulty: Option<Difficulty>,
    /// The active case.
    pub case: Option<CaseView>,
    /// The action transcript.
    pub transcript: Vec<UserAction>,
    /// Feedback for the current case.
    pub feedback: Option<Feedback>,
    /// Skill being trained.
    pub skill: Option<Skill>,
    /// The active challenge.
    pub challenge: Option<ChallengeView>,
    /// Verdict on the last skill answer.
    pub skill_feedback: Option<SkillFeedback>,
    /// The action input buffer.
    pub draft: String,
    /// Whether a provider call is in flight.
    pub loading: bool,
    /// The operation in flight, if any.
    pub pending_operation: Option<OperationKind>,
    /// Localized error message from the last failure.
    pub error: Option<String>,
    /// Whether the history overlay is shown.
    pub show_history: bool,
    /// Whether the closing entries have been appended.
    pub finish_requested: bool,
    /// Experience, level and history.
    pub progression: ProgressionState,
    /// Progression change caused by the most recent case.
    pub last_outcome: Option<CaseOutcome>,
}

// ============================================================================
// Session
// ============================================================================

/// One player's simulator session.
///
/// Owns the mode, the active case or challenge, the transcript and the
/// [`ProgressionTracker`]. All mutation goes through the methods below;
/// at most one provider call is outstanding at a time.
#[derive(Debug, Clone, Default)]
pub struct Session {
    mode: SessionMode,
    scenario: Option<ScenarioId>,
    difficulty: Option<Difficulty>,
    case: Option<ClinicalCase>,
    transcript: Vec<UserAction>,
    feedback: Option<Feedback>,
    finish_requested: bool,
    skill: Option<Skill>,
    challenge: Option<SkillChallenge>,
    skill_feedback: Option<SkillFeedback>,
    draft: String,
    pending: Option<RequestTicket>,
    error: Option<String>,
    show_history: bool,
    epoch: u64,
    next_request_id: u64,
    progression: ProgressionTracker,
    last_outcome: Option<CaseOutcome>,
    completed_case: Option<CompletedCase>,
    score_policy: ScorePolicy,
}

impl Session {
    /// Creates a session at the menu with fresh progression.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a session that applies `policy` to provider scores.
    #[must_use]
    pub fn with_score_policy(policy: ScorePolicy) -> Self {
        Self {
            score_policy: policy,
            ..Self::default()
        }
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    /// Active mode.
    #[must_use]
    pub const fn mode(&self) -> SessionMode {
        self.mode
    }

    /// Whether a provider call is in flight.
    #[must_use]
    pub const fn is_loading(&self) -> bool {
        self.pending.is_some()
    }

    /// The active case, hidden description included.
    #[must_use]
    pub const fn case(&self) -> Option<&ClinicalCase> {
        self.case.as_ref()
    }

    /// The action transcript.
    #[must_use]
    pub fn transcript(&self) -> &[UserAction] {
        &self.transcript
    }

    /// Feedback for the current case.
    #[must_use]
    pub const fn feedback(&self) -> Option<&Feedback> {
        self.feedback.as_ref()
    }

    /// The active challenge, answer key included.
    #[must_use]
    pub const fn challenge(&self) -> Option<&SkillChallenge> {
        self.challenge.as_ref()
    }

    /// Verdict on the last skill answer.
    #[must_use]
    pub const fn skill_feedback(&self) -> Option<&SkillFeedback> {
        self.skill_feedback.as_ref()
    }

    /// Localized error message from the last failure.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Experience, level and history.
    #[must_use]
    pub const fn progression(&self) -> &ProgressionState {
        self.progression.state()
    }

    /// The most recently completed case, until the next reset.
    #[must_use]
    pub const fn completed_case(&self) -> Option<&CompletedCase> {
        self.completed_case.as_ref()
    }

    // ------------------------------------------------------------------------
    // Presentation-only state
    // ------------------------------------------------------------------------

    /// Replaces the action input buffer.
    pub fn set_draft(&mut self, text: impl Into<String>) {
        self.draft = text.into();
    }

    /// Shows the history overlay.
    pub fn show_history(&mut self) {
        self.show_history = true;
    }

    /// Hides the history overlay.
    pub fn hide_history(&mut self) {
        self.show_history = false;
    }

    /// Returns to the menu, discarding the case, the challenge and every
    /// piece of per-case state. Always legal.
    ///
    /// An in-flight request keeps the session loading until it resolves,
    /// but its response will be discarded.
    pub fn reset_to_menu(&mut self) {
        self.mode = SessionMode::Menu;
        self.clear_case();
        self.clear_skill();
        self.error = None;
        self.show_history = false;
        self.draft.clear();
        self.completed_case = None;
        self.epoch += 1;
        debug!(epoch = self.epoch, "Session reset to menu");
    }

    // ------------------------------------------------------------------------
    // Case flow
    // ------------------------------------------------------------------------

    /// Starts generating a case. Legal from the menu only.
    ///
    /// # Errors
    ///
    /// Returns `Busy`, `InvalidOperation`, or `ScenarioLocked` if the
    /// player's level is below the scenario's requirement.
    pub fn begin_start_case(
        &mut self,
        scenario: ScenarioId,
        difficulty: Difficulty,
    ) -> Result<(RequestTicket, CaseRequest)> {
        let operation = OperationKind::GenerateCase;
        self.ensure_idle(operation)?;
        self.ensure_mode(operation, &[SessionMode::Menu])?;

        let level = self.progression().level();
        if !scenario.is_unlocked(level) {
            return Err(SessionError::ScenarioLocked {
                scenario,
                required: scenario.required_level(),
                current: level,
            });
        }

        self.error = None;
        let ticket = self.issue(operation);
        Ok((
            ticket,
            CaseRequest {
                scenario,
                difficulty,
            },
        ))
    }

    /// Applies the case generation result.
    pub fn complete_start_case(
        &mut self,
        ticket: RequestTicket,
        request: CaseRequest,
        result: std::result::Result<ClinicalCase, ProviderError>,
    ) -> Completion {
        if !self.settle(ticket) {
            return Completion::Stale;
        }
        match result {
            Ok(case) => {
                self.clear_case();
                self.scenario = Some(request.scenario);
                self.difficulty = Some(request.difficulty);
                self.case = Some(case);
                self.mode = SessionMode::InCase;
                self.epoch += 1;
                info!(
                    scenario = ?request.scenario,
                    difficulty = ?request.difficulty,
                    "Case started"
                );
                Completion::Applied
            }
            Err(e) => {
                self.clear_case();
                self.mode = SessionMode::Menu;
                self.fail(ticket.operation, &e)
            }
        }
    }

    /// Appends a provisional entry and starts fetching its reply.
    ///
    /// # Errors
    ///
    /// Returns `Busy`, `InvalidOperation` outside a case,
    /// `ClosingActionNotAllowed` for hypotheses or conduct, `CaseClosed`
    /// once finishing has been requested, or `EmptyInput`.
    pub fn begin_submit_action(
        &mut self,
        kind: ActionType,
        query: &str,
    ) -> Result<(RequestTicket, InteractionRequest)> {
        let operation = OperationKind::Interaction;
        self.ensure_idle(operation)?;
        let case = self.active_case(operation)?.clone();
        if kind.is_closing() {
            return Err(SessionError::ClosingActionNotAllowed { action: kind });
        }
        if self.finish_requested {
            return Err(SessionError::CaseClosed);
        }
        if query.trim().is_empty() {
            return Err(SessionError::EmptyInput {
                operation,
                field: "query",
            });
        }

        let history = self.transcript.clone();
        let entry = UserAction::new(kind, query);
        let action = entry.prompt_line();
        self.transcript.push(entry);
        self.draft.clear();
        self.error = None;

        let ticket = self.issue(operation);
        Ok((
            ticket,
            InteractionRequest {
                case,
                history,
                action,
            },
        ))
    }

    /// Applies the interaction reply, or rolls back the provisional entry.
    pub fn complete_submit_action(
        &mut self,
        ticket: RequestTicket,
        result: std::result::Result<String, ProviderError>,
    ) -> Completion {
        if !self.settle(ticket) {
            return Completion::Stale;
        }
        match result {
            Ok(response) => {
                if let Some(last) = self.transcript.last_mut() {
                    last.response = Some(response);
                }
                Completion::Applied
            }
            Err(e) => {
                self.rollback_provisional();
                self.fail(ticket.operation, &e)
            }
        }
    }

    /// Appends the closing entries and starts scoring the case.
    ///
    /// The entries are appended once per case. A retry after a failed
    /// finish reuses them and ignores the new texts.
    ///
    /// # Errors
    ///
    /// Returns `Busy` or `InvalidOperation` outside a case.
    pub fn begin_finish_case(
        &mut self,
        hypotheses: &str,
        conduct: &str,
    ) -> Result<(RequestTicket, FeedbackRequest)> {
        let operation = OperationKind::Feedback;
        self.ensure_idle(operation)?;
        let case = self.active_case(operation)?.clone();

        if self.finish_requested {
            debug!("Finish retried; reusing the recorded closing entries");
        } else {
            self.transcript
                .push(UserAction::new(ActionType::Hypotheses, hypotheses));
            self.transcript
                .push(UserAction::new(ActionType::FinalConduct, conduct));
            self.finish_requested = true;
        }
        self.error = None;

        let ticket = self.issue(operation);
        Ok((
            ticket,
            FeedbackRequest {
                case,
                transcript: self.transcript.clone(),
            },
        ))
    }

    /// Applies the feedback, records the case and moves to `Feedback`.
    ///
    /// Scores outside `[0, 100]` are handled by the session's
    /// [`ScorePolicy`]; a rejected score counts as a provider failure.
    pub fn complete_finish_case(
        &mut self,
        ticket: RequestTicket,
        result: std::result::Result<Feedback, ProviderError>,
    ) -> Completion {
        if !self.settle(ticket) {
            return Completion::Stale;
        }
        let feedback = match result.and_then(|feedback| self.apply_score_policy(feedback)) {
            Ok(feedback) => feedback,
            Err(e) => return self.fail(ticket.operation, &e),
        };

        let outcome = self.progression.record_case(&feedback.scores);
        if let (Some(case), Some(scenario), Some(difficulty)) =
            (&self.case, self.scenario, self.difficulty)
        {
            self.completed_case = Some(CompletedCase {
                scenario,
                difficulty,
                case: case.view(),
                transcript: self.transcript.clone(),
                feedback: feedback.clone(),
                outcome,
                completed_at: Utc::now(),
            });
        }
        self.feedback = Some(feedback);
        self.last_outcome = Some(outcome);
        self.mode = SessionMode::Feedback;
        Completion::Applied
    }

    // ------------------------------------------------------------------------
    // Skill training flow
    // ------------------------------------------------------------------------

    /// Starts generating a challenge for `skill`. Legal from the menu only.
    ///
    /// # Errors
    ///
    /// Returns `Busy` or `InvalidOperation`.
    pub fn begin_start_skill(&mut self, skill: Skill) -> Result<(RequestTicket, ChallengeRequest)> {
        let operation = OperationKind::GenerateChallenge;
        self.ensure_idle(operation)?;
        self.ensure_mode(operation, &[SessionMode::Menu])?;
        Ok(self.begin_challenge(skill))
    }

    /// Replaces the active challenge with a new one for the same skill.
    ///
    /// # Errors
    ///
    /// Returns `Busy` or `InvalidOperation` outside skill training.
    pub fn begin_next_challenge(&mut self) -> Result<(RequestTicket, ChallengeRequest)> {
        let operation = OperationKind::GenerateChallenge;
        self.ensure_idle(operation)?;
        self.ensure_mode(operation, &[SessionMode::SkillTraining])?;
        let skill = self
            .skill
            .ok_or_else(|| SessionError::invalid_operation(operation, self.mode))?;
        Ok(self.begin_challenge(skill))
    }

    fn begin_challenge(&mut self, skill: Skill) -> (RequestTicket, ChallengeRequest) {
        self.skill = Some(skill);
        self.skill_feedback = None;
        self.error = None;
        let ticket = self.issue(OperationKind::GenerateChallenge);
        (ticket, ChallengeRequest { skill })
    }

    /// Applies a generated challenge, or returns to the menu on failure.
    pub fn complete_challenge(
        &mut self,
        ticket: RequestTicket,
        result: std::result::Result<SkillChallenge, ProviderError>,
    ) -> Completion {
        if !self.settle(ticket) {
            return Completion::Stale;
        }
        match result {
            Ok(challenge) => {
                self.challenge = Some(challenge);
                self.skill_feedback = None;
                self.mode = SessionMode::SkillTraining;
                Completion::Applied
            }
            Err(e) => {
                self.clear_skill();
                self.mode = SessionMode::Menu;
                self.fail(ticket.operation, &e)
            }
        }
    }

    /// Starts judging an answer to the active challenge.
    ///
    /// # Errors
    ///
    /// Returns `Busy`, `InvalidOperation` without an active challenge, or
    /// `EmptyInput`.
    pub fn begin_evaluate_skill(
        &mut self,
        answer: &str,
    ) -> Result<(RequestTicket, EvaluationRequest)> {
        let operation = OperationKind::EvaluateSkill;
        self.ensure_idle(operation)?;
        self.ensure_mode(operation, &[SessionMode::SkillTraining])?;
        let challenge = self
            .challenge
            .clone()
            .ok_or_else(|| SessionError::invalid_operation(operation, self.mode))?;
        if answer.trim().is_empty() {
            return Err(SessionError::EmptyInput {
                operation,
                field: "answer",
            });
        }

        self.error = None;
        let ticket = self.issue(operation);
        Ok((
            ticket,
            EvaluationRequest {
                challenge,
                answer: answer.to_string(),
            },
        ))
    }

    /// Applies the verdict; a failure leaves any prior verdict in place.
    pub fn complete_evaluate_skill(
        &mut self,
        ticket: RequestTicket,
        result: std::result::Result<SkillFeedback, ProviderError>,
    ) -> Completion {
        if !self.settle(ticket) {
            return Completion::Stale;
        }
        match result {
            Ok(feedback) => {
                self.skill_feedback = Some(feedback);
                Completion::Applied
            }
            Err(e) => self.fail(ticket.operation, &e),
        }
    }

    /// Releases a request whose response will never arrive.
    ///
    /// Pre-call mutations are rolled back as they would be on failure, but
    /// no error message is set.
    pub fn abandon(&mut self, ticket: RequestTicket) {
        if !self.settle(ticket) {
            return;
        }
        debug!(
            request_id = ticket.id,
            operation = ?ticket.operation,
            "Request abandoned"
        );
        if ticket.operation == OperationKind::Interaction {
            self.rollback_provisional();
        }
        if ticket.operation == OperationKind::GenerateChallenge && self.challenge.is_none() {
            self.clear_skill();
        }
    }

    // ------------------------------------------------------------------------
    // Snapshot
    // ------------------------------------------------------------------------

    /// Which screen the current state resolves to.
    #[must_use]
    pub const fn screen(&self) -> Screen {
        if self.show_history {
            return Screen::History;
        }
        match self.mode {
            SessionMode::Menu => Screen::Menu,
            SessionMode::InCase if self.case.is_some() => Screen::Case,
            SessionMode::Feedback if self.feedback.is_some() => Screen::Feedback,
            SessionMode::SkillTraining if self.challenge.is_some() && self.skill.is_some() => {
                Screen::SkillTraining
            }
            _ => Screen::Nothing,
        }
    }

    /// Read-only view for rendering.
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            mode: self.mode,
            screen: self.screen(),
            scenario: self.scenario,
            difficulty: self.difficulty,
            case: self.case.as_ref().map(ClinicalCase::view),
            transcript: self.transcript.clone(),
            feedback: self.feedback.clone(),
            skill: self.skill,
            challenge: self.challenge.as_ref().map(SkillChallenge::view),
            skill_feedback: self.skill_feedback.clone(),
            draft: self.draft.clone(),
            loading: self.is_loading(),
            pending_operation: self.pending.map(|ticket| ticket.operation),
            error: self.error.clone(),
            show_history: self.show_history,
            finish_requested: self.finish_requested,
            progression: self.progression.state().clone(),
            last_outcome: self.last_outcome,
        }
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    fn ensure_idle(&self, operation: OperationKind) -> Result<()> {
        if self.pending.is_some() {
            return Err(SessionError::Busy { operation });
        }
        Ok(())
    }

    fn ensure_mode(&self, operation: OperationKind, allowed: &[SessionMode]) -> Result<()> {
        if allowed.contains(&self.mode) {
            Ok(())
        } else {
            Err(SessionError::invalid_operation(operation, self.mode))
        }
    }

    fn active_case(&self, operation: OperationKind) -> Result<&ClinicalCase> {
        self.ensure_mode(operation, &[SessionMode::InCase])?;
        self.case
            .as_ref()
            .ok_or_else(|| SessionError::invalid_operation(operation, self.mode))
    }

    fn issue(&mut self, operation: OperationKind) -> RequestTicket {
        self.next_request_id += 1;
        let ticket = RequestTicket {
            id: self.next_request_id,
            epoch: self.epoch,
            operation,
        };
        self.pending = Some(ticket);
        debug!(request_id = ticket.id, operation = ?operation, "Request issued");
        ticket
    }

    /// Clears the pending slot if `ticket` owns it. Returns `true` only if
    /// the response should be applied.
    fn settle(&mut self, ticket: RequestTicket) -> bool {
        if self.pending != Some(ticket) {
            debug!(
                request_id = ticket.id,
                operation = ?ticket.operation,
                "Discarding response for a request that is no longer pending"
            );
            return false;
        }
        self.pending = None;
        if ticket.epoch != self.epoch {
            debug!(
                request_id = ticket.id,
                operation = ?ticket.operation,
                issued_epoch = ticket.epoch,
                current_epoch = self.epoch,
                "Discarding stale response"
            );
            return false;
        }
        true
    }

    fn fail(&mut self, operation: OperationKind, error: &ProviderError) -> Completion {
        warn!(
            operation = ?operation,
            kind = ?error.kind,
            transient = error.is_transient(),
            error = %error,
            suggestion = error.suggestion(),
            "Content provider call failed"
        );
        self.error = Some(operation.failure_message().to_string());
        Completion::Failed
    }

    fn apply_score_policy(
        &self,
        mut feedback: Feedback,
    ) -> std::result::Result<Feedback, ProviderError> {
        let raw = feedback.scores;
        let scores = raw
            .apply_policy(self.score_policy)
            .map_err(|e| ProviderError::schema(e.to_string()))?;
        if scores != raw {
            warn!(raw = ?raw, clamped = ?scores, "Clamped out-of-range scores");
        }
        feedback.scores = scores;
        Ok(feedback)
    }

    fn rollback_provisional(&mut self) {
        if self
            .transcript
            .last()
            .is_some_and(|entry| entry.response.is_none() && !entry.kind.is_closing())
        {
            self.transcript.pop();
        }
    }

    fn clear_case(&mut self) {
        self.scenario = None;
        self.difficulty = None;
        self.case = None;
        self.transcript.clear();
        self.feedback = None;
        self.finish_requested = false;
    }

    fn clear_skill(&mut self) {
        self.skill = None;
        self.challenge = None;
        self.skill_feedback = None;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::{Scores, VitalSigns};
    use crate::provider::ProviderErrorKind;

    fn sample_case() -> ClinicalCase {
        ClinicalCase {
            patient_info: "Mulher, 34 anos, sem comorbidades".to_string(),
            initial_complaint: "Febre e tosse há 3 dias".to_string(),
            vital_signs: VitalSigns {
                heart_rate: "104 bpm".to_string(),
                respiratory_rate: "24 ipm".to_string(),
                blood_pressure: "118x76 mmHg".to_string(),
                temperature: "38.9 °C".to_string(),
                oxygen_saturation: "94%".to_string(),
                glycemia: None,
            },
            full_case_description: "Pneumonia adquirida na comunidade".to_string(),
        }
    }

    fn sample_feedback(scores: Scores) -> Feedback {
        Feedback {
            final_diagnosis: "Pneumonia adquirida na comunidade".to_string(),
            differential_feedback: "Bom".to_string(),
            correct_actions: "- Ausculta".to_string(),
            inadequate_actions: "- Nenhuma".to_string(),
            references: "Diretriz SBPT 2022".to_string(),
            scores,
        }
    }

    fn failure() -> ProviderError {
        ProviderError::new(ProviderErrorKind::Server, "503 Service Unavailable")
    }

    fn in_case() -> Session {
        let mut session = Session::new();
        let (ticket, request) = session
            .begin_start_case(ScenarioId::Upa, Difficulty::Beginner)
            .unwrap();
        let done = session.complete_start_case(ticket, request, Ok(sample_case()));
        assert_eq!(done, Completion::Applied);
        session
    }

    fn with_answered_action(mut session: Session) -> Session {
        let (ticket, _) = session
            .begin_submit_action(ActionType::Anamnesis, "Tem falta de ar?")
            .unwrap();
        let done = session.complete_submit_action(ticket, Ok("Um pouco, doutor.".to_string()));
        assert_eq!(done, Completion::Applied);
        session
    }

    fn in_skill_training() -> Session {
        let mut session = Session::new();
        let (ticket, _) = session.begin_start_skill(Skill::Ecg).unwrap();
        let challenge = SkillChallenge {
            challenge_text: "ECG com supra de ST em DII, DIII, aVF".to_string(),
            full_description: "IAM inferior".to_string(),
        };
        let done = session.complete_challenge(ticket, Ok(challenge));
        assert_eq!(done, Completion::Applied);
        session
    }

    // ------------------------------------------------------------------------
    // Case generation
    // ------------------------------------------------------------------------

    #[test]
    fn test_new_session_is_menu() {
        let session = Session::new();
        assert_eq!(session.mode(), SessionMode::Menu);
        assert!(!session.is_loading());
        assert_eq!(session.screen(), Screen::Menu);
        assert_eq!(session.progression().level(), 1);
    }

    #[test]
    fn test_start_case_success() {
        let mut session = Session::new();
        let (ticket, request) = session
            .begin_start_case(ScenarioId::Ubs, Difficulty::Intermediate)
            .unwrap();
        assert!(session.is_loading());
        assert_eq!(session.mode(), SessionMode::Menu);

        let done = session.complete_start_case(ticket, request, Ok(sample_case()));
        assert_eq!(done, Completion::Applied);
        assert!(!session.is_loading());
        assert_eq!(session.mode(), SessionMode::InCase);
        assert_eq!(session.screen(), Screen::Case);
        assert!(session.transcript().is_empty());

        let snapshot = session.snapshot();
        assert_eq!(snapshot.scenario, Some(ScenarioId::Ubs));
        assert_eq!(snapshot.difficulty, Some(Difficulty::Intermediate));
        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(!json.contains("Pneumonia adquirida"));
    }

    #[test]
    fn test_start_case_failure_returns_to_menu() {
        let mut session = Session::new();
        let (ticket, request) = session
            .begin_start_case(ScenarioId::Upa, Difficulty::Beginner)
            .unwrap();

        let done = session.complete_start_case(ticket, request, Err(failure()));
        assert_eq!(done, Completion::Failed);
        assert!(!session.is_loading());
        assert_eq!(session.mode(), SessionMode::Menu);
        assert!(session.case().is_none());
        assert_eq!(
            session.error(),
            Some("Falha ao gerar o caso clínico. Tente novamente.")
        );
    }

    #[test]
    fn test_start_case_rejects_locked_scenario() {
        let mut session = Session::new();
        let err = session
            .begin_start_case(ScenarioId::Uti, Difficulty::Advanced)
            .unwrap_err();
        assert!(matches!(
            err,
            SessionError::ScenarioLocked {
                required: 5,
                current: 1,
                ..
            }
        ));
        assert!(!session.is_loading());
    }

    #[test]
    fn test_start_case_only_from_menu() {
        let mut session = in_case();
        let err = session
            .begin_start_case(ScenarioId::Upa, Difficulty::Beginner)
            .unwrap_err();
        assert!(matches!(err, SessionError::InvalidOperation { .. }));
    }

    #[test]
    fn test_busy_guard_rejects_second_call() {
        let mut session = Session::new();
        let _ = session
            .begin_start_case(ScenarioId::Upa, Difficulty::Beginner)
            .unwrap();
        let err = session.begin_start_skill(Skill::Ecg).unwrap_err();
        assert!(matches!(
            err,
            SessionError::Busy {
                operation: OperationKind::GenerateChallenge
            }
        ));
    }

    // ------------------------------------------------------------------------
    // Actions
    // ------------------------------------------------------------------------

    #[test]
    fn test_submit_action_success_patches_last_entry_only() {
        let mut session = with_answered_action(in_case());
        let before = session.transcript().to_vec();

        session.set_draft("Pede hemograma");
        let (ticket, request) = session
            .begin_submit_action(ActionType::LabsImaging, "Hemograma")
            .unwrap();
        assert_eq!(request.history, before);
        assert_eq!(request.action, "Exames: Hemograma");
        assert!(request.case.full_case_description.contains("Pneumonia"));
        assert_eq!(session.transcript().len(), 2);
        assert!(session.transcript()[1].response.is_none());
        assert!(session.snapshot().draft.is_empty());

        let done = session.complete_submit_action(ticket, Ok("Leucocitose".to_string()));
        assert_eq!(done, Completion::Applied);
        assert_eq!(session.transcript().len(), 2);
        assert_eq!(session.transcript()[0], before[0]);
        assert_eq!(
            session.transcript()[1].response.as_deref(),
            Some("Leucocitose")
        );
    }

    #[test]
    fn test_submit_action_failure_rolls_back_entry() {
        let mut session = with_answered_action(in_case());
        session.set_draft("Ausculta");
        let (ticket, _) = session
            .begin_submit_action(ActionType::PhysicalExam, "Ausculta")
            .unwrap();

        let done = session.complete_submit_action(ticket, Err(failure()));
        assert_eq!(done, Completion::Failed);
        assert_eq!(session.transcript().len(), 1);
        assert!(session.snapshot().draft.is_empty());
        assert_eq!(
            session.error(),
            Some("Falha ao obter resposta da IA. Tente novamente.")
        );
        assert!(!session.is_loading());
    }

    #[test]
    fn test_submit_action_rejects_closing_types_and_empty_query() {
        let mut session = in_case();
        let err = session
            .begin_submit_action(ActionType::Hypotheses, "Pneumonia")
            .unwrap_err();
        assert!(matches!(err, SessionError::ClosingActionNotAllowed { .. }));

        let err = session
            .begin_submit_action(ActionType::Anamnesis, "   ")
            .unwrap_err();
        assert!(matches!(err, SessionError::EmptyInput { field: "query", .. }));
        assert!(session.transcript().is_empty());
    }

    #[test]
    fn test_submit_action_outside_case_is_invalid() {
        let mut session = Session::new();
        let err = session
            .begin_submit_action(ActionType::Anamnesis, "Dor?")
            .unwrap_err();
        assert!(matches!(
            err,
            SessionError::InvalidOperation {
                mode: SessionMode::Menu,
                ..
            }
        ));
    }

    // ------------------------------------------------------------------------
    // Finishing
    // ------------------------------------------------------------------------

    #[test]
    fn test_finish_case_success_records_progression() {
        let mut session = with_answered_action(in_case());
        let (ticket, request) = session
            .begin_finish_case("Pneumonia", "Amoxicilina")
            .unwrap();
        assert_eq!(request.transcript.len(), 3);
        assert_eq!(request.transcript[1].kind, ActionType::Hypotheses);
        assert_eq!(request.transcript[2].kind, ActionType::FinalConduct);

        let scores = Scores::new(90.0, 70.0, 85.0, 95.0);
        let done = session.complete_finish_case(ticket, Ok(sample_feedback(scores)));
        assert_eq!(done, Completion::Applied);
        assert_eq!(session.mode(), SessionMode::Feedback);
        assert_eq!(session.screen(), Screen::Feedback);
        assert_eq!(session.progression().xp(), 85);
        assert_eq!(session.progression().history().correct_diagnoses, 1);

        let completed = session.completed_case().unwrap();
        assert_eq!(completed.transcript.len(), 3);
        assert_eq!(completed.outcome.earned_xp, 85);
        assert_eq!(session.snapshot().last_outcome, Some(completed.outcome));
    }

    #[test]
    fn test_finish_case_failure_keeps_closing_entries() {
        let mut session = with_answered_action(in_case());
        let (ticket, _) = session.begin_finish_case("Pneumonia", "Amoxicilina").unwrap();

        let done = session.complete_finish_case(ticket, Err(failure()));
        assert_eq!(done, Completion::Failed);
        assert_eq!(session.mode(), SessionMode::InCase);
        assert_eq!(session.transcript().len(), 3);
        assert_eq!(session.progression().history().total_cases, 0);
        assert_eq!(
            session.error(),
            Some("Falha ao gerar o feedback. Por favor, tente finalizar o caso novamente.")
        );
    }

    #[test]
    fn test_finish_retry_does_not_duplicate_closing_entries() {
        let mut session = in_case();
        let (ticket, _) = session.begin_finish_case("Pneumonia", "Amoxicilina").unwrap();
        let _ = session.complete_finish_case(ticket, Err(failure()));

        let (ticket, request) = session.begin_finish_case("Outra", "Outra").unwrap();
        assert_eq!(request.transcript.len(), 2);
        assert_eq!(request.transcript[0].query, "Pneumonia");

        let scores = Scores::new(50.0, 50.0, 50.0, 50.0);
        let done = session.complete_finish_case(ticket, Ok(sample_feedback(scores)));
        assert_eq!(done, Completion::Applied);
        assert_eq!(session.transcript().len(), 2);
    }

    #[test]
    fn test_actions_rejected_after_finish_requested() {
        let mut session = in_case();
        let (ticket, _) = session.begin_finish_case("Pneumonia", "Amoxicilina").unwrap();
        let _ = session.complete_finish_case(ticket, Err(failure()));

        let err = session
            .begin_submit_action(ActionType::Anamnesis, "Mais alguma coisa?")
            .unwrap_err();
        assert!(matches!(err, SessionError::CaseClosed));
    }

    #[test]
    fn test_out_of_range_scores_are_clamped_by_default() {
        let mut session = in_case();
        let (ticket, _) = session.begin_finish_case("H", "C").unwrap();
        let scores = Scores::new(130.0, 80.0, 80.0, -10.0);
        let _ = session.complete_finish_case(ticket, Ok(sample_feedback(scores)));

        let feedback = session.feedback().unwrap();
        assert!(feedback.scores.is_within_range());
        assert!((feedback.scores.diagnostic_reasoning - 100.0).abs() < f64::EPSILON);
        assert!(feedback.scores.final_conduct.abs() < f64::EPSILON);
    }

    #[test]
    fn test_reject_policy_turns_bad_scores_into_failure() {
        let mut session = Session::with_score_policy(ScorePolicy::Reject);
        let (ticket, request) = session
            .begin_start_case(ScenarioId::Upa, Difficulty::Beginner)
            .unwrap();
        let _ = session.complete_start_case(ticket, request, Ok(sample_case()));

        let (ticket, _) = session.begin_finish_case("H", "C").unwrap();
        let scores = Scores::new(101.0, 80.0, 80.0, 80.0);
        let done = session.complete_finish_case(ticket, Ok(sample_feedback(scores)));
        assert_eq!(done, Completion::Failed);
        assert_eq!(session.mode(), SessionMode::InCase);
        assert_eq!(session.progression().history().total_cases, 0);
    }

    #[test]
    fn test_non_finite_scores_fail_under_clamp() {
        let mut session = in_case();
        let (ticket, _) = session.begin_finish_case("H", "C").unwrap();
        let scores = Scores::new(f64::INFINITY, 80.0, 80.0, 80.0);
        let done = session.complete_finish_case(ticket, Ok(sample_feedback(scores)));
        assert_eq!(done, Completion::Failed);
        assert_eq!(session.progression().xp(), 0);
    }

    // ------------------------------------------------------------------------
    // Skill training
    // ------------------------------------------------------------------------

    #[test]
    fn test_skill_training_flow() {
        let mut session = in_skill_training();
        assert_eq!(session.mode(), SessionMode::SkillTraining);
        assert_eq!(session.screen(), Screen::SkillTraining);

        let (ticket, request) = session.begin_evaluate_skill("IAM inferior").unwrap();
        assert_eq!(request.challenge.full_description, "IAM inferior");
        let verdict = SkillFeedback {
            is_correct: true,
            explanation: "Correto".to_string(),
        };
        let done = session.complete_evaluate_skill(ticket, Ok(verdict.clone()));
        assert_eq!(done, Completion::Applied);
        assert_eq!(session.skill_feedback(), Some(&verdict));

        let (ticket, request) = session.begin_next_challenge().unwrap();
        assert_eq!(request.skill, Skill::Ecg);
        assert!(session.skill_feedback().is_none());
        let next = SkillChallenge {
            challenge_text: "FA com alta resposta".to_string(),
            full_description: "Fibrilação atrial".to_string(),
        };
        let _ = session.complete_challenge(ticket, Ok(next.clone()));
        assert_eq!(session.challenge(), Some(&next));
    }

    #[test]
    fn test_evaluate_failure_keeps_prior_verdict() {
        let mut session = in_skill_training();
        let verdict = SkillFeedback {
            is_correct: false,
            explanation: "Incorreto".to_string(),
        };
        let (ticket, _) = session.begin_evaluate_skill("Normal").unwrap();
        let _ = session.complete_evaluate_skill(ticket, Ok(verdict.clone()));

        let (ticket, _) = session.begin_evaluate_skill("Pericardite").unwrap();
        let done = session.complete_evaluate_skill(ticket, Err(failure()));
        assert_eq!(done, Completion::Failed);
        assert_eq!(session.skill_feedback(), Some(&verdict));
        assert_eq!(
            session.error(),
            Some("Falha ao avaliar a resposta. Tente novamente.")
        );
    }

    #[test]
    fn test_next_challenge_failure_returns_to_menu() {
        let mut session = in_skill_training();
        let (ticket, _) = session.begin_next_challenge().unwrap();
        let done = session.complete_challenge(ticket, Err(failure()));
        assert_eq!(done, Completion::Failed);
        assert_eq!(session.mode(), SessionMode::Menu);
        assert!(session.challenge().is_none());
        assert_eq!(
            session.error(),
            Some("Falha ao gerar o desafio. Tente novamente.")
        );
    }

    #[test]
    fn test_evaluate_requires_challenge() {
        let mut session = Session::new();
        let err = session.begin_evaluate_skill("resposta").unwrap_err();
        assert!(matches!(err, SessionError::InvalidOperation { .. }));
    }

    // ------------------------------------------------------------------------
    // Reset, overlay and stale responses
    // ------------------------------------------------------------------------

    #[test]
    fn test_reset_to_menu_from_every_mode() {
        let mut feedback_session = in_case();
        let (ticket, _) = feedback_session.begin_finish_case("H", "C").unwrap();
        let _ = feedback_session.complete_finish_case(
            ticket,
            Ok(sample_feedback(Scores::new(80.0, 80.0, 80.0, 80.0))),
        );
        let mut failed = Session::new();
        let (ticket, request) = failed
            .begin_start_case(ScenarioId::Upa, Difficulty::Beginner)
            .unwrap();
        let _ = failed.complete_start_case(ticket, request, Err(failure()));

        for mut session in [
            Session::new(),
            in_case(),
            feedback_session,
            in_skill_training(),
            failed,
        ] {
            session.show_history();
            session.reset_to_menu();
            let snapshot = session.snapshot();
            assert_eq!(snapshot.mode, SessionMode::Menu);
            assert!(snapshot.case.is_none());
            assert!(snapshot.challenge.is_none());
            assert!(snapshot.feedback.is_none());
            assert!(snapshot.skill_feedback.is_none());
            assert!(snapshot.skill.is_none());
            assert!(snapshot.transcript.is_empty());
            assert!(snapshot.error.is_none());
            assert!(!snapshot.show_history);
        }
    }

    #[test]
    fn test_reset_keeps_progression() {
        let mut session = in_case();
        let (ticket, _) = session.begin_finish_case("H", "C").unwrap();
        let _ = session.complete_finish_case(
            ticket,
            Ok(sample_feedback(Scores::new(80.0, 80.0, 80.0, 80.0))),
        );
        session.reset_to_menu();
        assert_eq!(session.progression().xp(), 80);
        assert_eq!(session.progression().history().total_cases, 1);
    }

    #[test]
    fn test_response_after_reset_is_discarded() {
        let mut session = in_case();
        let (ticket, _) = session
            .begin_submit_action(ActionType::Anamnesis, "Dor?")
            .unwrap();
        session.reset_to_menu();
        assert!(session.is_loading());

        let done = session.complete_submit_action(ticket, Ok("Sim".to_string()));
        assert_eq!(done, Completion::Stale);
        assert!(!session.is_loading());
        assert!(session.transcript().is_empty());
        assert_eq!(session.mode(), SessionMode::Menu);
    }

    #[test]
    fn test_stale_case_generation_does_not_enter_case() {
        let mut session = Session::new();
        let (ticket, request) = session
            .begin_start_case(ScenarioId::Upa, Difficulty::Beginner)
            .unwrap();
        session.reset_to_menu();
        let done = session.complete_start_case(ticket, request, Ok(sample_case()));
        assert_eq!(done, Completion::Stale);
        assert_eq!(session.mode(), SessionMode::Menu);
        assert!(session.case().is_none());
    }

    #[test]
    fn test_duplicate_completion_is_stale() {
        let mut session = in_case();
        let (ticket, _) = session
            .begin_submit_action(ActionType::Anamnesis, "Dor?")
            .unwrap();
        let _ = session.complete_submit_action(ticket, Ok("Sim".to_string()));
        let done = session.complete_submit_action(ticket, Ok("De novo".to_string()));
        assert_eq!(done, Completion::Stale);
        assert_eq!(session.transcript()[0].response.as_deref(), Some("Sim"));
    }

    #[test]
    fn test_abandon_rolls_back_provisional_entry() {
        let mut session = in_case();
        let (ticket, _) = session
            .begin_submit_action(ActionType::Anamnesis, "Dor?")
            .unwrap();
        session.abandon(ticket);
        assert!(!session.is_loading());
        assert!(session.transcript().is_empty());
        assert!(session.error().is_none());
    }

    #[test]
    fn test_history_overlay_takes_precedence() {
        let mut session = in_case();
        session.show_history();
        assert_eq!(session.screen(), Screen::History);
        assert!(session.snapshot().show_history);
        session.hide_history();
        assert_eq!(session.screen(), Screen::Case);
    }

    #[test]
    fn test_operation_kind_display_and_messages() {
        assert_eq!(OperationKind::Interaction.to_string(), "submit an action");
        assert_eq!(OperationKind::Feedback.to_string(), "finish the case");
        for kind in [
            OperationKind::GenerateCase,
            OperationKind::Interaction,
            OperationKind::Feedback,
            OperationKind::GenerateChallenge,
            OperationKind::EvaluateSkill,
        ] {
            assert!(kind.failure_message().starts_with("Falha"));
        }
    }
}
