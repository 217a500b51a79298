//! HTTP API for the MedSim presentation layer.
//!
//! Each mutating endpoint maps one-to-one onto a session operation and
//! returns the resulting [`SessionSnapshot`]. Provider failures are not HTTP
//! errors: the request succeeds and the snapshot carries the localized
//! message in `error`. Only violated preconditions (wrong mode, busy, locked
//! scenario) are rejected, with `409 Conflict`.
//!
//! # Endpoints
//!
//! - `GET /api/session` - Current snapshot
//! - `POST /api/case/start` - Generate a case
//! - `POST /api/case/action` - Submit a history, exam or lab request
//! - `POST /api/case/draft` - Update the action input buffer
//! - `POST /api/case/finish` - Close the case and request feedback
//! - `POST /api/skill/start` - Start skill training
//! - `POST /api/skill/next` - Next challenge
//! - `POST /api/skill/evaluate` - Judge an answer
//! - `POST /api/menu` - Return to the menu
//! - `POST /api/history/show` / `POST /api/history/hide` - History overlay
//! - `GET /api/history` - Progression and performance statistics
//! - `GET /ws` - Event stream

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};

use crate::config::Config;
use crate::controller::SessionController;
use crate::error::SessionError;
use crate::events::ws_handler;
use crate::model::{ActionType, Difficulty, ScenarioId, ScoreAxis, Skill};
use crate::progression::PerformanceHistory;
use crate::provider::ContentProvider;
use crate::session::SessionSnapshot;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request body for `POST /api/case/start`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartCaseRequest {
    /// Care setting.
    pub scenario: ScenarioId,
    /// Case difficulty.
    #[serde(default)]
    pub difficulty: Difficulty,
}

/// Request body for `POST /api/case/action`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRequest {
    /// Kind of request.
    #[serde(rename = "type")]
    pub kind: ActionType,
    /// The player's text.
    pub query: String,
}

/// Request body for `POST /api/case/draft`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DraftRequest {
    /// New contents of the input buffer.
    pub text: String,
}

/// Request body for `POST /api/case/finish`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinishCaseRequest {
    /// Diagnostic hypotheses.
    #[serde(default)]
    pub hypotheses: String,
    /// Final conduct.
    #[serde(default)]
    pub conduct: String,
}

/// Request body for `POST /api/skill/start`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartSkillRequest {
    /// Skill to drill.
    pub skill: Skill,
}

/// Request body for `POST /api/skill/evaluate`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluateSkillRequest {
    /// The player's answer.
    pub answer: String,
}

/// Mean score on one axis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AxisAverage {
    /// The axis.
    pub axis: ScoreAxis,
    /// Its display label.
    pub label: String,
    /// Mean over all recorded cases.
    pub average: f64,
}

/// Response body for `GET /api/history`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryResponse {
    /// Total experience.
    pub xp: u64,
    /// Current level.
    pub level: u32,
    /// Experience still needed for the next level.
    pub xp_to_next_level: u64,
    /// Raw history.
    pub history: PerformanceHistory,
    /// Percentage of correct diagnoses.
    pub correct_diagnosis_rate: f64,
    /// Per-axis means.
    pub axis_averages: Vec<AxisAverage>,
}

/// Error response body returned on failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Description of the error.
    pub error: String,
}

// ============================================================================
// Application State
// ============================================================================

/// Shared application state for the HTTP server.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Loaded configuration.
    pub config: Config,
    /// The session being served.
    pub controller: SessionController,
}

impl AppState {
    /// Creates the state for a fresh session backed by `provider`.
    #[must_use]
    pub fn new(config: Config, provider: Arc<dyn ContentProvider>) -> Self {
        let controller =
            SessionController::new(provider, config.score_policy, config.event_capacity);
        Self { config, controller }
    }
}

// ============================================================================
// API Error Type
// ============================================================================

/// Internal error type for API handlers.
#[derive(Debug)]
struct ApiError(SessionError);

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = if self.0.is_precondition() {
            StatusCode::CONFLICT
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        warn!(status = %status, error = %self.0, "Request rejected");

        let body = Json(ErrorResponse {
            error: self.0.to_string(),
        });
        (status, body).into_response()
    }
}

type ApiResult = Result<Json<SessionSnapshot>, ApiError>;

// ============================================================================
// Router Setup
// ============================================================================

/// Creates the HTTP router with every API endpoint and the event stream.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/session", get(handle_session))
        .route("/case/start", post(handle_start_case))
        .route("/case/action", post(handle_action))
        .route("/case/draft", post(handle_draft))
        .route("/case/finish", post(handle_finish_case))
        .route("/skill/start", post(handle_start_skill))
        .route("/skill/next", post(handle_next_challenge))
        .route("/skill/evaluate", post(handle_evaluate_skill))
        .route("/menu", post(handle_menu))
        .route("/history", get(handle_history))
        .route("/history/show", post(handle_show_history))
        .route("/history/hide", post(handle_hide_history));

    Router::new()
        .nest("/api", api_routes)
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(Arc::new(state))
}

// ============================================================================
// Handlers
// ============================================================================

async fn handle_session(State(state): State<Arc<AppState>>) -> Json<SessionSnapshot> {
    Json(state.controller.snapshot())
}

async fn handle_start_case(
    State(state): State<Arc<AppState>>,
    Json(request): Json<StartCaseRequest>,
) -> ApiResult {
    info!(
        scenario = ?request.scenario,
        difficulty = ?request.difficulty,
        "Start case requested"
    );
    let snapshot = state
        .controller
        .start_case(request.scenario, request.difficulty)
        .await?;
    Ok(Json(snapshot))
}

async fn handle_action(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ActionRequest>,
) -> ApiResult {
    info!(kind = ?request.kind, query_len = request.query.len(), "Action submitted");
    let snapshot = state
        .controller
        .submit_action(request.kind, &request.query)
        .await?;
    Ok(Json(snapshot))
}

async fn handle_draft(
    State(state): State<Arc<AppState>>,
    Json(request): Json<DraftRequest>,
) -> Json<SessionSnapshot> {
    Json(state.controller.set_draft(&request.text))
}

async fn handle_finish_case(
    State(state): State<Arc<AppState>>,
    Json(request): Json<FinishCaseRequest>,
) -> ApiResult {
    info!("Finish case requested");
    let snapshot = state
        .controller
        .finish_case(&request.hypotheses, &request.conduct)
        .await?;
    Ok(Json(snapshot))
}

async fn handle_start_skill(
    State(state): State<Arc<AppState>>,
    Json(request): Json<StartSkillRequest>,
) -> ApiResult {
    info!(skill = ?request.skill, "Skill training requested");
    let snapshot = state.controller.start_skill_training(request.skill).await?;
    Ok(Json(snapshot))
}

async fn handle_next_challenge(State(state): State<Arc<AppState>>) -> ApiResult {
    let snapshot = state.controller.next_challenge().await?;
    Ok(Json(snapshot))
}

async fn handle_evaluate_skill(
    State(state): State<Arc<AppState>>,
    Json(request): Json<EvaluateSkillRequest>,
) -> ApiResult {
    let snapshot = state
        .controller
        .evaluate_skill_attempt(&request.answer)
        .await?;
    Ok(Json(snapshot))
}

async fn handle_menu(State(state): State<Arc<AppState>>) -> Json<SessionSnapshot> {
    Json(state.controller.reset_to_menu())
}

async fn handle_show_history(State(state): State<Arc<AppState>>) -> Json<SessionSnapshot> {
    Json(state.controller.show_history())
}

async fn handle_hide_history(State(state): State<Arc<AppState>>) -> Json<SessionSnapshot> {
    Json(state.controller.hide_history())
}

async fn handle_history(State(state): State<Arc<AppState>>) -> Json<HistoryResponse> {
    let progression = state.controller.progression();
    let history = progression.history();
    let axis_averages = history
        .axis_averages()
        .into_iter()
        .map(|(axis, average)| AxisAverage {
            axis,
            label: axis.label().to_string(),
            average,
        })
        .collect();

    Json(HistoryResponse {
        xp: progression.xp(),
        level: progression.level(),
        xp_to_next_level: progression.xp_to_next_level(),
        correct_diagnosis_rate: history.correct_diagnosis_rate(),
        axis_averages,
        history: history.clone(),
    })
}

// ============================================================================
// Tests
// ============================================================================
