//! MedSim session core
//!
//! Drives a clinical case simulator: case generation, the action transcript,
//! scoring, skill drills and the player's progression, with the generative
//! content delegated to a [`ContentProvider`].

pub mod api;
pub mod config;
pub mod controller;
pub mod error;
pub mod events;
pub mod model;
pub mod progression;
pub mod provider;
pub mod session;

pub use api::{create_router, AppState, ErrorResponse, HistoryResponse};
pub use config::{Config, ProviderConfig, ServerConfig, CONFIG_FILE_NAME};
pub use controller::SessionController;
pub use error::{Result, SessionError};
pub use events::{EventBroadcaster, SessionEvent};
pub use model::{
    ActionType, CaseView, ChallengeView, ClinicalCase, Difficulty, Feedback, ScenarioId,
    ScoreAxis, ScorePolicy, Scores, SessionMode, Skill, SkillChallenge, SkillFeedback, UserAction,
    VitalSigns,
};
pub use progression::{
    CaseOutcome, PerformanceHistory, ProgressionState, ProgressionTracker, ScoresByArea,
};
pub use provider::{ContentProvider, ProviderError, ProviderErrorKind};
pub use session::{CompletedCase, Completion, OperationKind, Screen, Session, SessionSnapshot};
