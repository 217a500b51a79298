//! The content provider seam.
//!
//! Case generation, patient replies, scoring and skill drills are produced by
//! an external generative service. The session only knows this trait; the
//! HTTP-backed implementation lives in `medsim-gemini`.

use std::fmt;

use async_trait::async_trait;

use crate::model::{
    ClinicalCase, Difficulty, Feedback, ScenarioId, Skill, SkillChallenge, SkillFeedback,
    UserAction,
};

/// Classification of a provider failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderErrorKind {
    /// The API key was missing or rejected.
    Authentication,
    /// The service is throttling requests.
    RateLimit,
    /// The service returned a 5xx response.
    Server,
    /// The request never produced a response (connect error, timeout).
    Network,
    /// The response did not match the expected schema.
    Schema,
    /// Anything else, including unexpected 4xx responses.
    Other,
}

impl fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Authentication => write!(f, "authentication"),
            Self::RateLimit => write!(f, "rate limit"),
            Self::Server => write!(f, "server"),
            Self::Network => write!(f, "network"),
            Self::Schema => write!(f, "schema"),
            Self::Other => write!(f, "other"),
        }
    }
}

/// A failed call to the content provider.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Content provider {kind} error: {message}")]
pub struct ProviderError {
    /// What went wrong, broadly.
    pub kind: ProviderErrorKind,
    /// Detail for the logs. Never shown to the player.
    pub message: String,
}

impl ProviderError {
    /// Creates a new provider error.
    #[must_use]
    pub fn new(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Creates a `Schema` error, used when a response fails to parse.
    #[must_use]
    pub fn schema(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Schema, message)
    }

    /// Creates a `Network` error.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Network, message)
    }

    /// Returns `true` if retrying the same request later may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self.kind,
            ProviderErrorKind::RateLimit | ProviderErrorKind::Server | ProviderErrorKind::Network
        )
    }

    /// Operator-facing hint for resolving the failure.
    #[must_use]
    pub const fn suggestion(&self) -> &'static str {
        match self.kind {
            ProviderErrorKind::Authentication => {
                "Check that the API key environment variable is set and valid"
            }
            ProviderErrorKind::RateLimit => "Wait a moment before retrying",
            ProviderErrorKind::Server => "The provider is having trouble; retry shortly",
            ProviderErrorKind::Network => {
                "Check network connectivity and provider.requestTimeoutSecs"
            }
            ProviderErrorKind::Schema => {
                "The model returned malformed output; retrying usually helps"
            }
            ProviderErrorKind::Other => "See the logged message for details",
        }
    }
}

/// Generates and evaluates clinical content.
///
/// Every method either returns a value that already matches the operation's
/// schema or fails with a [`ProviderError`]. Implementations must not retry
/// on their own.
#[async_trait]
pub trait ContentProvider: Send + Sync {
    /// Generates a new patient encounter for the given setting.
    async fn generate_case(
        &self,
        scenario: ScenarioId,
        difficulty: Difficulty,
    ) -> Result<ClinicalCase, ProviderError>;

    /// Produces the reply to `action`, given the case and the prior
    /// transcript. `action` is the labeled line, e.g. `"Anamnese: ..."`.
    async fn interaction_response(
        &self,
        case: &ClinicalCase,
        history: &[UserAction],
        action: &str,
    ) -> Result<String, ProviderError>;

    /// Scores a finished case against its full transcript.
    async fn generate_feedback(
        &self,
        case: &ClinicalCase,
        transcript: &[UserAction],
    ) -> Result<Feedback, ProviderError>;

    /// Generates a short challenge for `skill`.
    async fn generate_skill_challenge(&self, skill: Skill)
        -> Result<SkillChallenge, ProviderError>;

    /// Judges the player's answer to `challenge`.
    async fn evaluate_skill_attempt(
        &self,
        challenge: &SkillChallenge,
        answer: &str,
    ) -> Result<SkillFeedback, ProviderError>;
}
