//! HTTP client for the Gemini `generateContent` endpoint.

use std::time::Duration;

use async_trait::async_trait;
use medsim_session::{
    ClinicalCase, ContentProvider, Difficulty, Feedback, ProviderConfig, ProviderError,
    ProviderErrorKind, ScenarioId, Skill, SkillChallenge, SkillFeedback, UserAction,
};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::prompts;
use crate::schema::{self, CaseOutput, GenerateContentRequest, GenerateContentResponse};

/// Header carrying the API key.
const API_KEY_HEADER: &str = "x-goog-api-key";

/// [`ContentProvider`] backed by the Gemini REST API.
#[derive(Clone)]
pub struct GeminiProvider {
    client: Client,
    api_key: String,
    config: ProviderConfig,
}

impl std::fmt::Debug for GeminiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiProvider")
            .field("base_url", &self.config.base_url)
            .field("api_key", &"<redacted>")
            .finish_non_exhaustive()
    }
}

impl GeminiProvider {
    /// Creates a provider with an explicit API key.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: ProviderConfig, api_key: impl Into<String>) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| {
                ProviderError::new(
                    ProviderErrorKind::Other,
                    format!("failed to build HTTP client: {e}"),
                )
            })?;

        Ok(Self {
            client,
            api_key: api_key.into(),
            config,
        })
    }

    /// Creates a provider reading the API key from the environment variable
    /// named in `config`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the key is missing.
    pub fn from_config(config: &ProviderConfig) -> medsim_session::Result<Self> {
        let api_key = config.api_key()?;
        Ok(Self::new(config.clone(), api_key)?)
    }

    fn endpoint(&self, model: &str) -> String {
        format!(
            "{}/models/{model}:generateContent",
            self.config.base_url.trim_end_matches('/')
        )
    }

    /// Sends one request and returns the model's text output.
    async fn send(
        &self,
        model: &str,
        body: &GenerateContentRequest,
    ) -> Result<String, ProviderError> {
        let url = self.endpoint(model);
        debug!(model, "Sending generateContent request");

        let response = self
            .client
            .post(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| ProviderError::network(format!("request to {model} failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "failed to read error body".to_string());
            let error = schema::http_error(status, &body);
            warn!(model, kind = %error.kind, "Gemini request failed");
            return Err(error);
        }

        let parsed: GenerateContentResponse = response.json().await.map_err(|e| {
            ProviderError::schema(format!("could not decode generateContent response: {e}"))
        })?;
        parsed.text()
    }

    async fn generate<T: DeserializeOwned>(
        &self,
        model: &str,
        prompt: String,
        response_schema: Value,
        temperature: Option<f32>,
        what: &str,
    ) -> Result<T, ProviderError> {
        let request = GenerateContentRequest::json(prompt, response_schema, temperature);
        let text = self.send(model, &request).await?;
        schema::parse_output(&text, what)
    }
}

#[async_trait]
impl ContentProvider for GeminiProvider {
    async fn generate_case(
        &self,
        scenario: ScenarioId,
        difficulty: Difficulty,
    ) -> Result<ClinicalCase, ProviderError> {
        let output: CaseOutput = self
            .generate(
                &self.config.case_model,
                prompts::case_prompt(scenario, difficulty),
                schema::case_schema(),
                Some(self.config.case_temperature),
                "case",
            )
            .await?;
        Ok(output.into())
    }

    async fn interaction_response(
        &self,
        case: &ClinicalCase,
        history: &[UserAction],
        action: &str,
    ) -> Result<String, ProviderError> {
        let output: schema::InteractionOutput = self
            .generate(
                &self.config.interaction_model,
                prompts::interaction_prompt(case, history, action),
                schema::interaction_schema(),
                None,
                "interaction reply",
            )
            .await?;
        Ok(output.response)
    }

    async fn generate_feedback(
        &self,
        case: &ClinicalCase,
        transcript: &[UserAction],
    ) -> Result<Feedback, ProviderError> {
        self.generate(
            &self.config.feedback_model,
            prompts::feedback_prompt(case, transcript),
            schema::feedback_schema(),
            None,
            "feedback",
        )
        .await
    }

    async fn generate_skill_challenge(&self, skill: Skill) -> Result<SkillChallenge, ProviderError> {
        self.generate(
            &self.config.skill_model,
            prompts::skill_challenge_prompt(skill),
            schema::skill_challenge_schema(),
            None,
            "skill challenge",
        )
        .await
    }

    async fn evaluate_skill_attempt(
        &self,
        challenge: &SkillChallenge,
        answer: &str,
    ) -> Result<SkillFeedback, ProviderError> {
        self.generate(
            &self.config.skill_model,
            prompts::skill_evaluation_prompt(challenge, answer),
            schema::skill_evaluation_schema(),
            None,
            "skill evaluation",
        )
        .await
    }
}
