//! Shared fixtures: a scripted content provider and a test server.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use medsim_session::{
    create_router, AppState, ClinicalCase, Config, ContentProvider, Difficulty, Feedback,
    ProviderError, ProviderErrorKind, ScenarioId, Scores, Skill, SkillChallenge, SkillFeedback,
    UserAction, VitalSigns,
};

/// Hidden ground truth of every scripted case.
pub const HIDDEN_DESCRIPTION: &str = "Pneumonia adquirida na comunidade, CURB-65 = 2";

/// Provider with fixed content and configurable failures.
#[derive(Debug)]
pub struct ScriptedProvider {
    scores: Scores,
    feedback_failures: AtomicUsize,
    delay: Duration,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self {
            scores: Scores::new(90.0, 80.0, 85.0, 75.0),
            feedback_failures: AtomicUsize::new(0),
            delay: Duration::ZERO,
        }
    }

    /// The next `n` feedback calls fail with a server error.
    pub fn failing_feedback(mut self, n: usize) -> Self {
        self.feedback_failures = AtomicUsize::new(n);
        self
    }

    pub fn with_scores(mut self, scores: Scores) -> Self {
        self.scores = scores;
        self
    }

    /// Every call waits this long before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    async fn pause(&self) {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }
}

#[async_trait]
impl ContentProvider for ScriptedProvider {
    async fn generate_case(
        &self,
        _scenario: ScenarioId,
        _difficulty: Difficulty,
    ) -> Result<ClinicalCase, ProviderError> {
        self.pause().await;
        Ok(ClinicalCase {
            patient_info: "Mulher, 72 anos, diabética".to_string(),
            initial_complaint: "Tosse produtiva e febre há 4 dias".to_string(),
            vital_signs: VitalSigns {
                heart_rate: "104 bpm".to_string(),
                respiratory_rate: "24 ipm".to_string(),
                blood_pressure: "110x70 mmHg".to_string(),
                temperature: "38.6 °C".to_string(),
                oxygen_saturation: "92%".to_string(),
                glycemia: Some("210 mg/dL".to_string()),
            },
            full_case_description: HIDDEN_DESCRIPTION.to_string(),
        })
    }

    async fn interaction_response(
        &self,
        _case: &ClinicalCase,
        _history: &[UserAction],
        action: &str,
    ) -> Result<String, ProviderError> {
        self.pause().await;
        Ok(format!("Resposta para {action}"))
    }

    async fn generate_feedback(
        &self,
        _case: &ClinicalCase,
        _transcript: &[UserAction],
    ) -> Result<Feedback, ProviderError> {
        self.pause().await;
        let remaining = self.feedback_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.feedback_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(ProviderError::new(
                ProviderErrorKind::Server,
                "HTTP 503: model overloaded",
            ));
        }
        Ok(Feedback {
            final_diagnosis: "Pneumonia adquirida na comunidade".to_string(),
            differential_feedback: "Considerou insuficiência cardíaca".to_string(),
            correct_actions: "- Radiografia de tórax".to_string(),
            inadequate_actions: "- Faltou calcular o CURB-65".to_string(),
            references: "Diretriz brasileira de PAC".to_string(),
            scores: self.scores,
        })
    }

    async fn generate_skill_challenge(&self, _skill: Skill) -> Result<SkillChallenge, ProviderError> {
        self.pause().await;
        Ok(SkillChallenge {
            challenge_text: "PA 220x130 mmHg, cefaleia, sem lesão de órgão-alvo".to_string(),
            full_description: "Urgência hipertensiva: reduzir a PA em 24-48h".to_string(),
        })
    }

    async fn evaluate_skill_attempt(
        &self,
        _challenge: &SkillChallenge,
        answer: &str,
    ) -> Result<SkillFeedback, ProviderError> {
        self.pause().await;
        let is_correct = answer.to_lowercase().contains("urgência");
        Ok(SkillFeedback {
            is_correct,
            explanation: if is_correct {
                "Correto".to_string()
            } else {
                "Trata-se de urgência hipertensiva".to_string()
            },
        })
    }
}

/// A running server and what tests need to reach it.
pub struct TestServer {
    pub base_url: String,
    pub ws_url: String,
    pub state: AppState,
    pub handle: tokio::task::JoinHandle<()>,
}

/// Serves the full router on an ephemeral port.
pub async fn spawn_server(provider: ScriptedProvider) -> TestServer {
    let state = AppState::new(Config::default(), Arc::new(provider));
    let router = create_router(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind");
    let addr = listener.local_addr().expect("Failed to get local addr");

    let handle = tokio::spawn(async move {
        axum::serve(listener, router).await.expect("Server failed");
    });

    TestServer {
        base_url: format!("http://{addr}/api"),
        ws_url: format!("ws://{addr}/ws"),
        state,
        handle,
    }
}
