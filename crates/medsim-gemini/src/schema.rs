//! Wire types and response schemas for the `generateContent` endpoint.

use medsim_session::{ClinicalCase, ProviderError, ProviderErrorKind, VitalSigns};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

// ============================================================================
// Request
// ============================================================================

/// Body of a `generateContent` call.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentRequest {
    /// The conversation; always a single user turn here.
    pub contents: Vec<Content>,
    /// Output constraints.
    pub generation_config: GenerationConfig,
}

impl GenerateContentRequest {
    /// A single-turn request constrained to JSON matching `schema`.
    #[must_use]
    pub fn json(prompt: String, schema: Value, temperature: Option<f32>) -> Self {
        Self {
            contents: vec![Content {
                role: "user".to_string(),
                parts: vec![Part { text: prompt }],
            }],
            generation_config: GenerationConfig {
                response_mime_type: "application/json".to_string(),
                response_schema: schema,
                temperature,
            },
        }
    }
}

/// One conversation turn.
#[derive(Debug, Serialize)]
pub struct Content {
    /// Speaker role.
    pub role: String,
    /// Text parts.
    pub parts: Vec<Part>,
}

/// A text part.
#[derive(Debug, Serialize, Deserialize)]
pub struct Part {
    /// The text.
    pub text: String,
}

/// Output constraints.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    /// Always `application/json`.
    pub response_mime_type: String,
    /// OpenAPI-style schema the output must follow.
    pub response_schema: Value,
    /// Sampling temperature, model default when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

// ============================================================================
// Response
// ============================================================================

/// Body of a successful `generateContent` response.
#[derive(Debug, Deserialize)]
pub struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

impl GenerateContentResponse {
    /// Concatenated text of the first candidate.
    ///
    /// # Errors
    ///
    /// Returns a `Schema` error if no candidate carries text.
    pub fn text(&self) -> Result<String, ProviderError> {
        let text: String = self
            .candidates
            .first()
            .and_then(|candidate| candidate.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter_map(|part| part.text.as_deref())
                    .collect()
            })
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(ProviderError::schema(
                "response contained no text in its candidates",
            ));
        }
        Ok(text)
    }
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
    status: Option<String>,
}

static CODE_FENCE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?s)^\s*```[a-zA-Z]*\s*\n?(.*?)\n?\s*```\s*$").ok());

/// Removes a surrounding Markdown code fence, if any.
#[must_use]
pub fn strip_code_fence(text: &str) -> &str {
    CODE_FENCE
        .as_ref()
        .and_then(|re| re.captures(text))
        .and_then(|captures| captures.get(1))
        .map_or_else(|| text.trim(), |inner| inner.as_str().trim())
}

/// Parses model output as `T`.
///
/// # Errors
///
/// Returns a `Schema` error naming `what` if the JSON does not fit.
pub fn parse_output<T: serde::de::DeserializeOwned>(
    text: &str,
    what: &str,
) -> Result<T, ProviderError> {
    serde_json::from_str(strip_code_fence(text))
        .map_err(|e| ProviderError::schema(format!("{what} did not match its schema: {e}")))
}

/// Classifies an HTTP failure status.
#[must_use]
pub fn kind_for_status(status: StatusCode) -> ProviderErrorKind {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderErrorKind::Authentication,
        StatusCode::TOO_MANY_REQUESTS => ProviderErrorKind::RateLimit,
        s if s.is_server_error() => ProviderErrorKind::Server,
        _ => ProviderErrorKind::Other,
    }
}

/// Builds the error for a non-success response, preferring the API's own
/// message when the body is the usual error envelope.
#[must_use]
pub fn http_error(status: StatusCode, body: &str) -> ProviderError {
    let detail = serde_json::from_str::<ErrorEnvelope>(body).map_or_else(
        |_| body.trim().to_string(),
        |envelope| {
            let message = envelope.error.message.unwrap_or_default();
            match envelope.error.status {
                Some(status_text) if !status_text.is_empty() => {
                    format!("{status_text}: {message}")
                }
                _ => message,
            }
        },
    );
    ProviderError::new(kind_for_status(status), format!("HTTP {status}: {detail}"))
}

// ============================================================================
// Operation outputs
// ============================================================================

/// Case output, with the short vital sign keys the schema asks for.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseOutput {
    patient_info: String,
    initial_complaint: String,
    vital_signs: VitalsOutput,
    full_case_description: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VitalsOutput {
    fc: String,
    fr: String,
    pa: String,
    temp: String,
    sat_o2: String,
    #[serde(default)]
    glicemia: Option<String>,
}

impl From<CaseOutput> for ClinicalCase {
    fn from(output: CaseOutput) -> Self {
        let vitals = output.vital_signs;
        Self {
            patient_info: output.patient_info,
            initial_complaint: output.initial_complaint,
            vital_signs: VitalSigns {
                heart_rate: vitals.fc,
                respiratory_rate: vitals.fr,
                blood_pressure: vitals.pa,
                temperature: vitals.temp,
                oxygen_saturation: vitals.sat_o2,
                glycemia: vitals.glicemia.filter(|g| !g.trim().is_empty()),
            },
            full_case_description: output.full_case_description,
        }
    }
}

/// Interaction output.
#[derive(Debug, Deserialize)]
pub struct InteractionOutput {
    /// The reply text.
    pub response: String,
}

// ============================================================================
// Schemas
// ============================================================================

fn string(description: &str) -> Value {
    json!({ "type": "STRING", "description": description })
}

fn number(description: &str) -> Value {
    json!({ "type": "NUMBER", "description": description })
}

/// Schema for case generation.
#[must_use]
pub fn case_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "patientInfo": string("Idade, sexo e comorbidades relevantes do paciente."),
            "initialComplaint": string("Queixa principal e breve história da doença atual."),
            "vitalSigns": {
                "type": "OBJECT",
                "properties": {
                    "fc": string("Frequência cardíaca (bpm)"),
                    "fr": string("Frequência respiratória (ipm)"),
                    "pa": string("Pressão arterial (mmHg)"),
                    "temp": string("Temperatura (°C)"),
                    "satO2": string("Saturação de oxigênio (%)"),
                    "glicemia": string("Glicemia capilar (mg/dL), se aferida")
                },
                "required": ["fc", "fr", "pa", "temp", "satO2"]
            },
            "fullCaseDescription": string(
                "Descrição completa do caso, com o diagnóstico final, usada apenas na avaliação."
            )
        },
        "required": ["patientInfo", "initialComplaint", "vitalSigns", "fullCaseDescription"]
    })
}

/// Schema for interaction replies.
#[must_use]
pub fn interaction_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "response": string("Resposta breve à ação do médico.")
        },
        "required": ["response"]
    })
}

/// Schema for case feedback.
#[must_use]
pub fn feedback_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "finalDiagnosis": string("Diagnóstico final mais provável."),
            "differentialFeedback": string("Comentário sobre os diagnósticos diferenciais considerados ou esquecidos."),
            "correctActions": string("Lista markdown dos acertos."),
            "inadequateActions": string("Lista markdown das condutas inadequadas, perigosas ou desnecessárias, com justificativa."),
            "references": string("Diretrizes e protocolos que embasam a avaliação."),
            "scores": {
                "type": "OBJECT",
                "properties": {
                    "diagnosticReasoning": number("Nota de 0 a 100 para o raciocínio diagnóstico."),
                    "examRequests": number("Nota de 0 a 100 para a pertinência dos exames."),
                    "patientSafety": number("Nota de 0 a 100 para a segurança do paciente."),
                    "finalConduct": number("Nota de 0 a 100 para a conduta final.")
                },
                "required": ["diagnosticReasoning", "examRequests", "patientSafety", "finalConduct"]
            }
        },
        "required": [
            "finalDiagnosis",
            "differentialFeedback",
            "correctActions",
            "inadequateActions",
            "references",
            "scores"
        ]
    })
}

/// Schema for skill challenges.
#[must_use]
pub fn skill_challenge_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "challengeText": string("Texto do desafio mostrado ao usuário."),
            "fullDescription": string("Resposta correta e justificativa, usada apenas na avaliação.")
        },
        "required": ["challengeText", "fullDescription"]
    })
}

/// Schema for skill evaluation.
#[must_use]
pub fn skill_evaluation_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "isCorrect": { "type": "BOOLEAN", "description": "A resposta está correta ou majoritariamente correta?" },
            "explanation": string("Explicação curta e educativa.")
        },
        "required": ["isCorrect", "explanation"]
    })
}
