//! End-to-end tests of the HTTP API against a scripted provider.
//!
//! Each test starts its own server on an ephemeral port and drives the
//! session through `reqwest`, checking the returned snapshots.

mod common;

use std::time::Duration;

use common::{spawn_server, ScriptedProvider, HIDDEN_DESCRIPTION};
use medsim_report::{CaseReport, HistoryReport, MarkdownGenerator, SessionReport};
use medsim_session::Scores;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};

async fn post(client: &Client, url: String, body: Value) -> (StatusCode, Value) {
    let response = client
        .post(url)
        .json(&body)
        .send()
        .await
        .expect("Request failed");
    let status = response.status();
    let body = response.json().await.expect("Body was not JSON");
    (status, body)
}

async fn get(client: &Client, url: String) -> Value {
    client
        .get(url)
        .send()
        .await
        .expect("Request failed")
        .json()
        .await
        .expect("Body was not JSON")
}

#[tokio::test]
async fn test_full_case_round_trip() {
    let server = spawn_server(ScriptedProvider::new()).await;
    let client = Client::new();
    let base = &server.base_url;

    let initial = get(&client, format!("{base}/session")).await;
    assert_eq!(initial["mode"], "menu");
    assert_eq!(initial["screen"], "menu");
    assert_eq!(initial["progression"]["level"], 1);

    let (status, snapshot) = post(
        &client,
        format!("{base}/case/start"),
        json!({"scenario": "UPA", "difficulty": "intermediate"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(snapshot["mode"], "in_case");
    assert_eq!(snapshot["scenario"], "UPA");
    assert_eq!(snapshot["case"]["vitalSigns"]["glycemia"], "210 mg/dL");
    assert_eq!(snapshot["loading"], false);

    let (status, snapshot) = post(
        &client,
        format!("{base}/case/action"),
        json!({"type": "anamnesis", "query": "Tem falta de ar?"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let transcript = snapshot["transcript"].as_array().expect("transcript");
    assert_eq!(transcript.len(), 1);
    assert_eq!(transcript[0]["type"], "anamnesis");
    assert_eq!(
        transcript[0]["response"],
        "Resposta para Anamnese: Tem falta de ar?"
    );

    let (status, snapshot) = post(
        &client,
        format!("{base}/case/finish"),
        json!({"hypotheses": "Pneumonia", "conduct": "Ceftriaxona e azitromicina"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(snapshot["mode"], "feedback");
    assert_eq!(snapshot["screen"], "feedback");
    assert_eq!(
        snapshot["feedback"]["finalDiagnosis"],
        "Pneumonia adquirida na comunidade"
    );
    assert_eq!(snapshot["transcript"].as_array().map(Vec::len), Some(3));
    assert_eq!(snapshot["lastOutcome"]["earnedXp"], 83);
    assert_eq!(snapshot["lastOutcome"]["correctDiagnosis"], true);
    assert_eq!(snapshot["progression"]["xp"], 83);

    // The hidden description never leaves the server
    assert!(!snapshot.to_string().contains(HIDDEN_DESCRIPTION));

    let history = get(&client, format!("{base}/history")).await;
    assert_eq!(history["xp"], 83);
    assert_eq!(history["level"], 1);
    assert_eq!(history["xpToNextLevel"], 17);
    assert_eq!(history["history"]["totalCases"], 1);
    assert_eq!(history["correctDiagnosisRate"], 100.0);

    let (status, snapshot) = post(&client, format!("{base}/menu"), json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(snapshot["mode"], "menu");
    assert!(snapshot["case"].is_null());
    assert_eq!(snapshot["progression"]["xp"], 83);
}

#[tokio::test]
async fn test_preconditions_return_conflict() {
    let server = spawn_server(ScriptedProvider::new()).await;
    let client = Client::new();
    let base = &server.base_url;

    // No case yet
    let (status, body) = post(
        &client,
        format!("{base}/case/action"),
        json!({"type": "physical_exam", "query": "Ausculta"}),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].is_string());

    // UTI unlocks at level 5
    let (status, _) = post(
        &client,
        format!("{base}/case/start"),
        json!({"scenario": "UTI"}),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    post(&client, format!("{base}/case/start"), json!({"scenario": "UBS"})).await;

    // Closing entries only through finish
    let (status, _) = post(
        &client,
        format!("{base}/case/action"),
        json!({"type": "hypotheses", "query": "IVAS"}),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    // Empty queries are rejected
    let (status, _) = post(
        &client,
        format!("{base}/case/action"),
        json!({"type": "labs_imaging", "query": "   "}),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    // Skill training only from the menu
    let (status, _) = post(
        &client,
        format!("{base}/skill/start"),
        json!({"skill": "ecg"}),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let snapshot = get(&client, format!("{base}/session")).await;
    assert_eq!(snapshot["mode"], "in_case");
    assert_eq!(snapshot["transcript"].as_array().map(Vec::len), Some(0));
}

#[tokio::test]
async fn test_feedback_failure_keeps_case_and_retry_succeeds() {
    let server = spawn_server(ScriptedProvider::new().failing_feedback(1)).await;
    let client = Client::new();
    let base = &server.base_url;

    post(&client, format!("{base}/case/start"), json!({"scenario": "UPA"})).await;

    let (status, snapshot) = post(
        &client,
        format!("{base}/case/finish"),
        json!({"hypotheses": "Pneumonia", "conduct": "Antibiótico"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(snapshot["mode"], "in_case");
    assert_eq!(
        snapshot["error"],
        "Falha ao gerar o feedback. Por favor, tente finalizar o caso novamente."
    );
    assert_eq!(snapshot["finishRequested"], true);
    assert_eq!(snapshot["progression"]["xp"], 0);

    // A closed case takes no more inquiries
    let (status, _) = post(
        &client,
        format!("{base}/case/action"),
        json!({"type": "anamnesis", "query": "Febre?"}),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, snapshot) = post(
        &client,
        format!("{base}/case/finish"),
        json!({"hypotheses": "outra coisa", "conduct": "outra conduta"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(snapshot["mode"], "feedback");
    assert!(snapshot["error"].is_null());

    let transcript = snapshot["transcript"].as_array().expect("transcript");
    assert_eq!(transcript.len(), 2);
    assert_eq!(transcript[0]["query"], "Pneumonia");
    assert_eq!(snapshot["progression"]["history"]["totalCases"], 1);
}

#[tokio::test]
async fn test_out_of_range_scores_are_clamped() {
    let provider = ScriptedProvider::new().with_scores(Scores::new(120.0, 80.0, -10.0, 90.0));
    let server = spawn_server(provider).await;
    let client = Client::new();
    let base = &server.base_url;

    post(&client, format!("{base}/case/start"), json!({"scenario": "UBS"})).await;
    let (_, snapshot) = post(
        &client,
        format!("{base}/case/finish"),
        json!({"hypotheses": "x", "conduct": "y"}),
    )
    .await;

    let scores = &snapshot["feedback"]["scores"];
    assert_eq!(scores["diagnosticReasoning"], 100.0);
    assert_eq!(scores["patientSafety"], 0.0);
    // mean(100, 80, 0, 90) = 67.5, rounds to 68
    assert_eq!(snapshot["lastOutcome"]["earnedXp"], 68);
}

#[tokio::test]
async fn test_skill_training_flow() {
    let server = spawn_server(ScriptedProvider::new()).await;
    let client = Client::new();
    let base = &server.base_url;

    let (status, snapshot) = post(
        &client,
        format!("{base}/skill/start"),
        json!({"skill": "hypertensive_crisis"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(snapshot["mode"], "skill_training");
    assert_eq!(snapshot["skill"], "hypertensive_crisis");
    assert!(snapshot["challenge"]["challengeText"]
        .as_str()
        .is_some_and(|text| text.contains("220x130")));
    assert!(!snapshot.to_string().contains("24-48h"));

    let (_, snapshot) = post(
        &client,
        format!("{base}/skill/evaluate"),
        json!({"answer": "Emergência hipertensiva"}),
    )
    .await;
    assert_eq!(snapshot["skillFeedback"]["isCorrect"], false);

    let (_, snapshot) = post(
        &client,
        format!("{base}/skill/evaluate"),
        json!({"answer": "Urgência hipertensiva"}),
    )
    .await;
    assert_eq!(snapshot["skillFeedback"]["isCorrect"], true);

    let (status, snapshot) = post(&client, format!("{base}/skill/next"), json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert!(snapshot["skillFeedback"].is_null());

    // Skill drills never touch progression
    assert_eq!(snapshot["progression"]["xp"], 0);
}

#[tokio::test]
async fn test_concurrent_request_is_rejected_while_loading() {
    let provider = ScriptedProvider::new().with_delay(Duration::from_millis(300));
    let server = spawn_server(provider).await;
    let client = Client::new();
    let base = server.base_url.clone();

    let slow = {
        let client = client.clone();
        let base = base.clone();
        tokio::spawn(async move {
            post(&client, format!("{base}/case/start"), json!({"scenario": "UPA"})).await
        })
    };

    tokio::time::sleep(Duration::from_millis(100)).await;
    let during = get(&client, format!("{base}/session")).await;
    assert_eq!(during["loading"], true);
    assert_eq!(during["pendingOperation"], "generate_case");

    let (status, _) = post(
        &client,
        format!("{base}/skill/start"),
        json!({"skill": "ecg"}),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, snapshot) = slow.await.expect("task panicked");
    assert_eq!(status, StatusCode::OK);
    assert_eq!(snapshot["mode"], "in_case");
    assert_eq!(snapshot["loading"], false);
}

#[tokio::test]
async fn test_history_overlay_and_draft() {
    let server = spawn_server(ScriptedProvider::new()).await;
    let client = Client::new();
    let base = &server.base_url;

    let (_, snapshot) = post(&client, format!("{base}/history/show"), json!({})).await;
    assert_eq!(snapshot["showHistory"], true);
    assert_eq!(snapshot["screen"], "history");

    let (_, snapshot) = post(&client, format!("{base}/history/hide"), json!({})).await;
    assert_eq!(snapshot["showHistory"], false);
    assert_eq!(snapshot["screen"], "menu");

    post(&client, format!("{base}/case/start"), json!({"scenario": "UPA"})).await;
    let (_, snapshot) = post(
        &client,
        format!("{base}/case/draft"),
        json!({"text": "Tem dor no pei"}),
    )
    .await;
    assert_eq!(snapshot["draft"], "Tem dor no pei");

    let (_, snapshot) = post(
        &client,
        format!("{base}/case/action"),
        json!({"type": "anamnesis", "query": "Tem dor no peito?"}),
    )
    .await;
    assert_eq!(snapshot["draft"], "");
}

#[tokio::test]
async fn test_report_from_served_session() {
    let server = spawn_server(ScriptedProvider::new()).await;
    let client = Client::new();
    let base = &server.base_url;
    let controller = server.state.controller.clone();
    let mut events = controller.subscribe();

    post(&client, format!("{base}/case/start"), json!({"scenario": "UPA"})).await;
    post(
        &client,
        format!("{base}/case/finish"),
        json!({"hypotheses": "Pneumonia", "conduct": "Antibiótico"}),
    )
    .await;

    let mut cases = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let medsim_session::SessionEvent::CaseCompleted(payload) = event {
            cases.push(CaseReport::from(&payload.case));
        }
    }
    assert_eq!(cases.len(), 1);

    let report = SessionReport::new(
        HistoryReport::from(&controller.progression()),
        cases,
        std::time::SystemTime::now().into(),
    )
    .expect("valid report");
    let markdown = MarkdownGenerator::new(&report).generate();
    assert!(markdown.contains("### Case 1: UPA / Pronto Atendimento (Iniciante)"));
    assert!(markdown.contains("- **Hypotheses**: Pneumonia"));
    assert!(!markdown.contains(HIDDEN_DESCRIPTION));
}
