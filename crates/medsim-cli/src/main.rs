//! MedSim CLI
//!
//! Serves the clinical case simulator over HTTP, backed by Gemini.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use medsim_gemini::GeminiProvider;
use medsim_report::{json::JsonGenerator, CaseReport, HistoryReport, MarkdownGenerator, SessionReport};
use medsim_session::{create_router, AppState, Config, SessionController, SessionEvent};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;

/// MedSim - Clinical case simulator
///
/// Generates realistic clinical cases, answers the player's questions as the
/// patient, and scores the final diagnosis and conduct.
#[derive(Parser, Debug)]
#[command(name = "medsim")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Enable verbose output (sets log level to debug)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP API and event stream
    Serve(ServeArgs),
    /// Load and validate the configuration, then exit
    CheckConfig {
        /// Path to configuration file (default: medsim.json in current directory)
        #[arg(short, long, value_name = "FILE")]
        config: Option<String>,
    },
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Path to configuration file (default: medsim.json in current directory)
    #[arg(short, long, value_name = "FILE")]
    config: Option<String>,

    /// Port for the HTTP API server (overrides server.port)
    #[arg(short, long)]
    port: Option<u16>,

    /// Write session reports to this directory on shutdown
    #[arg(short, long, value_name = "DIR")]
    report_dir: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Priority: RUST_LOG env var > --verbose flag > default (info)
    let filter = if cli.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt().with_env_filter(filter).init();

    let result = match cli.command {
        Command::Serve(args) => serve(args).await,
        Command::CheckConfig { config } => check_config(config.as_deref()),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(1)
        }
    }
}

/// Runs the HTTP server until Ctrl+C, then writes reports if requested.
async fn serve(args: ServeArgs) -> anyhow::Result<()> {
    let mut config = load_config(args.config.as_deref())?;
    if let Some(port) = args.port {
        config.server.port = port;
    }
    config.validate()?;

    print_config(&config);

    let provider = GeminiProvider::from_config(&config.provider)?;
    let addr = config.server.bind_address();
    let state = AppState::new(config, Arc::new(provider));
    let controller = state.controller.clone();
    let router = create_router(state);

    // Subscribe before serving so no completed case is missed
    let (stop_tx, stop_rx) = oneshot::channel();
    let collector = args
        .report_dir
        .as_ref()
        .map(|_| spawn_case_collector(controller.subscribe(), stop_rx));

    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind to {addr}: {e}"))?;

    println!();
    println!("MedSim API running on http://{addr}");
    println!("Event stream at ws://{addr}/ws");
    println!("Press Ctrl+C to stop");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| anyhow::anyhow!("HTTP server error: {e}"))?;

    println!();
    println!("Shutting down...");

    if let (Some(dir), Some(collector)) = (args.report_dir.as_deref(), collector) {
        let _ = stop_tx.send(());
        let cases = collector.await.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Case collector failed; report will list no cases");
            Vec::new()
        });
        write_reports(&controller, cases, Path::new(dir))?;
    }

    print_summary(&controller);
    Ok(())
}

/// Loads and validates configuration and checks the API key.
fn check_config(config_path: Option<&str>) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    print_config(&config);

    config.provider.api_key()?;
    println!();
    println!(
        "Configuration is valid; {} is set",
        config.provider.api_key_env
    );
    Ok(())
}

/// Loads configuration from the specified path or default location.
fn load_config(config_path: Option<&str>) -> anyhow::Result<Config> {
    match config_path {
        Some(path_str) => {
            let path = Path::new(path_str);
            if !path.exists() {
                anyhow::bail!(
                    "Config file not found: '{}'\n\nSuggestion: Check the path or remove the --config flag to use defaults",
                    path.display()
                );
            }
            Config::load_from_file(path).map_err(|e| anyhow::anyhow!("{e}"))
        }
        None => Config::load().map_err(|e| anyhow::anyhow!("{e}")),
    }
}

/// Collects every `case_completed` event until told to stop.
///
/// Events already buffered when the stop signal arrives are still archived.
fn spawn_case_collector(
    mut events: broadcast::Receiver<SessionEvent>,
    mut stop: oneshot::Receiver<()>,
) -> JoinHandle<Vec<CaseReport>> {
    tokio::spawn(async move {
        let mut cases = Vec::new();
        loop {
            tokio::select! {
                _ = &mut stop => {
                    drain_buffered(&mut events, &mut cases);
                    break;
                }
                event = events.recv() => match event {
                    Ok(event) => archive(event, &mut cases),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(missed = n, "Report collector lagged; some cases may be missing");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
        cases
    })
}

fn drain_buffered(events: &mut broadcast::Receiver<SessionEvent>, cases: &mut Vec<CaseReport>) {
    loop {
        match events.try_recv() {
            Ok(event) => archive(event, cases),
            Err(broadcast::error::TryRecvError::Lagged(n)) => {
                tracing::warn!(missed = n, "Report collector lagged; some cases may be missing");
            }
            Err(broadcast::error::TryRecvError::Empty | broadcast::error::TryRecvError::Closed) => {
                break
            }
        }
    }
}

fn archive(event: SessionEvent, cases: &mut Vec<CaseReport>) {
    if let SessionEvent::CaseCompleted(payload) = event {
        tracing::debug!(scenario = %payload.case.scenario, "Case archived for report");
        cases.push(CaseReport::from(&payload.case));
    }
}

/// Waits for Ctrl+C.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl+C");
    }
}

/// Writes Markdown and JSON reports for the session.
fn write_reports(
    controller: &SessionController,
    cases: Vec<CaseReport>,
    output_dir: &Path,
) -> anyhow::Result<()> {
    println!();
    println!("Generating reports...");

    let progression = HistoryReport::from(&controller.progression());
    let report = SessionReport::new(progression, cases, Utc::now())?;
    if let Some(best) = report.best_case() {
        println!(
            "  Best case: {} ({:.1})",
            best.scenario.label(),
            best.total_score()
        );
    }

    std::fs::create_dir_all(output_dir)?;

    let md_path: PathBuf = output_dir.join("medsim-report.md");
    std::fs::write(&md_path, MarkdownGenerator::new(&report).generate())?;
    println!("  Markdown report: {}", md_path.display());

    let json_path = output_dir.join("medsim-report.json");
    JsonGenerator::new(&report).write_to_file(&json_path, true)?;
    println!("  JSON report: {}", json_path.display());

    Ok(())
}

/// Prints the loaded configuration.
fn print_config(config: &Config) {
    println!("Configuration loaded:");
    println!("  Server: {}", config.server.bind_address());
    println!("  Case model: {}", config.provider.case_model);
    println!("  Interaction model: {}", config.provider.interaction_model);
    println!("  Feedback model: {}", config.provider.feedback_model);
    println!("  Skill model: {}", config.provider.skill_model);
    println!("  Score policy: {:?}", config.score_policy);
    println!("  Request timeout: {}s", config.provider.request_timeout_secs);
}

/// Prints a summary of the session's progression.
fn print_summary(controller: &SessionController) {
    let progression = controller.progression();
    let history = progression.history();
    println!("=== MedSim Session Summary ===");
    println!("Level: {} ({} XP)", progression.level(), progression.xp());
    println!("Cases completed: {}", history.total_cases);
    if history.total_cases > 0 {
        println!(
            "Correct diagnoses: {} ({:.0}%)",
            history.correct_diagnoses,
            history.correct_diagnosis_rate()
        );
        println!("Average score: {:.1}", history.average_score);
    }
}
