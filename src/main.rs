use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::Utc;
use clap::{Parser, Subcommand};

use studio::engine::{self, EngineEvent, EngineHandle, Notice, NoticeLevel};
use studio::gateway::HttpGateway;
use studio::loader;
use studio::protocol::{ExecutionReport, SavedTest, StepResult, StepStatus, TestStep};
use studio::telemetry::{init_telemetry, shutdown_telemetry, TelemetryConfig};
use studio::timing::EngineTiming;

#[derive(Parser)]
#[command(name = "studio")]
#[command(about = "Interactive browser-test capture & preview engine", long_about = None)]
struct Cli {
    /// Base URL of the browser-automation backend
    #[arg(long, global = true, default_value = "http://localhost:3001")]
    backend: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Records live interactions against a site into a test sequence
    Record {
        /// URL of the site to record against
        #[arg(short, long)]
        url: String,

        /// Where to save the captured test (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Executes a saved test and plays back the results
    Execute {
        /// Path to the saved test file
        #[arg(short, long)]
        file: PathBuf,

        /// Override the test name sent to the backend
        #[arg(short, long)]
        name: Option<String>,

        /// Directory to write per-step screenshots into
        #[arg(long)]
        screenshot_dir: Option<PathBuf>,

        /// Where to write the JSON execution report
        #[arg(short, long)]
        report: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_telemetry(TelemetryConfig::from_env())?;

    let outcome = match &cli.command {
        Commands::Record { url, output } => record(&cli.backend, url, output.as_deref()).await,
        Commands::Execute { file, name, screenshot_dir, report } => {
            execute(
                &cli.backend,
                file,
                name.clone(),
                screenshot_dir.as_deref(),
                report.as_deref(),
            )
            .await
        }
    };

    shutdown_telemetry();
    if !outcome? {
        std::process::exit(1);
    }
    Ok(())
}

fn spawn_engine(
    backend: &str,
) -> Result<(
    EngineHandle,
    tokio::sync::mpsc::UnboundedReceiver<EngineEvent>,
    tokio::task::JoinHandle<()>,
)> {
    let timing = EngineTiming::from_env();
    let gateway = Arc::new(
        HttpGateway::new(backend, timing.request_timeout)
            .context("failed to build backend client")?,
    );
    Ok(engine::spawn(gateway, timing))
}

async fn record(backend: &str, url: &str, output: Option<&Path>) -> Result<bool> {
    let (handle, mut events, task) = spawn_engine(backend)?;

    handle.set_site(url, Vec::new());
    handle.start_recording(url);
    println!("🎥 Recording against {url} — press Ctrl-C to stop.");

    let mut sequence: Vec<TestStep> = Vec::new();
    let mut stop_deadline: Option<tokio::time::Instant> = None;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c(), if stop_deadline.is_none() => {
                println!("\n⏹  Stopping recording...");
                handle.stop_recording();
                stop_deadline = Some(tokio::time::Instant::now() + Duration::from_secs(15));
            }
            _ = sleep_until_opt(stop_deadline), if stop_deadline.is_some() => {
                eprintln!("⚠️  Timed out waiting for the final sequence; keeping what was captured.");
                break;
            }
            event = events.recv() => {
                let Some(event) = event else { break };
                match event {
                    EngineEvent::SequenceReplaced(steps) => {
                        print_sequence(&steps);
                        sequence = steps;
                        if stop_deadline.is_some() {
                            break; // the post-stop batch is final
                        }
                    }
                    EngineEvent::RecordingStarted { session_id } => {
                        println!("▶️  Session {session_id} started");
                    }
                    EngineEvent::RecordingStopped => {
                        // Backend-initiated end: any final batch was already
                        // applied, so what we hold is the captured test.
                        if stop_deadline.is_none() {
                            break;
                        }
                    }
                    EngineEvent::Notice(notice) => {
                        print_notice(&notice);
                        // Before a stop was requested, an error notice means
                        // the recording cannot continue (bad URL, start
                        // failure, session lost).
                        if notice.level == NoticeLevel::Error && stop_deadline.is_none() {
                            break;
                        }
                    }
                    _ => {}
                }
            }
        }
    }

    handle.shutdown();
    let _ = task.await;

    println!("🏁 Captured {} step(s).", sequence.len());
    let saved = SavedTest {
        name: format!("Recorded {}", Utc::now().format("%Y-%m-%d %H:%M")),
        url: url.to_string(),
        sequence,
        elements: Vec::new(),
    };
    let json = serde_json::to_string_pretty(&saved).context("failed to serialize captured test")?;
    match output {
        Some(path) => {
            fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))?;
            println!("📄 Saved to {}", path.display());
        }
        None => println!("{json}"),
    }
    Ok(true)
}

async fn execute(
    backend: &str,
    file: &Path,
    name: Option<String>,
    screenshot_dir: Option<&Path>,
    report_path: Option<&Path>,
) -> Result<bool> {
    let start_time = Utc::now();

    let test = loader::load_saved_test(file).map_err(|e| anyhow!("[{}] {e}", e.code()))?;
    println!("📋 Test loaded: {} ({} steps)", test.name, test.sequence.len());

    if let Some(dir) = screenshot_dir {
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
    }

    let (handle, mut events, task) = spawn_engine(backend)?;
    handle.set_site(test.url.clone(), test.elements.clone());
    handle.update_sequence(test.sequence.clone());
    handle.run_now(Some(name.unwrap_or_else(|| test.name.clone())));
    println!("▶️  Executing against {}...", test.url);

    let mut results: Vec<StepResult> = Vec::new();
    let mut last_screenshot: Option<String> = None;
    let mut passed = false;

    while let Some(event) = events.recv().await {
        match event {
            EngineEvent::ResultsInstalled(steps) => results = steps,
            EngineEvent::Screenshot(shot) => last_screenshot = Some(shot),
            EngineEvent::PlaybackStep { index, total, name, status } => {
                let icon = if status == StepStatus::Passed { "✅" } else { "❌" };
                println!("   {icon} [{}/{}] {name}", index + 1, total);
                if let Some(dir) = screenshot_dir {
                    if let Some(shot) = last_screenshot.take() {
                        write_screenshot(dir, index, &shot);
                    }
                }
            }
            EngineEvent::PlaybackFinished { passed: overall } => {
                passed = overall;
                break;
            }
            EngineEvent::Notice(notice) => print_notice(&notice),
            _ => {}
        }
    }

    handle.shutdown();
    let _ = task.await;

    println!("🏁 Result: {}", if passed { "passed" } else { "failed" });

    if let Some(path) = report_path {
        let report = ExecutionReport {
            name: test.name.clone(),
            status: if passed { "passed" } else { "failed" }.to_string(),
            start_time: start_time.to_rfc3339(),
            end_time: Utc::now().to_rfc3339(),
            steps: results,
        };
        let json =
            serde_json::to_string_pretty(&report).context("failed to serialize report")?;
        fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))?;
        println!("📄 Report saved to {}", path.display());
    }

    Ok(passed)
}

async fn sleep_until_opt(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(instant) => tokio::time::sleep_until(instant).await,
        None => std::future::pending().await,
    }
}

fn print_sequence(steps: &[TestStep]) {
    println!("📝 {} step(s) captured", steps.len());
    for (i, step) in steps.iter().enumerate() {
        let target = step
            .target_element
            .as_ref()
            .map(|el| el.selector.as_str())
            .unwrap_or("-");
        println!("   {}. {} {}", i + 1, step.action_kind.display_name, target);
    }
}

fn print_notice(notice: &Notice) {
    let icon = match notice.level {
        NoticeLevel::Info => "ℹ️ ",
        NoticeLevel::Warning => "⚠️ ",
        NoticeLevel::Error => "❌",
    };
    match notice.code {
        Some(code) => println!("{icon} [{code} {}] {}", code.category(), notice.message),
        None => println!("{icon} {}", notice.message),
    }
}

fn write_screenshot(dir: &Path, index: usize, screenshot: &str) {
    // Backends may send a bare base64 body or a full data URL.
    let encoded = screenshot.rsplit(',').next().unwrap_or(screenshot);
    match BASE64.decode(encoded.as_bytes()) {
        Ok(bytes) => {
            let path = dir.join(format!("step-{:02}.png", index + 1));
            if let Err(e) = fs::write(&path, bytes) {
                eprintln!("⚠️  Could not write {}: {e}", path.display());
            }
        }
        Err(e) => eprintln!("⚠️  Skipping screenshot for step {}: {e}", index + 1),
    }
}
