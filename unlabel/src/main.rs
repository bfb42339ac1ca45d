//! unlabel - conversational ingredient co-pilot
//!
//! Sends ingredient questions and label photos to the analysis service and
//! prints the structured answers.
//!
//! Uses XDG Base Directory specification for file locations:
//! - Logs: $XDG_STATE_HOME/unlabel/unlabel.YYYY-MM-DD.log (~/.local/state/unlabel/), rotated daily
//! - Config: $XDG_CONFIG_HOME/unlabel/config.toml (~/.config/unlabel/config.toml)

mod render;
mod spinner;

use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use tokio::io::AsyncBufReadExt;
use unlabel_core::client::ServiceClient;
use unlabel_core::session::SessionState;
use unlabel_core::transcript::{Transcript, TranscriptSink};
use unlabel_core::{Config, Controller, ImageUpload, SessionSummary};

use render::render_turn;
use spinner::Spinner;

type App = Controller<ServiceClient, Transcript, Spinner>;

/// Exit status after Ctrl-C, as shells report SIGINT
const INTERRUPTED: u8 = 130;

#[derive(Parser)]
#[command(name = "unlabel")]
#[command(about = "Ask about ingredients and food labels")]
#[command(version)]
struct Args {
    /// Verbose output (-v prints session ids and states)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Analysis service base URL (overrides the config file)
    #[arg(long, global = true)]
    base_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ask one question about a product or its ingredients
    Ask {
        /// Question or ingredient list
        text: String,

        /// Follow the agent's steps as they stream in
        #[arg(long)]
        stream: bool,
    },

    /// Analyze a photo of a label
    Scan {
        /// Image file (png, jpg, webp, gif, heic)
        path: PathBuf,
    },

    /// Interactive conversation; context carries across turns
    Chat {
        /// Start with streaming enabled
        #[arg(long)]
        stream: bool,
    },

    /// Show configuration and service health
    Status,
}

fn main() -> Result<ExitCode> {
    let args = Args::parse();

    // Ensure XDG environment variables are set before using core library
    Config::ensure_xdg_env();

    let mut config = Config::load().context("failed to load configuration")?;
    if let Some(base_url) = &args.base_url {
        config.service.base_url = base_url.clone();
    }

    let _log_guard =
        unlabel_core::logging::init(&config.logging).context("failed to initialize logging")?;

    tracing::info!(base_url = %config.service.base_url, "unlabel starting");

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to create async runtime")?;

    let client =
        ServiceClient::new(config.service.clone()).context("failed to create service client")?;

    match args.command {
        Command::Status => runtime.block_on(run_status(&config, &client)),
        Command::Ask { ref text, stream } => {
            let app = new_app(client, &config, Transcript::new());
            let streaming = stream || config.service.prefer_streaming;
            let summary = runtime.block_on(until_interrupted(&app, app.submit(text.clone(), streaming)));
            Ok(finish(&app, summary, args.verbose))
        }
        Command::Scan { ref path } => {
            let upload = load_image(path)?;
            let app = new_app(client, &config, Transcript::new());
            let summary = runtime.block_on(until_interrupted(&app, app.submit_image(upload)));
            Ok(finish(&app, summary, args.verbose))
        }
        Command::Chat { stream } => {
            let app = new_app(client, &config, Transcript::with_greeting());
            let streaming = stream || config.service.prefer_streaming;
            let code = runtime.block_on(run_chat(&app, streaming, args.verbose));
            // The stdin reader thread cannot be cancelled; don't wait for it.
            runtime.shutdown_background();
            code
        }
    }
}

fn new_app(client: ServiceClient, config: &Config, transcript: Transcript) -> App {
    Controller::new(client, transcript, Spinner::new())
        .with_stream_idle_timeout(config.service.stream_idle_timeout())
}

/// Print configuration and check service health
async fn run_status(config: &Config, client: &ServiceClient) -> Result<ExitCode> {
    println!("Config: {}", Config::config_path().display());
    println!(
        "Logs: {}",
        unlabel_core::logging::log_file_pattern().display()
    );
    println!("Service: {}", client.base_url());
    println!(
        "Streaming by default: {}",
        if config.service.prefer_streaming { "yes" } else { "no" }
    );
    match config.service.stream_idle_timeout() {
        Some(limit) => println!("Stream idle timeout: {}s", limit.as_secs()),
        None => println!("Stream idle timeout: disabled"),
    }

    match client.health_check().await {
        Ok(health) if health.is_ok() => {
            println!("Health: ok");
            Ok(ExitCode::SUCCESS)
        }
        Ok(health) => {
            println!(
                "Health: {} {}",
                health.status,
                health.message.as_deref().unwrap_or("")
            );
            Ok(ExitCode::FAILURE)
        }
        Err(e) => {
            tracing::warn!(error = %e, "Health check failed");
            println!("Health: unreachable ({})", e);
            Ok(ExitCode::FAILURE)
        }
    }
}

/// Interactive loop. Ctrl-C at the prompt leaves the chat; during a
/// streamed answer it cancels the stream.
async fn run_chat(app: &App, mut streaming: bool, verbose: u8) -> Result<ExitCode> {
    for turn in app.transcript().turns() {
        println!("{}\n", render_turn(&turn));
    }
    println!("Commands: /scan <path>, /stream, /quit\n");

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    let code = loop {
        print!("> ");
        std::io::stdout().flush().context("failed to flush stdout")?;

        let line = tokio::select! {
            line = lines.next_line() => line.context("failed to read input")?,
            Ok(()) = tokio::signal::ctrl_c() => {
                println!();
                break ExitCode::from(INTERRUPTED);
            }
        };
        let Some(line) = line else {
            break ExitCode::SUCCESS;
        };
        let line = line.trim();

        if line.is_empty() {
            continue;
        }
        if line == "/quit" {
            break ExitCode::SUCCESS;
        }
        if line == "/stream" {
            streaming = !streaming;
            println!("Streaming {}\n", if streaming { "on" } else { "off" });
            continue;
        }

        let summary = if let Some(path) = line.strip_prefix("/scan ") {
            match load_image(Path::new(path.trim())) {
                Ok(upload) => until_interrupted(app, app.submit_image(upload)).await,
                Err(e) => {
                    println!("{:#}\n", e);
                    continue;
                }
            }
        } else {
            until_interrupted(app, app.submit(line, streaming)).await
        };

        let Some(summary) = summary else {
            break ExitCode::from(INTERRUPTED);
        };
        print_answer(app, summary, verbose);
        println!();
    };

    tracing::info!(turns = app.transcript().len(), "Chat ended");
    Ok(code)
}

/// Run a request until it finishes or the user presses Ctrl-C
async fn until_interrupted(
    app: &App,
    request: impl Future<Output = SessionSummary>,
) -> Option<SessionSummary> {
    interruptible(request, tokio::signal::ctrl_c(), || app.cancel_active()).await
}

/// Race `request` against `interrupt`.
///
/// On interrupt, `cancel` is asked to stop the request gracefully; if it
/// does, the request still runs to its (cancelled) end. Otherwise the request
/// is dropped and `None` is returned. A failed interrupt source is ignored.
async fn interruptible<T>(
    request: impl Future<Output = T>,
    interrupt: impl Future<Output = std::io::Result<()>>,
    cancel: impl FnOnce() -> bool,
) -> Option<T> {
    tokio::pin!(request);
    tokio::pin!(interrupt);
    tokio::select! {
        output = &mut request => Some(output),
        Ok(()) = &mut interrupt => {
            if cancel() {
                Some(request.await)
            } else {
                tracing::info!("Request interrupted");
                None
            }
        }
    }
}

fn load_image(path: &Path) -> Result<ImageUpload> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .context("image path has no file name")?;
    let bytes =
        std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;

    match ImageUpload::from_named_bytes(file_name, bytes) {
        Some(upload) => Ok(upload),
        None => bail!(
            "unsupported image type: {} (expected png, jpg, jpeg, webp, gif or heic)",
            file_name
        ),
    }
}

/// Print the answer of a one-shot command and pick the exit code
fn finish(app: &App, summary: Option<SessionSummary>, verbose: u8) -> ExitCode {
    let Some(summary) = summary else {
        eprintln!("(interrupted)");
        return ExitCode::from(INTERRUPTED);
    };
    print_answer(app, summary, verbose);
    match summary.state {
        SessionState::Finalized => ExitCode::SUCCESS,
        _ => ExitCode::FAILURE,
    }
}

fn print_answer(app: &App, summary: SessionSummary, verbose: u8) {
    if verbose > 0 {
        eprintln!("session {}: {}", summary.id, summary.state);
    }

    match summary.state {
        SessionState::Cancelled => println!("(cancelled)"),
        _ => {
            if let Some(turn) = app.transcript().last().filter(|t| t.is_final()) {
                println!("{}", render_turn(&turn));
            }
        }
    }
}
