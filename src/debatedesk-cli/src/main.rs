//! DebateDesk CLI - debate session controller
//!
//! Runs a formatted debate in the terminal: phase sequencing, per-side
//! speaking clocks, typed speech capture and an automated opposing side.

use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use colored::{ColoredString, Colorize};
use debatedesk_core::capture::{ChannelRecognizer, NoRecognizer, SpeechRecognizer, UtteranceFeed};
use debatedesk_core::tts::{NoPlayback, SpeechBackend};
use debatedesk_core::{
    ClockStart, Config, Controller, CredentialStore, DebateCallback, DebateError, DebateEvent,
    FreeDebatePolicy, Phase, ReplyGenerator, SessionKeyStore, SessionStatus, Side,
    Speaker, default_config, format_time,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "debatedesk",
    version,
    about = "Debate session controller with an AI opponent",
    long_about = "Sequences debate phases, tracks each side's speaking time and answers for the opposing side through an OpenAI-compatible chat endpoint."
)]
struct Cli {
    /// Path to a TOML config file
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Speaking time per side in seconds
    #[arg(short, long, value_name = "SECS")]
    budget: Option<u32>,

    /// Side for free-debate phases: neutral, side_a or side_b
    #[arg(long, value_name = "POLICY")]
    free_debate: Option<String>,

    /// Disable speech capture
    #[arg(long)]
    no_capture: bool,

    /// Directory for rendered reply audio
    #[cfg(feature = "kokoro")]
    #[arg(long, value_name = "DIR")]
    wav_dir: Option<PathBuf>,
}

const HELP: &str = "Commands:
  start            begin the debate
  next             advance to the next phase
  pause / resume   control the current side's clock
  record / stop    capture one utterance (type it after `record`)
  key <sk-...>     set the DashScope API key
  status           show phase and remaining time
  help             show this list
  quit             leave";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables from .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => default_config(),
    };
    if let Some(budget) = cli.budget {
        config.session.budget_secs = budget;
    }
    if let Some(policy) = &cli.free_debate {
        config.session.free_debate = parse_policy(policy)?;
    }
    #[cfg(feature = "kokoro")]
    {
        if let Some(dir) = &cli.wav_dir {
            config.voice.output_dir = dir.clone();
        }
    }

    let credentials = Arc::new(SessionKeyStore::new());
    if let Ok(key) = env::var("DASHSCOPE_API_KEY") {
        if let Err(e) = credentials.set(&key) {
            eprintln!("{} {}", "Warning:".yellow(), e);
        }
    }
    if credentials.get().is_none() {
        eprintln!(
            "{}",
            "Warning: no API key set. Use `key sk-...` before the AI side speaks.".yellow()
        );
    }

    let generator = ReplyGenerator::new(
        config.remote.clone(),
        config.prompts.clone(),
        credentials,
    )?;

    let backend = playback_backend(&config).await;
    let speaker = Speaker::new(
        backend,
        config.session.language.clone(),
        config.voice.unsupported_note.clone(),
    )
    .with_voice(config.voice.voice.clone());

    let (recognizer, feed): (Arc<dyn SpeechRecognizer>, Option<UtteranceFeed>) =
        if cli.no_capture {
            (Arc::new(NoRecognizer), None)
        } else {
            let (recognizer, feed) = ChannelRecognizer::new();
            (Arc::new(recognizer), Some(feed))
        };

    let format = config.format()?;
    info!(
        format = format.name(),
        budget_secs = config.session.budget_secs,
        capture = feed.is_some(),
        "Session configured"
    );
    let mut controller = Controller::new(
        &config,
        Arc::new(generator),
        Arc::new(speaker),
        recognizer,
    )?
    .with_callback(create_console_callback(config.session.ai_side));

    print_header(format.display_name(), &controller);
    println!("{}", HELP.dimmed());
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
        match command {
            "start" => {
                if let Err(e) = controller.start() {
                    report(&e);
                }
            }
            "next" => {
                // Reply progress is reported through events while the task runs on.
                if let Err(e) = controller.next() {
                    report(&e);
                }
            }
            "pause" => {
                if controller.pause() {
                    println!("{}", "Clock paused.".dimmed());
                }
            }
            "resume" => match controller.resume() {
                Ok(ClockStart::Started { .. }) => println!("{}", "Clock resumed.".dimmed()),
                Ok(ClockStart::AlreadyRunning) => println!("{}", "Clock already running.".dimmed()),
                Ok(ClockStart::Exhausted) => println!("{}", "No time left for this side.".red()),
                Err(e) => report(&e),
            },
            "record" => {
                if let Err(e) = controller.record() {
                    report(&e);
                }
            }
            "stop" => {
                if let Err(e) = controller.stop_recording() {
                    report(&e);
                }
            }
            "key" => match controller.set_api_key(rest) {
                Ok(()) => println!("{}", "API key saved.".green()),
                Err(e) => report(&e),
            },
            "status" => print_status(&controller),
            "help" => println!("{}", HELP),
            "quit" | "exit" => break,
            _ => match &feed {
                Some(feed) if controller.is_recording() => {
                    feed.send(line);
                }
                _ => println!("{} {}", "Unknown command:".yellow(), command),
            },
        }
    }

    Ok(())
}

fn parse_policy(value: &str) -> Result<FreeDebatePolicy, DebateError> {
    match value.to_lowercase().as_str() {
        "neutral" => Ok(FreeDebatePolicy::Neutral),
        "side_a" | "a" => Ok(FreeDebatePolicy::SideA),
        "side_b" | "b" => Ok(FreeDebatePolicy::SideB),
        other => Err(DebateError::ConfigError(format!(
            "Unknown free-debate policy '{}'. Use neutral, side_a or side_b",
            other
        ))),
    }
}

#[cfg(feature = "kokoro")]
async fn playback_backend(config: &Config) -> Arc<dyn SpeechBackend> {
    match debatedesk_core::tts::KokoroPlayback::new(config.voice.output_dir.clone()).await {
        Ok(backend) => Arc::new(backend),
        Err(e) => {
            eprintln!("{} {}", "Warning:".yellow(), e);
            Arc::new(NoPlayback)
        }
    }
}

#[cfg(not(feature = "kokoro"))]
async fn playback_backend(_config: &Config) -> Arc<dyn SpeechBackend> {
    Arc::new(NoPlayback)
}

fn side_colored(text: &str, side: Option<Side>) -> ColoredString {
    match side {
        Some(Side::A) => text.bright_blue().bold(),
        Some(Side::B) => text.bright_red().bold(),
        None => text.bold(),
    }
}

fn report(error: &DebateError) {
    println!("{} {}", "!".red().bold(), error.to_string().red());
}

fn print_header(display_name: &str, controller: &Controller) {
    println!();
    println!("{}", "═".repeat(70).bright_blue());
    println!(
        "{}",
        format!("  {} - {}", "DebateDesk".bold(), display_name)
            .bright_blue()
            .bold()
    );
    println!("{}", "═".repeat(70).bright_blue());
    println!();
    println!("{}", "Phases:".bold());
    for phase in controller.phases() {
        println!("  {:>2}. {}", phase.index, side_colored(&phase.label, phase.side));
    }
    println!();
}

fn print_status(controller: &Controller) {
    let snap = controller.snapshot();
    let state = match snap.status {
        SessionStatus::Idle => "idle",
        SessionStatus::Running => "running",
        SessionStatus::Ended => "ended",
    };
    println!(
        "{} {} ({})",
        "Current phase:".bold(),
        side_colored(&snap.phase.label, snap.active_side),
        state
    );
    println!(
        "  {} {}   {} {}{}",
        "A".bright_blue().bold(),
        format_time(snap.budget_a),
        "B".bright_red().bold(),
        format_time(snap.budget_b),
        match snap.running_side {
            Some(side) => format!("   (clock: {})", side.display_name()),
            None => String::new(),
        }
    );
    let transcript = controller.transcript().latest();
    if !transcript.is_empty() {
        println!("  {} {}", "Last speech:".dimmed(), transcript);
    }
}

fn announce(prefix: &str, phase: &Phase) {
    println!();
    println!("{}", "─".repeat(70).dimmed());
    println!("{} {}", prefix.bold(), side_colored(&phase.label, phase.side));
}

/// Create a callback that prints session events to the console.
fn create_console_callback(ai_side: Side) -> DebateCallback {
    Arc::new(move |event: DebateEvent| match event {
        DebateEvent::DebateStart { phase } => announce("Debate started:", &phase),
        DebateEvent::PhaseEntered { phase } => announce("Entered:", &phase),
        DebateEvent::UserTurn { phase } => {
            let name = phase.side.map(|s| s.display_name().to_string()).unwrap_or_default();
            println!("  Side {} please begin speaking.", name);
        }
        DebateEvent::NoSpeech { .. } => println!("  {}", "(no speech needed in this phase)".dimmed()),
        DebateEvent::Tick { side, remaining } => {
            if remaining % 60 == 0 || remaining <= 10 {
                println!(
                    "  {}",
                    side_colored(
                        &format!("[{}] {}", side.display_name(), format_time(remaining)),
                        Some(side)
                    )
                );
            }
        }
        DebateEvent::TimeExpired { side } => {
            println!(
                "{}",
                format!("  Side {} is out of time!", side.display_name())
                    .red()
                    .bold()
            );
        }
        DebateEvent::Thinking { .. } => {
            println!("  {}", "AI is thinking...".dimmed());
        }
        DebateEvent::Reply {
            text,
            playback_note,
        } => {
            println!(
                "{} {}",
                "▶".bright_red(),
                side_colored(&format!("AI ({})", ai_side.display_name()), Some(ai_side))
            );
            for line in textwrap(&text, 66).lines() {
                println!("  {}", line);
            }
            if let Some(note) = playback_note {
                println!("  {}", note.dimmed());
            }
        }
        DebateEvent::ReplyFailed { message } => {
            println!("  {} {}", "AI error:".red().bold(), message);
        }
        DebateEvent::CaptureStarted => println!("  {}", "🎤 Listening... type what you say.".cyan()),
        DebateEvent::Transcript { text } => println!("  {} {}", "Heard:".cyan(), text),
        DebateEvent::CaptureFailed { message } => {
            println!("  {} {}", "Recognition error:".red(), message)
        }
        DebateEvent::CaptureStopped => println!("  {}", "(stopped)".dimmed()),
        DebateEvent::DebateEnd => {
            println!();
            println!("{}", "═".repeat(70).bright_blue());
            println!("{}", "  Debate concluded.".bright_green().bold());
            println!("{}", "═".repeat(70).bright_blue());
        }
    })
}

/// Wrap reply text for the terminal.
///
/// Counts characters, and breaks inside runs without spaces so CJK text wraps too.
fn textwrap(text: &str, width: usize) -> String {
    let mut result = String::new();
    let mut current_line_len = 0;

    for word in text.split_whitespace() {
        let word_len = word.chars().count();
        if current_line_len + word_len + 1 > width && current_line_len > 0 {
            result.push('\n');
            current_line_len = 0;
        }
        if current_line_len > 0 {
            result.push(' ');
            current_line_len += 1;
        }
        for c in word.chars() {
            if current_line_len >= width {
                result.push('\n');
                current_line_len = 0;
            }
            result.push(c);
            current_line_len += 1;
        }
    }

    result
}
