//! Fieldhand CLI - ask the farm assistant from a terminal.
//!
//! ```text
//! fieldhand ask [--legacy] [--no-voice] <prompt...>
//! fieldhand dictate [--no-voice]      (stdin lines are final transcripts)
//! ```
//!
//! # Event Loop
//!
//! A fixed 8ms cadence drives [`Conversation::tick`]:
//!
//! 1. Wait for frame tick (or Ctrl-C, which stops the stream)
//! 2. Apply new envelopes, fire due playback and dictation submits
//! 3. Print progress to stderr
//! 4. Once the answer is final and voice is idle, print it and exit

mod render;
mod voice;

use std::{
    fs::{self, OpenOptions},
    io::{BufRead, Write},
    path::PathBuf,
    sync::Mutex,
    time::{Duration, Instant, SystemTime},
};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use fieldhand_engine::{Conversation, FieldhandConfig, HttpConnector, MessageId};

const FRAME_DURATION: Duration = Duration::from_millis(8);

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let (log_file, init_warnings) = open_log_file();

    if let Some((log_path, file)) = log_file {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
            .with(env_filter)
            .init();

        tracing::info!(path = %log_path.display(), "Logging initialized");
        for warning in init_warnings {
            tracing::warn!("{warning}");
        }
        return;
    }

    // Without a log file, keep stderr for progress output only.
    tracing_subscriber::registry().with(env_filter).init();
}

fn open_log_file() -> (Option<(PathBuf, fs::File)>, Vec<String>) {
    let mut warnings = Vec::new();

    for candidate in log_file_candidates() {
        if let Some(parent) = candidate.parent()
            && let Err(e) = fs::create_dir_all(parent)
        {
            warnings.push(format!(
                "Failed to create log dir {}: {e}",
                parent.display()
            ));
            continue;
        }

        match OpenOptions::new()
            .create(true)
            .append(true)
            .open(&candidate)
        {
            Ok(file) => return (Some((candidate, file)), warnings),
            Err(e) => {
                warnings.push(format!(
                    "Failed to open log file {}: {e}",
                    candidate.display()
                ));
            }
        }
    }

    (None, warnings)
}

fn log_file_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    // Primary: ~/.fieldhand/logs/fieldhand.log
    if let Some(config_path) = FieldhandConfig::path()
        && let Some(config_dir) = config_path.parent()
    {
        candidates.push(config_dir.join("logs").join("fieldhand.log"));
    }

    // Fallback: ./.fieldhand/logs/fieldhand.log
    candidates.push(PathBuf::from(".fieldhand").join("logs").join("fieldhand.log"));

    candidates
}

/// Ask the farm assistant from a terminal.
#[derive(Debug, Parser)]
#[command(name = "fieldhand", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
enum Command {
    /// Stream an answer to a typed question.
    Ask {
        /// Use the single-request endpoint instead of the event stream.
        #[arg(long)]
        legacy: bool,
        /// Do not read the answer aloud.
        #[arg(long)]
        no_voice: bool,
        #[arg(required = true, num_args = 1..)]
        prompt: Vec<String>,
    },
    /// Read final transcripts from stdin and submit them as one question.
    Dictate {
        /// Do not read the answer aloud.
        #[arg(long)]
        no_voice: bool,
    },
}

impl Command {
    fn voice(&self) -> bool {
        match self {
            Command::Ask { no_voice, .. } | Command::Dictate { no_voice } => !*no_voice,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let command = Cli::parse().command;

    let config = FieldhandConfig::load()
        .context("loading config")?
        .unwrap_or_default();
    let api = config
        .api_settings()
        .context("resolving assistant API settings")?;
    let mut settings = config.engine_settings();
    settings.voice_enabled &= command.voice();

    let connector = HttpConnector::new(api, config.stream_options());
    let mut conversation = Conversation::new(
        Box::new(connector),
        Box::new(voice::TranscriptSpeaker),
        settings,
    );

    let target = match command {
        Command::Ask { prompt, legacy, .. } => {
            let prompt = prompt.join(" ");
            let now = SystemTime::now();
            let id = if legacy {
                conversation.submit_legacy(&prompt, now)?
            } else {
                conversation.submit(&prompt, now)?
            };
            Some(id)
        }
        Command::Dictate { .. } => None,
    };

    let id = run(&mut conversation, target).await?;
    finish(&conversation, id)
}

/// Drive the conversation until the answer to `target` is final and no
/// playback is pending. With no target, dictate from stdin first.
async fn run(conversation: &mut Conversation, target: Option<MessageId>) -> Result<MessageId> {
    let mut transcripts = target.is_none().then(spawn_stdin_transcripts);
    if transcripts.is_some() {
        conversation.dictation_mut().start_listening()?;
        eprintln!("Listening. Type your question, then end input (Ctrl-D).");
    }

    let mut frames = tokio::time::interval(FRAME_DURATION);
    frames.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut last_progress = String::new();
    let mut target = target;

    loop {
        tokio::select! {
            _ = frames.tick() => {}
            result = tokio::signal::ctrl_c() => {
                result.context("waiting for Ctrl-C")?;
                if !conversation.stop_streaming(Instant::now()) {
                    conversation.stop_speaking();
                    bail!("interrupted");
                }
                eprintln!("Stopped.");
            }
        }

        if let Some(rx) = transcripts.as_mut()
            && drain_transcripts(rx, conversation)
        {
            transcripts = None;
            conversation.stop_dictation(Instant::now());
            if conversation.dictation().auto_submit_at().is_none() {
                bail!("nothing was dictated");
            }
        }

        conversation.tick(Instant::now());

        if target.is_none() && conversation.is_streaming() {
            target = conversation.messages().last().map(|m| m.id());
        }

        if let Some(status) = conversation.in_flight().and_then(|m| m.streaming_status())
            && let Some(line) = render::progress_line(status)
            && line != last_progress
        {
            eprintln!("{line}");
            last_progress = line;
        }

        if let Some(id) = target
            && !conversation.is_streaming()
            && conversation.pending_playback().is_none()
            && !conversation.playback().is_playing()
        {
            return Ok(id);
        }
    }
}

/// Feed pending stdin lines to dictation. Returns true once input has ended.
fn drain_transcripts(
    rx: &mut mpsc::UnboundedReceiver<String>,
    conversation: &mut Conversation,
) -> bool {
    loop {
        match rx.try_recv() {
            Ok(line) => conversation.dictation_mut().on_final(&line),
            Err(mpsc::error::TryRecvError::Empty) => return false,
            Err(mpsc::error::TryRecvError::Disconnected) => return true,
        }
    }
}

fn spawn_stdin_transcripts() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

fn finish(conversation: &Conversation, id: MessageId) -> Result<()> {
    let Some(message) = conversation.message(id) else {
        bail!("answer {id} missing from the conversation");
    };
    if let Some(error) = message.error() {
        bail!("{}", fieldhand_engine::security::sanitize_display_text(error));
    }
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{}", render::final_message(message))?;
    Ok(())
}
