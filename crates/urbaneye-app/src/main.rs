//! UrbanEye assistant binary - composition root.
//!
//! Ties the assistant crates into a terminal chat:
//! 1. Parse CLI flags and load configuration from TOML
//! 2. Build the generation provider (Gemini, or a local echo with --offline)
//! 3. Build the report source against the UrbanEye backend
//! 4. Start the session for the signed-in user and render its snapshots
//! 5. Read commands and messages from stdin

mod cli;

use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;

use urbaneye_assistant::{
    AssistantPanel, ConversationSession, GeminiConfig, GeminiProvider, GenerationProvider,
    HttpReportSource, MessageId, MessageState, Role, ScriptedProvider, SessionConfig,
    SessionSnapshot, VoiceBridge, VoiceToggle,
};
use urbaneye_core::UrbanEyeConfig;

use crate::cli::CliArgs;

const HELP: &str = "\
Commands:
  /voice        start or stop voice input
  /locale       switch the voice input language
  /suggest [n]  list starter questions, or ask number n
  /speak <id>   read an assistant reply aloud
  /remaining    messages left in the current minute
  /reset        start a new conversation
  /quit         exit
Anything else is sent to the assistant.";

/// Terminal state carried between snapshots.
#[derive(Default)]
struct Renderer {
    /// Bytes of each assistant message already printed; `usize::MAX` once finished.
    printed: HashMap<MessageId, usize>,
    last_error: Option<String>,
}

/// Print assistant text as it streams in, and session errors as they appear.
async fn render_loop(panel: AssistantPanel) {
    let mut rx = panel.subscribe();
    let mut renderer = Renderer::default();

    loop {
        let snapshot = match rx.recv().await {
            Ok(snapshot) => snapshot,
            Err(RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "Renderer lagged behind session updates");
                continue;
            }
            Err(RecvError::Closed) => return,
        };
        renderer.render(&snapshot, &mut std::io::stdout().lock());
    }
}

impl Renderer {
    fn render(&mut self, snapshot: &SessionSnapshot, out: &mut impl Write) {
        let printed = &mut self.printed;
        for message in snapshot
            .messages
            .iter()
            .filter(|m| m.role == Role::Assistant && m.state != MessageState::Pending)
        {
            let done = printed.entry(message.id).or_insert(0);
            if *done == usize::MAX {
                continue;
            }
            if *done == 0 && !message.text.is_empty() {
                let _ = write!(out, "assistant #{}: ", message.id);
            }
            if let Some(delta) = message.text.get(*done..) {
                let _ = write!(out, "{}", delta);
                *done = message.text.len();
            }
            if message.state == MessageState::Complete {
                let _ = writeln!(out);
                *done = usize::MAX;
            }
        }

        // A failed reply vanishes from the history; end its partial line.
        for (id, done) in printed.iter_mut() {
            if *done != usize::MAX && !snapshot.messages.iter().any(|m| m.id == *id) {
                if *done > 0 {
                    let _ = writeln!(out);
                }
                *done = usize::MAX;
            }
        }

        if snapshot.error != self.last_error {
            if let Some(error) = &snapshot.error {
                let _ = writeln!(out, "error: {}", error);
            }
            self.last_error = snapshot.error.clone();
        }
        let _ = out.flush();
    }
}

async fn handle_command(panel: &AssistantPanel, line: &str) -> bool {
    let mut parts = line.splitn(2, ' ');
    let command = parts.next().unwrap_or_default();
    let argument = parts.next().unwrap_or_default().trim();

    // Failures are surfaced into the session and printed by the render loop.
    panel.session().clear_error();

    match command {
        "/quit" | "/exit" => return false,
        "/help" => println!("{}", HELP),
        "/voice" => match panel.toggle_voice_input() {
            Ok(VoiceToggle::Listening(handle)) => {
                println!("listening ({})...", panel.voice().locale());
                if let Ok(Some(text)) = handle.await {
                    println!("heard: {}", text);
                    if let Err(e) = panel.send_composed().await {
                        tracing::debug!(error = %e, "Voice message not sent");
                    }
                }
            }
            Ok(VoiceToggle::Stopped) => println!("voice input stopped"),
            Err(e) => tracing::debug!(error = %e, "Voice input unavailable"),
        },
        "/locale" => println!("voice input language: {}", panel.toggle_locale()),
        "/speak" => match argument.parse::<u64>() {
            Ok(id) => {
                if let Err(e) = panel.speak(MessageId(id)).await {
                    tracing::debug!(error = %e, "Speech failed");
                }
            }
            Err(_) => println!("usage: /speak <id>"),
        },
        "/remaining" => println!(
            "{} message(s) left this minute",
            panel.session().remaining()
        ),
        "/suggest" if argument.is_empty() => {
            let actions = panel.quick_actions();
            if actions.is_empty() {
                println!("suggestions are shown only before the conversation starts (try /reset)");
            }
            for (i, prompt) in actions.iter().enumerate() {
                println!("  {}. {}", i + 1, prompt);
            }
        }
        "/suggest" => match argument.parse::<usize>() {
            Ok(n) if n >= 1 => {
                if let Err(e) = panel.send_quick_action(n - 1).await {
                    tracing::debug!(error = %e, "Suggestion not sent");
                }
            }
            _ => println!("usage: /suggest [n]"),
        },
        "/reset" => match panel.reset() {
            Ok(()) => println!("conversation cleared"),
            Err(e) => tracing::debug!(error = %e, "Reset rejected"),
        },
        other => println!("unknown command {} (try /help)", other),
    }
    true
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Config.
    let config_file = args.resolve_config_path();
    let mut config = UrbanEyeConfig::load_or_default(&config_file);
    args.apply_overrides(&mut config);

    // Tracing.
    let log_level = args.resolve_log_level(&config);
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("Starting UrbanEye assistant v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(path = %config_file.display(), "Configuration loaded");

    // Generation provider.
    let provider: Arc<dyn GenerationProvider> = if args.offline {
        tracing::info!("Offline mode: replies are echoed locally");
        Arc::new(ScriptedProvider::echo().with_chunk_delay(Duration::from_millis(40)))
    } else {
        let gemini = GeminiProvider::new(GeminiConfig::from_assistant_config(&config.assistant))?;
        if !gemini.is_configured() {
            tracing::warn!(
                env = %config.assistant.api_key_env,
                "Gemini API key not set; replies will fail until it is configured"
            );
        }
        Arc::new(gemini)
    };

    // Report source.
    let token = args.resolve_token();
    if token.is_none() {
        tracing::info!("No backend token; the assistant will run without live report data");
    }
    let reports = Arc::new(HttpReportSource::new(&config.reports, token)?);

    // Session and panel.
    let session = ConversationSession::start(
        provider,
        reports,
        SessionConfig::from(&config.assistant),
        args.identity(),
    )
    .await;
    let panel = AssistantPanel::new(session, VoiceBridge::unsupported(config.voice.clone()));

    tokio::spawn(render_loop(panel.clone()));

    println!("UrbanEye assistant. Type a question, or /help for commands.");
    println!("Try one of these (/suggest <n>):");
    for (i, prompt) in panel.quick_actions().iter().enumerate() {
        println!("  {}. {}", i + 1, prompt);
    }
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else { break };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if line.starts_with('/') {
            if !handle_command(&panel, line).await {
                break;
            }
        } else {
            // Errors are printed by the render loop from the session state.
            panel.session().clear_error();
            if let Err(e) = panel.send(line).await {
                tracing::debug!(error = %e, "Message not sent");
            }
        }
    }

    tracing::info!("UrbanEye assistant exiting");
    Ok(())
}
