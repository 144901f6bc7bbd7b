//! `nlx` — interactive conversational shell for the Neuralux assistant.
//!
//! The shell is presentation only: it reads lines, routes slash commands,
//! renders responses, and walks the user through the approval gate. All
//! conversational logic lives in `nlx-handler`.

use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::warn;

use nlx_bus::{LocalBus, MessageBus, RemoteBus};
use nlx_core::config::BusMode;
use nlx_core::{default_session_id, NlxConfig};
use nlx_handler::{ConversationHandler, HandlerResponse, ResponseKind};
use nlx_sessions::SessionStore;

#[derive(Parser)]
#[command(name = "nlx", about = "Neuralux conversational assistant shell")]
struct Cli {
    /// Path to neuralux.toml (default: ~/.config/neuralux/neuralux.toml)
    #[arg(long)]
    config: Option<String>,

    /// Session id (default: user@host)
    #[arg(long)]
    session: Option<String>,

    /// Connect to a remote bus at this address instead of the configured one
    #[arg(long)]
    bus_url: Option<String>,

    /// Execute side-effecting actions without asking (use with caution)
    #[arg(long)]
    auto_approve: bool,

    /// Keep the session in memory only (nothing written to disk)
    #[arg(long)]
    ephemeral: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "nlx_shell=info,nlx_handler=info,nlx_planner=warn".into()),
        )
        .init();

    let cli = Cli::parse();

    let mut config = NlxConfig::load(cli.config.as_deref()).unwrap_or_else(|e| {
        warn!("Config load failed ({e}), using defaults");
        NlxConfig::default()
    });
    if let Some(url) = &cli.bus_url {
        config.bus.mode = BusMode::Remote;
        config.bus.url = url.clone();
    }

    let bus: Arc<dyn MessageBus> = match config.bus.mode {
        BusMode::Remote => Arc::new(
            RemoteBus::connect(&config.bus.url, config.bus.max_reconnect_attempts).await?,
        ),
        BusMode::Local => Arc::new(LocalBus::new()),
    };

    let store = Arc::new(if cli.ephemeral {
        SessionStore::in_memory(config.session.ttl_secs)?
    } else {
        SessionStore::open(&config.database.path, config.session.ttl_secs)?
    });

    let session_id = cli.session.unwrap_or_else(default_session_id);
    let user_id = session_id
        .split('@')
        .next()
        .unwrap_or("default")
        .to_string();

    let mut handler = ConversationHandler::new(
        bus.clone(),
        store.clone(),
        session_id.as_str(),
        user_id.as_str(),
        &config,
    );

    println!("Neuralux shell — session {session_id}");
    println!("Type /help for commands, exit to quit.");

    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();
    let mut stdout = tokio::io::stdout();

    loop {
        stdout.write_all(b"\nyou> ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("quit") {
            break;
        }
        if input.starts_with('/') {
            handle_slash_command(input, &mut handler, &store, &user_id, &config);
            continue;
        }

        let response = handler.process_message(input, cli.auto_approve).await;
        match response.kind {
            ResponseKind::NeedsApproval => {
                approval_flow(response, &mut handler, &mut lines, &mut stdout).await?;
            }
            _ => render_response(&response),
        }
    }

    bus.disconnect().await.ok();
    Ok(())
}

fn handle_slash_command(
    input: &str,
    handler: &mut ConversationHandler,
    store: &Arc<SessionStore>,
    user_id: &str,
    config: &NlxConfig,
) {
    let mut parts = input.split_whitespace();
    match parts.next().unwrap_or("") {
        "/help" => {
            println!("Commands:");
            println!("  /reset        - archive and clear the conversation");
            println!("  /history      - show conversation history");
            println!("  /context      - show context variables");
            println!("  /archives     - list archived conversations");
            println!("  /tts on|off   - toggle spoken responses");
            println!("  exit          - quit");
        }
        "/tts" => {
            let settings_path = std::path::PathBuf::from(&config.session.settings_path);
            let mut settings = nlx_sessions::settings::load_settings(&settings_path);
            let enabled = match parts.next() {
                Some("on") => true,
                Some("off") => false,
                _ => {
                    let current = settings
                        .get("tts_enabled")
                        .and_then(serde_json::Value::as_bool)
                        .unwrap_or(false);
                    println!("TTS is {}", if current { "on" } else { "off" });
                    return;
                }
            };
            settings.insert("tts_enabled".into(), serde_json::Value::Bool(enabled));
            nlx_sessions::settings::save_settings(&settings_path, &settings);
            println!("TTS {}", if enabled { "enabled" } else { "disabled" });
        }
        "/reset" => {
            handler.reset_conversation();
            println!("Conversation reset (previous one archived).");
        }
        "/history" => {
            for turn in handler.conversation_history(Some(20)) {
                println!("[{}] {}", turn.role, turn.content);
            }
        }
        "/context" => {
            let summary = handler.context_summary();
            println!("{}", serde_json::to_string_pretty(&summary).unwrap_or_default());
        }
        "/archives" => {
            let archives = store.list_archives(user_id, 0, 10);
            if archives.is_empty() {
                println!("No archived conversations.");
            }
            for archive in archives {
                println!("{}  {}", archive.id, archive.title);
            }
        }
        other => println!("Unknown command: {other} (try /help)"),
    }
}

fn render_response(response: &HandlerResponse) {
    match response.kind {
        ResponseKind::Error => println!("error: {}", response.message),
        ResponseKind::PartialSuccess => println!("partial: {}", response.message),
        _ => println!("{}", response.message),
    }
    for action in &response.actions {
        let mark = if action.success { "ok" } else { "FAILED" };
        let label = if action.description.is_empty() {
            &action.action_type
        } else {
            &action.description
        };
        println!("  [{mark}] {label}");
        if let Some(error) = &action.error {
            println!("        {error}");
        }
    }
}

/// Show the planned actions and ask for consent: `y` approves all, a
/// comma-separated list approves a subset, anything else cancels.
async fn approval_flow(
    response: HandlerResponse,
    handler: &mut ConversationHandler,
    lines: &mut tokio::io::Lines<BufReader<tokio::io::Stdin>>,
    stdout: &mut tokio::io::Stdout,
) -> anyhow::Result<()> {
    println!("{}", response.message);
    println!("Planned actions:");
    for (i, action) in response.actions.iter().enumerate() {
        println!("  {}. {}", i + 1, action.description);
    }

    stdout
        .write_all(b"Approve? [y/N/numbers] ")
        .await?;
    stdout.flush().await?;

    let answer = lines.next_line().await?.unwrap_or_default();
    let answer = answer.trim().to_lowercase();
    let pending = response.pending_actions.unwrap_or_default();

    let result = if answer == "y" || answer == "yes" {
        handler.approve_and_execute(pending, None).await
    } else {
        let indices: Vec<usize> = answer
            .split(',')
            .filter_map(|part| part.trim().parse::<usize>().ok())
            .filter(|&n| n >= 1)
            .map(|n| n - 1)
            .collect();
        if indices.is_empty() {
            println!("Cancelled.");
            return Ok(());
        }
        handler.approve_and_execute(pending, Some(&indices)).await
    };

    render_response(&result);
    Ok(())
}
