//! Conversation command: one-shot message or interactive loop.
//!
//! The loop also takes slash commands for operating the key pool while
//! chatting.

use std::io::Write;
use std::sync::Arc;

use futures_util::StreamExt;
use munbot_config::Config;
use munbot_core::ReplyStream;
use munbot_dispatch::{Dispatcher, HealthMonitor, apology};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use super::{build_dispatcher, print_stats};

#[derive(Debug, Clone)]
pub struct ChatInput {
    /// Single message to send (non-interactive mode)
    pub message: Option<String>,
    /// Optional model override
    pub model: Option<String>,
}

/// One line typed at the prompt. Key numbers are 1-based, as printed.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ChatCommand {
    Empty,
    Quit,
    ResetAll,
    ResetKey(usize),
    Reload,
    Stats,
    Health,
    Heal(usize),
    Message(String),
    Invalid(String),
}

impl ChatCommand {
    fn parse(line: &str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            return Self::Empty;
        }
        if matches!(line, "exit" | "quit" | "q") {
            return Self::Quit;
        }
        let Some(command) = line.strip_prefix('/') else {
            return Self::Message(line.to_string());
        };

        let mut parts = command.split_whitespace();
        let name = parts.next().unwrap_or_default();
        let arg = parts.next();

        match (name, arg) {
            ("quit" | "exit", None) => Self::Quit,
            ("reset", None) => Self::ResetAll,
            ("reset", Some(n)) => Self::key_number(n).map_or_else(
                || Self::Invalid(format!("Not a key number: {n}")),
                Self::ResetKey,
            ),
            ("reload", None) => Self::Reload,
            ("stats", None) => Self::Stats,
            ("health", None) => Self::Health,
            ("heal", Some(n)) => Self::key_number(n).map_or_else(
                || Self::Invalid(format!("Not a key number: {n}")),
                Self::Heal,
            ),
            _ => Self::Invalid(format!("Unknown command: /{command}")),
        }
    }

    /// 1-based key number to a 0-based slot.
    fn key_number(arg: &str) -> Option<usize> {
        arg.parse::<usize>().ok().and_then(|n| n.checked_sub(1))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ChatStrategy;

impl super::CommandStrategy for ChatStrategy {
    type Input = ChatInput;

    async fn execute(&self, input: Self::Input) -> anyhow::Result<()> {
        let config = Config::load()?;
        info!("Loaded config from ~/munbot/config.json");

        let dispatcher = Arc::new(build_dispatcher(&config, input.model)?);

        if let Some(msg) = input.message {
            let stream = match dispatcher.send(&msg).await {
                Ok(stream) => stream,
                Err(e) => anyhow::bail!(e.user_message()),
            };
            let completed = write_reply(stream, &mut std::io::stdout()).await?;
            println!();
            if !completed {
                anyhow::bail!("Reply was interrupted");
            }
            return Ok(());
        }

        dispatcher.preload().await;
        let monitor =
            HealthMonitor::spawn(&dispatcher, dispatcher.config().health_check_interval());

        let result = run_interactive(&dispatcher).await;
        monitor.stop();
        result
    }
}

async fn run_interactive(dispatcher: &Dispatcher) -> anyhow::Result<()> {
    println!("=== MUN Assistant ({} API keys) ===", dispatcher.key_count());
    println!("Type 'exit', 'quit', or Ctrl+C to end the session.");
    println!("Commands: /reset [N], /reload, /stats, /health, /heal N\n");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut turns = 0_usize;

    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };

        match ChatCommand::parse(&line) {
            ChatCommand::Empty => {}
            ChatCommand::Quit => break,
            ChatCommand::ResetAll => {
                dispatcher.reset_all();
                println!("All chat sessions reset.");
            }
            ChatCommand::ResetKey(slot) => match dispatcher.reset_session(slot) {
                Ok(()) => println!("Chat session for key {} reset.", slot + 1),
                Err(e) => eprintln!("Error: {e}"),
            },
            ChatCommand::Reload => {
                let loaded = dispatcher.reload_preambles().await;
                println!("Reloaded instructions for {loaded} keys.");
            }
            ChatCommand::Stats => print_stats(&dispatcher.stats()),
            ChatCommand::Health => {
                let report = dispatcher.health_check().await;
                println!(
                    "{} healthy, {} failed",
                    report.healthy.len(),
                    report.failed.len()
                );
            }
            ChatCommand::Heal(slot) => match dispatcher.mark_healthy(slot) {
                Ok(()) => println!("Key {} marked healthy.", slot + 1),
                Err(e) => eprintln!("Error: {e}"),
            },
            ChatCommand::Invalid(reason) => eprintln!("{reason}"),
            ChatCommand::Message(text) => {
                stream_reply(dispatcher, &text).await?;
                turns += 1;
            }
        }
    }

    println!("\nSession ended. Total turns: {turns}");
    Ok(())
}

/// Print the reply for one message. Dispatch failures are shown as the
/// assistant's apology rather than ending the loop.
async fn stream_reply(dispatcher: &Dispatcher, text: &str) -> anyhow::Result<()> {
    let stream = match dispatcher.send(text).await {
        Ok(stream) => stream,
        Err(e) => {
            println!("\n{}\n", e.user_message());
            return Ok(());
        }
    };

    println!();
    write_reply(stream, &mut std::io::stdout()).await?;
    println!("\n");
    Ok(())
}

/// Write fragments as they arrive. A reply that breaks off mid-stream ends
/// with the apology text. Returns whether the reply completed.
async fn write_reply<W: Write>(mut stream: ReplyStream, out: &mut W) -> std::io::Result<bool> {
    while let Some(fragment) = stream.next().await {
        match fragment {
            Ok(text) => {
                write!(out, "{text}")?;
                out.flush()?;
            }
            Err(e) => {
                warn!("Reply stream interrupted: {e}");
                write!(out, "\n{}", apology(&e))?;
                out.flush()?;
                return Ok(false);
            }
        }
    }
    Ok(true)
}
