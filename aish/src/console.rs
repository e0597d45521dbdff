//! Console hosting loop.
//!
//! Shows what wrapped sessions announce and relay, and reads operator
//! commands from stdin. `<id> <text>` types `text` followed by a carriage
//! return into session `id`.

use aish_core::{SessionContext, SessionId, SessionRegistry};
use aish_shell::{ConsoleEvent, ConsoleServer};
use miette::{IntoDiagnostic, Result, WrapErr, miette};
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, warn};

const HELP: &str = "Commands:\n  list           show wrapped sessions\n  <id> <text>    type text into a session\n  help           show this message\n  quit           stop the console\n";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    List,
    Inject { id: SessionId, text: String },
    Help,
    Quit,
}

/// Parse one line of operator input. Blank lines yield `None`.
pub fn parse_command(line: &str) -> Result<Option<ConsoleCommand>, String> {
    let line = line.trim_end_matches(['\r', '\n']);
    let trimmed = line.trim_start();
    if trimmed.is_empty() {
        return Ok(None);
    }

    let (head, rest) = trimmed.split_once(' ').unwrap_or((trimmed, ""));
    let command = match head {
        "list" => ConsoleCommand::List,
        "help" => ConsoleCommand::Help,
        "quit" | "exit" => ConsoleCommand::Quit,
        id => {
            let id = id
                .parse()
                .map_err(|_| format!("unknown command '{id}', try 'help'"))?;
            ConsoleCommand::Inject {
                id,
                text: rest.to_string(),
            }
        }
    };
    Ok(Some(command))
}

/// Render a console event for the operator.
pub fn format_event(event: &ConsoleEvent) -> String {
    match event {
        ConsoleEvent::Announced { id, command_line } => {
            format!("[{id}] wrapped: {command_line}\n")
        }
        ConsoleEvent::Output { id, data } => String::from_utf8_lossy(data)
            .split_inclusive('\n')
            .map(|line| {
                if line.ends_with('\n') {
                    format!("[{id}] {line}")
                } else {
                    format!("[{id}] {line}\n")
                }
            })
            .collect(),
        ConsoleEvent::Disconnected { id } => format!("[{id}] disconnected\n"),
    }
}

fn format_list(registry: &SessionRegistry) -> String {
    let sessions = registry.list();
    if sessions.is_empty() {
        return "No wrapped sessions\n".to_string();
    }
    sessions
        .iter()
        .map(|(id, command_line)| format!("[{id}] {command_line}\n"))
        .collect()
}

pub async fn run(ctx: Arc<SessionContext>, socket: &Path) -> Result<()> {
    let registry = ctx
        .registry()
        .cloned()
        .ok_or_else(|| miette!("The console needs a session registry"))?;

    let server = ConsoleServer::bind(socket, Arc::clone(&registry))
        .into_diagnostic()
        .wrap_err("Failed to start the console")?;
    ctx.print(&format!(
        "Console listening at {}. Type 'help' for commands.\n",
        server.path().display()
    ));

    let (events_tx, mut events) = mpsc::channel(64);
    let token = ctx.shutdown().child_token();
    let server_task = tokio::spawn(async move { server.run(token, events_tx).await });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = ctx.shutdown().wait_for_shutdown() => break,
            event = events.recv() => match event {
                Some(event) => ctx.print(&format_event(&event)),
                None => break,
            },
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if !handle_line(&ctx, &registry, &line).await {
                        break;
                    }
                }
                Ok(None) => {
                    debug!("stdin closed");
                    break;
                }
                Err(e) => {
                    warn!("failed to read stdin: {}", e);
                    break;
                }
            },
        }
    }

    ctx.cancel();
    match server_task.await {
        Ok(result) => result
            .into_diagnostic()
            .wrap_err("Console server failed"),
        Err(e) => Err(miette!("Console server panicked: {e}")),
    }
}

/// Returns `false` when the console should stop.
async fn handle_line(ctx: &SessionContext, registry: &SessionRegistry, line: &str) -> bool {
    match parse_command(line) {
        Ok(None) => {}
        Ok(Some(ConsoleCommand::List)) => ctx.print(&format_list(registry)),
        Ok(Some(ConsoleCommand::Help)) => ctx.print(HELP),
        Ok(Some(ConsoleCommand::Quit)) => return false,
        Ok(Some(ConsoleCommand::Inject { id, text })) => {
            let mut data = text.into_bytes();
            data.push(b'\r');
            if let Err(e) = registry.inject(id, data).await {
                ctx.print_error(&e, None);
            }
        }
        Err(message) => ctx.print(&format!("{message}\n")),
    }
    true
}
