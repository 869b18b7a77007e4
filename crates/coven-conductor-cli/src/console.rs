// ABOUTME: Console commands for driving the conductor from a terminal.
// ABOUTME: Parses one line at a time; anything that is not a command is sent as a prompt.

use anyhow::{Context, Result};
use coven_conductor::{Conductor, ConductorError, ProjectState};
use std::fmt::Write as _;
use std::io::Write as _;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

/// One parsed console line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Make a project current: switch <path>
    Switch(PathBuf),
    /// Show the current project
    Current,
    /// List registered projects
    Projects,
    /// Start a session in the current project: new [title]
    New(Option<String>),
    /// List the current project's sessions
    Sessions,
    /// Point the current project at an existing session: use <id>
    Use(String),
    /// Send a prompt: prompt <text>, or any line that is not a command
    Prompt(String),
    /// Delete a session: delete <id>
    Delete(String),
    /// Abort the current session's work
    Abort,
    /// Close a non-current project: close <path>
    Close(PathBuf),
    Reconnect,
    Status,
    Help,
    Quit,
    /// A command missing its argument, with usage text
    Unknown(String),
}

impl Command {
    /// Parse a console line. Blank lines yield `None`.
    pub fn parse(line: &str) -> Option<Command> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };
        let arg = (!rest.is_empty()).then(|| rest.to_string());

        let command = match word {
            "switch" => match arg {
                Some(path) => Command::Switch(expand_path(&path)),
                None => Command::Unknown("switch (requires a path, e.g. switch ~/src/app)".into()),
            },
            "current" => Command::Current,
            "projects" => Command::Projects,
            "new" => Command::New(arg),
            "sessions" => Command::Sessions,
            "use" => match arg {
                Some(id) => Command::Use(id),
                None => Command::Unknown("use (requires a session id)".into()),
            },
            "prompt" => match arg {
                Some(text) => Command::Prompt(text),
                None => Command::Unknown("prompt (requires text)".into()),
            },
            "delete" => match arg {
                Some(id) => Command::Delete(id),
                None => Command::Unknown("delete (requires a session id)".into()),
            },
            "abort" => Command::Abort,
            "close" => match arg {
                Some(path) => Command::Close(expand_path(&path)),
                None => Command::Unknown("close (requires a path)".into()),
            },
            "reconnect" => Command::Reconnect,
            "status" => Command::Status,
            "help" | "?" => Command::Help,
            "quit" | "exit" => Command::Quit,
            _ => Command::Prompt(line.to_string()),
        };
        Some(command)
    }
}

/// Expand `~` and make relative paths absolute against the working directory.
fn expand_path(raw: &str) -> PathBuf {
    let expanded = match raw.strip_prefix('~') {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => dirs::home_dir()
            .map(|home| home.join(rest.trim_start_matches('/')))
            .unwrap_or_else(|| PathBuf::from(raw)),
        _ => PathBuf::from(raw),
    };
    if expanded.is_absolute() {
        expanded
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(&expanded))
            .unwrap_or(expanded)
    }
}

pub const HELP: &str = "\
Commands:
  switch <path>    make a project current (starts its tool server)
  current          show the current project
  projects         list registered projects
  new [title]      start a session in the current project
  sessions         list sessions in the current project
  use <id>         continue an existing session
  prompt <text>    send a prompt (any other line is sent as a prompt too)
  delete <id>      delete a session
  abort            stop the current session's work
  close <path>     close a project that is not current
  reconnect        reconnect to the agent backend
  status           connection, project, and tool server status
  help             show this help
  quit             tear everything down and exit";

/// Run a command and return the text to print.
pub async fn execute(command: Command, conductor: &Conductor) -> Result<String> {
    match command {
        Command::Switch(path) => {
            let project = conductor.switch_project(&path).await?;
            let server = conductor.servers().server(&project.id).await;
            let mut out = format!("Switched to {} ({})", project.name, project.directory.display());
            if let Some(server) = server {
                let _ = write!(out, "\nTool server on port {}", server.port);
            }
            if let Some(session) = conductor.sessions().current_session().await {
                let _ = write!(out, "\nSession: {} {}", session.id, session.title);
            }
            Ok(out)
        }

        Command::Current => {
            let project = conductor.current_project().await?;
            let mut out = format!("{} ({})", project.name, project.directory.display());
            if let Some(session) = conductor.sessions().current_session().await {
                let _ = write!(out, "\nSession: {} {}", session.id, session.title);
            }
            Ok(out)
        }

        Command::Projects => {
            let projects = conductor.projects().list().await;
            if projects.is_empty() {
                return Ok("No projects. Use `switch <path>` to open one.".to_string());
            }
            let mut out = String::new();
            for project in projects {
                let marker = match conductor.projects().state_of(&project.directory).await {
                    ProjectState::Current => "*",
                    _ => " ",
                };
                let port = conductor
                    .servers()
                    .server(&project.id)
                    .await
                    .map(|s| s.port.to_string())
                    .unwrap_or_else(|| "-".to_string());
                let _ = writeln!(
                    out,
                    "{} {} ({}) port {}",
                    marker,
                    project.name,
                    project.directory.display(),
                    port
                );
            }
            Ok(out.trim_end().to_string())
        }

        Command::New(title) => {
            let session = conductor.create_session(title.as_deref()).await?;
            Ok(format!("Started session {} {}", session.id, session.title))
        }

        Command::Sessions => {
            let sessions = conductor.list_sessions().await?;
            if sessions.is_empty() {
                return Ok("No sessions. Use `new [title]` to start one.".to_string());
            }
            let current = conductor.sessions().current_session().await.map(|s| s.id);
            let mut out = String::new();
            for session in sessions {
                let marker = if current.as_deref() == Some(session.id.as_str()) {
                    "*"
                } else {
                    " "
                };
                let _ = writeln!(
                    out,
                    "{} {}  {}  {}",
                    marker,
                    session.id,
                    session.created_at.format("%Y-%m-%d %H:%M"),
                    session.title
                );
            }
            Ok(out.trim_end().to_string())
        }

        Command::Use(id) => {
            let session = conductor.sessions().select_session(&id).await?;
            Ok(format!("Using session {} {}", session.id, session.title))
        }

        Command::Prompt(text) => {
            let reply = match conductor.prompt(&text, None, &[]).await {
                Err(ConductorError::NoActiveSession) => {
                    // First prompt in a project starts a session.
                    conductor.create_session(None).await?;
                    conductor.prompt(&text, None, &[]).await?
                }
                other => other?,
            };
            if reply.is_empty() {
                Ok("(no text in reply)".to_string())
            } else {
                Ok(reply)
            }
        }

        Command::Delete(id) => {
            conductor.sessions().delete_session(&id).await?;
            Ok(format!("Deleted session {}", id))
        }

        Command::Abort => {
            conductor.sessions().abort(None).await?;
            Ok("Aborted".to_string())
        }

        Command::Close(path) => {
            conductor.close_project(&path).await?;
            Ok(format!("Closed {}", path.display()))
        }

        Command::Reconnect => {
            let outcome = match conductor.connection().reconnect().await {
                Err(ConductorError::NoPriorConnection) => conductor.connect().await?,
                other => other?,
            };
            if let coven_conductor::ConnectOutcome::ProbeRejected { reason } = outcome {
                Ok(format!("Connected with warning: {}", reason))
            } else {
                Ok("Connected".to_string())
            }
        }

        Command::Status => Ok(status(conductor).await),

        Command::Help => Ok(HELP.to_string()),

        Command::Quit => Ok(String::new()),

        Command::Unknown(usage) => Ok(format!("Usage: {}", usage)),
    }
}

async fn status(conductor: &Conductor) -> String {
    let connection = conductor.connection();
    let mut out = match connection.address() {
        Some(address) => format!("Backend: {:?} at {}", connection.state(), address),
        None => format!(
            "Backend: {:?} (configured {})",
            connection.state(),
            conductor.config().backend.url
        ),
    };

    match conductor.current_project().await {
        Ok(project) => {
            let _ = write!(out, "\nProject: {}", project.directory.display());
        }
        Err(_) => out.push_str("\nProject: none"),
    }
    if let Some(session) = conductor.sessions().current_session().await {
        let _ = write!(out, "\nSession: {} {}", session.id, session.title);
    }

    let pool = conductor.servers().pool();
    let range = pool.range();
    let _ = write!(
        out,
        "\nPorts: {} of {}-{} in use",
        pool.leased().len(),
        range.start(),
        range.end()
    );
    for server in conductor.servers().servers().await {
        let _ = write!(
            out,
            "\n  {} {:?} port {} pid {}",
            server.project,
            server.state,
            server.port,
            server.pid.map(|p| p.to_string()).unwrap_or_else(|| "-".into())
        );
    }
    out
}

/// Read commands from stdin until quit, end of input, or Ctrl-C.
pub async fn run(conductor: &Conductor) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    println!("Type `help` for commands.");

    loop {
        print!("> ");
        std::io::stdout().flush().context("Failed to flush stdout")?;

        let line = tokio::select! {
            line = lines.next_line() => line.context("Failed to read stdin")?,
            _ = tokio::signal::ctrl_c() => {
                println!();
                info!("Interrupted");
                break;
            }
        };
        let Some(line) = line else {
            break;
        };
        let Some(command) = Command::parse(&line) else {
            continue;
        };
        if command == Command::Quit {
            break;
        }

        tokio::select! {
            result = execute(command, conductor) => match result {
                Ok(out) if out.is_empty() => {}
                Ok(out) => println!("{}", out),
                Err(e) => eprintln!("Error: {:#}", e),
            },
            _ = tokio::signal::ctrl_c() => {
                // Dropping the request does not stop the backend; ask it to.
                match conductor.sessions().abort(None).await {
                    Ok(()) => println!("\nInterrupted, session aborted"),
                    Err(e) => println!("\nInterrupted ({})", e),
                }
            }
        }
    }

    Ok(())
}
