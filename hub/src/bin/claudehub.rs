// claudehub: CLI for the local host daemon
//
// Commands:
//   claudehub projects | sessions [--project <id>]
//   claudehub add-project <name> <path> [--category <c>] [--icon <icon>]
//   claudehub new <project-id> <name> | rename <id> <name> | complete <id> [--undo]
//   claudehub waiting <id> <on|off> | touch <id> | delete <id> | ping | shutdown

use anyhow::{anyhow, bail, Result};
use claudehub_lib::config::Config;
use claudehub_lib::control::client::send_request;
use claudehub_lib::control::{ControlRequest, ControlResponse};
use claudehub_lib::registry::models::{ProjectCategory, ProjectRecord, SessionRecord};
use std::env;

fn print_help() {
    println!(
        r#"claudehub - manage the ClaudeHub registry through the local daemon

USAGE:
    claudehub <COMMAND> [OPTIONS]

COMMANDS:
    projects                          List projects
    sessions [--project <id>]         List sessions
    add-project <name> <path>         Register a project folder
    remove-project <id>               Forget a project (its sessions stay)
    new <project-id> <name>           Create a session
    rename <id> <name>                Rename a session
    complete <id> [--undo]            Mark a session completed
    summary <id> [text]               Set the summary; no text clears it
    log-saved <id> <file>             Record that a session log was written
    waiting <id> <on|off>             Set the waiting-for-input flag
    touch <id>                        Mark a session as just viewed
    delete <id>                       Delete a session
    foreground <on|off>               Tell the daemon whether the hub app is in front
    ping                              Check that the daemon answers
    shutdown                          Stop the daemon
    help                              Show this help message

OPTIONS:
    --category <primary|client|development>   Category for add-project
    --icon <icon>                             Icon for add-project
    --json                                    Print the raw response as JSON

ENVIRONMENT:
    CLAUDEHUB_DIR             State directory holding the daemon socket
"#
    );
}

/// Parsed command line: positional words plus the options every command shares
#[derive(Debug, Default)]
struct Args {
    words: Vec<String>,
    project: Option<String>,
    category: Option<ProjectCategory>,
    icon: Option<String>,
    undo: bool,
    json: bool,
}

fn parse_args(raw: &[String]) -> Result<Args> {
    let mut args = Args::default();
    let mut i = 0;
    while i < raw.len() {
        match raw[i].as_str() {
            "--project" => {
                i += 1;
                args.project = Some(raw.get(i).ok_or_else(|| anyhow!("--project needs an id"))?.clone());
            }
            "--category" => {
                i += 1;
                let value = raw.get(i).ok_or_else(|| anyhow!("--category needs a value"))?;
                args.category = Some(value.parse().map_err(|e: String| anyhow!(e))?);
            }
            "--icon" => {
                i += 1;
                args.icon = Some(raw.get(i).ok_or_else(|| anyhow!("--icon needs a value"))?.clone());
            }
            "--undo" => args.undo = true,
            "--json" => args.json = true,
            word => args.words.push(word.to_string()),
        }
        i += 1;
    }
    Ok(args)
}

fn on_off(value: Option<&String>) -> Result<bool> {
    match value.map(String::as_str) {
        Some("on") | Some("true") | Some("yes") => Ok(true),
        Some("off") | Some("false") | Some("no") => Ok(false),
        other => bail!("Expected on or off, got {:?}", other),
    }
}

/// Positional word `index`, or a usage error naming it
fn word(args: &Args, index: usize, name: &str) -> Result<String> {
    args.words
        .get(index)
        .cloned()
        .ok_or_else(|| anyhow!("Missing <{}>; see `claudehub help`", name))
}

/// Words from `index` on, joined; lets names go unquoted
fn rest(args: &Args, index: usize) -> Option<String> {
    let words = args.words.get(index..)?;
    if words.is_empty() {
        None
    } else {
        Some(words.join(" "))
    }
}

fn build_request(args: &Args) -> Result<Option<ControlRequest>> {
    let Some(command) = args.words.first() else {
        return Ok(None);
    };

    let request = match command.as_str() {
        "help" => return Ok(None),
        "ping" => ControlRequest::Ping,
        "shutdown" => ControlRequest::Shutdown,
        "projects" => ControlRequest::ListProjects,
        "sessions" => ControlRequest::ListSessions {
            project_id: args.project.clone(),
        },
        "add-project" => ControlRequest::AddProject {
            name: word(args, 1, "name")?,
            path: word(args, 2, "path")?,
            icon: args.icon.clone().unwrap_or_default(),
            category: args.category.unwrap_or_default(),
        },
        "remove-project" => ControlRequest::RemoveProject {
            project_id: word(args, 1, "id")?,
        },
        "new" => ControlRequest::CreateSession {
            project_id: word(args, 1, "project-id")?,
            name: rest(args, 2).ok_or_else(|| anyhow!("Missing <name>"))?,
        },
        "rename" => ControlRequest::RenameSession {
            session_id: word(args, 1, "id")?,
            name: rest(args, 2).ok_or_else(|| anyhow!("Missing <name>"))?,
        },
        "complete" => ControlRequest::SetCompleted {
            session_id: word(args, 1, "id")?,
            completed: !args.undo,
        },
        "summary" => ControlRequest::SetSummary {
            session_id: word(args, 1, "id")?,
            summary: rest(args, 2),
        },
        "log-saved" => ControlRequest::RecordLogSaved {
            session_id: word(args, 1, "id")?,
            log_file: word(args, 2, "file")?,
        },
        "waiting" => ControlRequest::SetWaiting {
            session_id: word(args, 1, "id")?,
            waiting: on_off(args.words.get(2))?,
        },
        "touch" => ControlRequest::TouchSession {
            session_id: word(args, 1, "id")?,
        },
        "delete" => ControlRequest::DeleteSession {
            session_id: word(args, 1, "id")?,
        },
        "foreground" => ControlRequest::SetForeground {
            foreground: on_off(args.words.get(1))?,
        },
        other => bail!("Unknown command: {}", other),
    };
    Ok(Some(request))
}

fn print_project(project: &ProjectRecord) {
    println!(
        "{}  {:<24} {:<12} {}",
        project.id, project.name, project.category, project.path
    );
}

fn print_session(session: &SessionRecord) {
    let mut flags = Vec::new();
    if session.waiting_for_input {
        flags.push("waiting");
    }
    if session.is_completed {
        flags.push("done");
    }
    println!(
        "{}  {:<32} {}",
        session.id,
        session.name,
        flags.join(",")
    );
}

fn print_response(response: &ControlResponse) -> Result<()> {
    match response {
        ControlResponse::Projects { projects } => {
            if projects.is_empty() {
                println!("No projects");
            }
            projects.iter().for_each(print_project);
        }
        ControlResponse::Sessions { sessions } => {
            if sessions.is_empty() {
                println!("No sessions");
            }
            sessions.iter().for_each(print_session);
        }
        ControlResponse::Project { project } => print_project(project),
        ControlResponse::Session { session } => print_session(session),
        ControlResponse::Waiting { changed } => {
            println!("{}", if *changed { "Updated" } else { "Unchanged" });
        }
        ControlResponse::Pong => println!("Daemon is running"),
        ControlResponse::ShuttingDown => println!("Daemon shutting down"),
        ControlResponse::Ok | ControlResponse::Handshake { .. } => println!("OK"),
        ControlResponse::Error { code, message } => {
            bail!("{} ({:?})", message, code);
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let raw: Vec<String> = env::args().skip(1).collect();
    if raw.iter().any(|a| a == "--help" || a == "-h") {
        print_help();
        return Ok(());
    }

    let args = parse_args(&raw)?;
    let Some(request) = build_request(&args)? else {
        print_help();
        return Ok(());
    };

    let config = Config::from_env();
    let response = send_request(&config, request)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&response)?);
        if let ControlResponse::Error { .. } = response {
            std::process::exit(1);
        }
        return Ok(());
    }
    print_response(&response)
}
