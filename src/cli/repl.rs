//! Line-oriented interactive chat driver.
//!
//! Reads intents from stdin and drains pipeline events concurrently, so a
//! reply keeps streaming while the user types. All chat semantics live in
//! [`ChatApp`]; this loop only translates lines into intents and prints
//! what the store reports back.

use std::error::Error;
use std::io::{self, Write};

use tokio::io::{AsyncBufReadExt, BufReader};

use crate::core::app::{AppContext, ChatApp, Intent};
use crate::core::chat_stream::{ChatStreamService, StreamEvent, StreamTag};

const HELP: &str = "\
Commands:
  /new                start a fresh session
  /sessions           list sessions, most recent first
  /open <n>           switch to session <n> from the list
  /delete <n>         delete session <n> (cancels its reply if streaming)
  /personas           list the available personas
  /persona <id>       switch the active persona
  /key <id> [key]     set (or clear) the API key for a persona
  /search             toggle web-search augmentation
  /retry              re-send the last prompt of this session
  /help               show this help
  /quit               exit
Anything else is sent to the active persona.";

/// One parsed input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplCommand {
    Send(String),
    NewSession,
    ListSessions,
    OpenSession(usize),
    DeleteSession(usize),
    ListPersonas,
    SelectPersona(String),
    SetKey { persona_id: String, key: String },
    ToggleSearch,
    Retry,
    Help,
    Quit,
    Empty,
    Usage(&'static str),
    Unknown(String),
}

pub fn parse_line(line: &str) -> ReplCommand {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return ReplCommand::Empty;
    }
    if !trimmed.starts_with('/') {
        return ReplCommand::Send(trimmed.to_string());
    }

    let tokens: Vec<&str> = trimmed.split_whitespace().collect();
    match tokens[0] {
        "/new" => ReplCommand::NewSession,
        "/sessions" => ReplCommand::ListSessions,
        "/open" => match tokens.get(1).and_then(|t| t.parse().ok()) {
            Some(index) => ReplCommand::OpenSession(index),
            None => ReplCommand::Usage("usage: /open <number>"),
        },
        "/delete" => match tokens.get(1).and_then(|t| t.parse().ok()) {
            Some(index) => ReplCommand::DeleteSession(index),
            None => ReplCommand::Usage("usage: /delete <number>"),
        },
        "/personas" => ReplCommand::ListPersonas,
        "/persona" => match tokens.get(1) {
            Some(id) => ReplCommand::SelectPersona(id.to_string()),
            None => ReplCommand::Usage("usage: /persona <id>"),
        },
        "/key" => match tokens.get(1) {
            Some(id) => ReplCommand::SetKey {
                persona_id: id.to_string(),
                key: tokens.get(2).unwrap_or(&"").to_string(),
            },
            None => ReplCommand::Usage("usage: /key <persona-id> [key]"),
        },
        "/search" => ReplCommand::ToggleSearch,
        "/retry" => ReplCommand::Retry,
        "/help" => ReplCommand::Help,
        "/quit" | "/exit" => ReplCommand::Quit,
        other => ReplCommand::Unknown(other.to_string()),
    }
}

pub async fn run_repl(ctx: AppContext) -> Result<(), Box<dyn Error>> {
    let (stream_service, mut rx) = ChatStreamService::new();
    let mut app = ChatApp::new(ctx, stream_service);

    println!("causerie — chat with model personas. /help lists commands.");
    print_status(&app);
    print_prompt()?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            received = rx.recv() => {
                let Some((event, tag)) = received else { break };
                render_stream_event(&mut app, &tag, event)?;
            }
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if handle_line(&mut app, &line)? {
                    break;
                }
                if !active_session_streaming(&app) {
                    print_prompt()?;
                }
            }
        }
    }

    app.shutdown();
    Ok(())
}

fn active_session_streaming(app: &ChatApp) -> bool {
    app.store()
        .active_id()
        .map(|id| app.is_processing(id))
        .unwrap_or(false)
}

fn print_prompt() -> io::Result<()> {
    print!("you> ");
    io::stdout().flush()
}

fn print_status(app: &ChatApp) {
    let persona = app.active_persona();
    println!(
        "[persona: {} | search: {}]",
        persona.display_name,
        if app.search_enabled() && persona.supports_search {
            "on"
        } else {
            "off"
        }
    );
}

fn print_sessions(app: &ChatApp) {
    let sessions = app.store().sessions_by_recency();
    if sessions.is_empty() {
        println!("(no sessions yet)");
        return;
    }
    for (i, session) in sessions.iter().enumerate() {
        let marker = if app.store().active_id() == Some(session.id.as_str()) {
            '*'
        } else {
            ' '
        };
        println!(
            "{marker}{:>3}. {}  ({} messages, {})",
            i + 1,
            session.title,
            session.messages.len(),
            session.updated_at.format("%Y-%m-%d %H:%M")
        );
    }
}

/// Resolve a 1-based index from the `/sessions` listing to a session id.
fn session_id_at(app: &ChatApp, index: usize) -> Option<String> {
    app.store()
        .sessions_by_recency()
        .get(index.checked_sub(1)?)
        .map(|session| session.id.clone())
}

/// Apply one pipeline event to the store and echo what changed. Events for
/// stale streams produce no notifications and print nothing.
fn render_stream_event(
    app: &mut ChatApp,
    tag: &StreamTag,
    event: StreamEvent,
) -> Result<(), Box<dyn Error>> {
    let is_active = app.store().active_id() == Some(tag.session_id.as_str());
    let notifications = app.apply_stream_event(tag, event.clone());
    if notifications.is_empty() {
        return Ok(());
    }

    match event {
        StreamEvent::Chunk(text) => {
            if is_active {
                print!("{text}");
                io::stdout().flush()?;
            }
        }
        StreamEvent::Thought(_) | StreamEvent::Grounding(_) => {}
        StreamEvent::Errored(message) => {
            if is_active {
                println!("\n{message}");
                print_prompt()?;
            } else {
                note_background_turn(app, &tag.session_id, "failed");
            }
        }
        StreamEvent::Completed => {
            if is_active {
                println!();
                print_reply_sources(app, tag);
                print_prompt()?;
            } else {
                note_background_turn(app, &tag.session_id, "finished");
            }
        }
    }
    Ok(())
}

fn note_background_turn(app: &ChatApp, session_id: &str, outcome: &str) {
    if let Some(session) = app.store().session(session_id) {
        println!("[reply {outcome} in \"{}\"]", session.title);
    }
}

fn print_reply_sources(app: &ChatApp, tag: &StreamTag) {
    let sources = app
        .store()
        .session(&tag.session_id)
        .and_then(|session| session.message(&tag.message_id))
        .map(|message| message.grounding_sources.clone())
        .unwrap_or_default();
    if sources.is_empty() {
        return;
    }
    println!("\nSources:");
    for source in &sources {
        println!("  - {} <{}>", source.title, source.uri);
    }
}

/// Handle one input line. Returns true when the driver should exit.
fn handle_line(app: &mut ChatApp, line: &str) -> Result<bool, Box<dyn Error>> {
    match parse_line(line) {
        ReplCommand::Empty => {}
        ReplCommand::Quit => return Ok(true),
        ReplCommand::Help => println!("{HELP}"),
        ReplCommand::Usage(usage) => println!("{usage}"),
        ReplCommand::Unknown(command) => {
            println!("unknown command {command}; /help lists commands");
        }
        ReplCommand::Send(text) => {
            if active_session_streaming(app) {
                println!("[a reply is still streaming in this session]");
            } else {
                app.handle_intent(Intent::SendMessage(text));
                announce_reply(app)?;
            }
        }
        ReplCommand::Retry => {
            if active_session_streaming(app) {
                println!("[a reply is still streaming in this session]");
            } else {
                app.handle_intent(Intent::ResendLast);
                if active_session_streaming(app) {
                    announce_reply(app)?;
                } else {
                    println!("(nothing to retry here)");
                }
            }
        }
        ReplCommand::NewSession => {
            app.handle_intent(Intent::NewSession);
            println!("(started a new session)");
        }
        ReplCommand::ListSessions => print_sessions(app),
        ReplCommand::OpenSession(index) => match session_id_at(app, index) {
            Some(id) => {
                app.handle_intent(Intent::SelectSession(id.clone()));
                if let Some(session) = app.store().session(&id) {
                    println!("(switched to \"{}\")", session.title);
                    for message in &session.messages {
                        replay_message(app, session.persona_id.as_str(), message);
                    }
                }
            }
            None => println!("no session {index}; /sessions lists them"),
        },
        ReplCommand::DeleteSession(index) => match session_id_at(app, index) {
            Some(id) => {
                app.handle_intent(Intent::DeleteSession(id));
                println!("(session deleted)");
            }
            None => println!("no session {index}; /sessions lists them"),
        },
        ReplCommand::ListPersonas => {
            for persona in app.personas() {
                let marker = if persona.id == app.active_persona().id {
                    '*'
                } else {
                    ' '
                };
                println!(
                    "{marker} {:<16} {} — {}",
                    persona.id, persona.display_name, persona.description
                );
            }
        }
        ReplCommand::SelectPersona(id) => {
            app.handle_intent(Intent::SelectPersona(id));
            print_status(app);
        }
        ReplCommand::SetKey { persona_id, key } => {
            let cleared = key.trim().is_empty();
            app.handle_intent(Intent::UpdatePersonaKey {
                persona_id: persona_id.clone(),
                key,
            });
            if cleared {
                println!("(cleared key for {persona_id})");
            } else {
                println!("(set key for {persona_id})");
            }
        }
        ReplCommand::ToggleSearch => {
            app.handle_intent(Intent::ToggleSearch);
            print_status(app);
        }
    }
    Ok(false)
}

/// Print the speaker prefix for a turn that just started streaming.
fn announce_reply(app: &ChatApp) -> io::Result<()> {
    if active_session_streaming(app) {
        print!("{}> ", app.active_persona().display_name);
        io::stdout().flush()?;
    }
    Ok(())
}

/// Re-print a stored message when switching into a session.
fn replay_message(app: &ChatApp, persona_id: &str, message: &crate::core::message::Message) {
    use crate::core::message::Role;
    match message.role {
        Role::User => println!("you> {}", message.text),
        Role::Model => {
            let speaker = app
                .personas()
                .iter()
                .find(|p| p.id == persona_id)
                .map(|p| p.display_name.as_str())
                .unwrap_or("model");
            if !message.text.is_empty() {
                println!("{speaker}> {}", message.text);
            }
        }
        Role::System => {}
    }
}
