//! One-shot "say" command: send a single prompt and stream the reply to
//! stdout, without touching the session store or persisted history.

use std::error::Error;
use std::io::{self, Write};

use tokio_util::sync::CancellationToken;

use crate::core::chat_stream::{
    resolve_credential, ChatStreamService, StreamEvent, StreamParams, StreamTag, DEFAULT_BASE_URL,
};
use crate::core::message::{GroundingSource, Message};
use crate::core::persona::PersonaRegistry;
use crate::core::storage::{load_key_overrides, StoragePaths};

pub async fn run_say(
    prompt: Vec<String>,
    persona: Option<String>,
    search: bool,
    base_url: Option<String>,
) -> Result<(), Box<dyn Error>> {
    let prompt = prompt.join(" ");
    if prompt.trim().is_empty() {
        eprintln!("Usage: causerie say <prompt>");
        std::process::exit(1);
    }

    let mut registry = PersonaRegistry::builtin();
    if let Ok(paths) = StoragePaths::resolve() {
        registry.apply_key_overrides(&load_key_overrides(&paths.keys));
    }
    let persona = registry.resolve(persona.as_deref().unwrap_or("")).clone();
    let api_key = resolve_credential(&persona);

    let (stream_service, mut rx) = ChatStreamService::new();
    stream_service.spawn_stream(StreamParams {
        client: reqwest::Client::new(),
        base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        api_key,
        persona,
        history: vec![Message::user(prompt)],
        enable_search: search,
        cancel_token: CancellationToken::new(),
        tag: StreamTag {
            session_id: "say".to_string(),
            message_id: "say-reply".to_string(),
            stream_id: 1,
        },
    });

    let mut sources: Vec<GroundingSource> = Vec::new();
    while let Some((event, _tag)) = rx.recv().await {
        match event {
            StreamEvent::Chunk(text) => {
                print!("{text}");
                io::stdout().flush()?;
            }
            StreamEvent::Thought(_) => {}
            StreamEvent::Grounding(incoming) => {
                for source in incoming {
                    if !sources.iter().any(|s| s.uri == source.uri) {
                        sources.push(source);
                    }
                }
            }
            StreamEvent::Errored(message) => {
                eprintln!("\n{message}");
                std::process::exit(1);
            }
            StreamEvent::Completed => {
                println!();
                if !sources.is_empty() {
                    println!("\nSources:");
                    for source in &sources {
                        println!("  - {} <{}>", source.title, source.uri);
                    }
                }
                break;
            }
        }
    }

    Ok(())
}
