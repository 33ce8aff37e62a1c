//! Command-line interface parsing and handling
//!
//! This module parses command-line arguments and dispatches into the chat
//! driver or one of the non-interactive commands.

pub mod persona_list;
pub mod repl;
pub mod say;

#[cfg(test)]
mod tests;

use std::error::Error;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::core::app::AppContext;

#[derive(Parser)]
#[command(name = "causerie")]
#[command(about = "A persona-based chat client that streams replies from hosted AI models")]
#[command(
    long_about = "Causerie is a line-oriented chat client. Each persona wraps one hosted \
model with a voice instruction and capability flags; replies stream into the \
transcript as they arrive, with optional web-search grounding.\n\n\
Credentials:\n\
  Set a key per persona with /key inside the chat, or export GEMINI_API_KEY.\n\
  No key ships with the program.\n\n\
Chat commands:\n\
  Type a message and press Enter to send it. /help lists the commands\n\
  (/new, /sessions, /open, /persona, /key, /search, /retry, /delete, /quit)."
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Append finished turns to this transcript file
    #[arg(short = 'l', long, global = true, value_name = "FILE")]
    pub log: Option<String>,

    /// Override the model API base URL
    #[arg(long, global = true, value_name = "URL")]
    pub base_url: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the interactive chat (default)
    Chat,
    /// List the built-in personas
    Personas,
    /// Send one prompt and print the streamed reply
    Say {
        /// The prompt to send
        #[arg(trailing_var_arg = true)]
        prompt: Vec<String>,
        /// Persona to answer as
        #[arg(short, long, value_name = "ID")]
        persona: Option<String>,
        /// Enable web-search augmentation
        #[arg(short, long)]
        search: bool,
    },
}

pub fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    tokio::runtime::Runtime::new()?.block_on(async_main())
}

async fn async_main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    match args.command.unwrap_or(Commands::Chat) {
        Commands::Personas => {
            persona_list::list_personas();
            Ok(())
        }
        Commands::Say {
            prompt,
            persona,
            search,
        } => say::run_say(prompt, persona, search, args.base_url).await,
        Commands::Chat => {
            let ctx = AppContext::load(args.base_url, args.log)?;
            repl::run_repl(ctx).await
        }
    }
}
