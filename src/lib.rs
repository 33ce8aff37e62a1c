//! Causerie is a persona-based chat engine that streams conversations from
//! hosted AI model APIs.
//!
//! The crate is organized around a small set of collaborating layers:
//! - [`core`] owns runtime state: the persona registry, the session store,
//!   streaming orchestration, reconciliation, and persistence.
//! - [`api`] defines the request and streamed-fragment payloads exchanged
//!   with the remote model endpoint.
//! - [`cli`] parses command-line arguments and runs the line-oriented chat
//!   driver that translates user input into intents.
//!
//! Runtime entrypoints live in the binary crate (`src/main.rs`) and route
//! through [`crate::cli::main`], which dispatches into [`core::app`] and
//! [`cli::repl`] for interactive sessions.

pub mod api;
pub mod cli;
pub mod core;
pub mod utils;
