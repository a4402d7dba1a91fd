//! Conversation engine for a terminal client that talks to a local
//! Ollama-compatible model and lets it call tools on the user's machine.

pub mod api;
pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod orchestrator;
pub mod session;
pub mod tools;
pub mod ui;

pub use error::{ErrorKind, GemmisError, Result};
