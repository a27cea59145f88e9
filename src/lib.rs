//! cli-gpt is a command-line client for chat completion APIs.
//!
//! The crate is organized around a small set of collaborating layers:
//! - [`core`] owns the conversation logs, the streaming completion client,
//!   tool-call assembly and the per-turn orchestration.
//! - [`api`] defines the chat payloads exchanged with the completion endpoint.
//! - [`plugins`] discovers executable plugins and exposes them as tools.
//! - [`cli`] parses arguments and drives a single invocation.
//!
//! The binary (`src/main.rs`) routes through [`crate::cli::main`].

pub mod api;
pub mod cli;
pub mod core;
pub mod plugins;
pub mod utils;
