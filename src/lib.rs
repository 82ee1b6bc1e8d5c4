//! Hotkey-driven "translate the selection in place" for any focused window.
//!
//! The pipeline copies the selection, sends it to an OpenAI-compatible chat
//! endpoint (streaming, with a blocking fallback), pastes the result over
//! the selection and restores the user's clipboard. With the Ollama profile
//! it also installs missing models and unloads them on exit.

pub mod backend;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod guard;
pub mod hotkey;
pub mod input;
pub mod keys;
pub mod logger;
pub mod pipeline;
pub mod registry;
pub mod translator;
pub mod tray;

#[cfg(test)]
mod test_support;
