use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Translate the selected text in any window with a global hotkey
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Settings file (default: settings.json next to the executable)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Increase logging verbosity (default: info, -v: debug, -vv: trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    pub verbosity: u8,

    /// Write the effective settings back to the settings file
    #[arg(long = "save-defaults")]
    pub save_defaults: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Register the hotkey and translate on every press (default)
    Run,
    /// List models installed in the local registry
    Models,
    /// Download a model into the local registry
    Pull {
        /// Model to pull (default: the configured model)
        #[arg(value_name = "MODEL")]
        model: Option<String>,
    },
    /// Unload every model the registry has in memory
    Unload,
}

impl Args {
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Run)
    }
}
