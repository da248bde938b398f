//! Command-line interface definition
//!
//! Defined with clap's derive API: a config-file flag shared by every
//! command, plus subcommands for chat and server inspection.

use clap::{Parser, Subcommand};

/// Toolbus - multi-server tool-calling chat host
///
/// Connects to configured tool servers, aggregates their tools, and drives
/// conversations where the model can call any of them.
#[derive(Parser, Debug, Clone)]
#[command(name = "toolbus")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to the server configuration file
    #[arg(short, long, env = "TOOLBUS_CONFIG")]
    pub config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Start an interactive chat session with tools
    Chat {
        /// Override the model from config
        #[arg(short, long)]
        model: Option<String>,
    },

    /// Connect the configured servers and list their tools
    Servers,
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
