//! Toolbus - multi-server tool-calling chat host
//!
//! Main entry point: initialize tracing, load configuration, dispatch to the
//! selected command.

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use toolbus::cli::{Cli, Commands};
use toolbus::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();
    init_tracing(cli.verbose);

    let config_path = cli.config.as_deref().unwrap_or("config/servers.yaml");
    let mut config = Config::load(config_path)?;
    config.validate()?;

    match cli.command {
        Commands::Chat { model } => {
            if let Some(model) = model {
                tracing::debug!("using model override: {model}");
                config.chat.model = model;
            }
            toolbus::chat::run_chat(config).await
        }
        Commands::Servers => toolbus::chat::run_servers(config).await,
    }
}

/// Initialize tracing subscriber with environment filter
fn init_tracing(verbose: bool) {
    let default_filter = if verbose { "toolbus=debug" } else { "toolbus=info" };
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
