//! Interactive chat mode
//!
//! Connects the configured servers, builds the provider and dispatch loop,
//! and runs a readline-based session. Slash commands are handled locally;
//! everything else is submitted as a user turn.

use std::sync::Arc;

use colored::Colorize;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use crate::config::Config;
use crate::dispatch::DispatchLoop;
use crate::error::Result;
use crate::mcp::registry::ServerRegistry;
use crate::providers::anthropic::AnthropicProvider;
use crate::providers::base::Provider;

/// System prompt naming the connected servers so the model knows what it can
/// reach.
fn system_prompt(registry: &ServerRegistry) -> String {
    let mut prompt = String::from(
        "You are a helpful assistant with access to tools provided by \
connected servers. Use them when they help answer the user.",
    );
    let names = registry.server_names();
    if !names.is_empty() {
        prompt.push_str("\nConnected servers: ");
        prompt.push_str(&names.join(", "));
    }
    prompt
}

/// Local commands the REPL handles without touching the model.
enum SlashCommand {
    Exit,
    Help,
    Servers,
    History,
    None,
}

fn parse_slash_command(input: &str) -> SlashCommand {
    match input {
        "/quit" | "/exit" | "/q" | "exit" | "quit" => SlashCommand::Exit,
        "/help" => SlashCommand::Help,
        "/servers" => SlashCommand::Servers,
        "/history" => SlashCommand::History,
        _ => SlashCommand::None,
    }
}

/// Start interactive chat mode.
///
/// Connects every configured server first; connect failures are reported but
/// do not prevent the session from starting. The conversation is saved and
/// all sessions are closed when the loop exits.
pub async fn run_chat(config: Config) -> Result<()> {
    tracing::info!("starting interactive chat mode");

    let registry = Arc::new(ServerRegistry::connect_all(&config.descriptors()).await?);
    print_startup_summary(&registry);

    let provider: Arc<dyn Provider> =
        Arc::new(AnthropicProvider::new(&config.chat, Some(system_prompt(&registry)))?);
    println!("Provider: {} ({})\n", provider.name().cyan(), config.chat.model);
    println!("Type '/help' for commands, '/quit' to leave\n");

    let mut dispatch = DispatchLoop::new(provider, Arc::clone(&registry), &config.chat);
    let mut rl = DefaultEditor::new()?;

    loop {
        match rl.readline("> ") {
            Ok(line) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                rl.add_history_entry(trimmed)?;

                match parse_slash_command(trimmed) {
                    SlashCommand::Exit => break,
                    SlashCommand::Help => {
                        print_help();
                        continue;
                    }
                    SlashCommand::Servers => {
                        print_server_status(&registry);
                        continue;
                    }
                    SlashCommand::History => {
                        print_history(&dispatch);
                        continue;
                    }
                    SlashCommand::None => {}
                }

                match dispatch.run_turn(trimmed).await {
                    Ok(answer) => println!("\n{answer}\n"),
                    Err(e) => eprintln!("{}\n", format!("Error: {e:#}").red()),
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("CTRL-C");
                break;
            }
            Err(ReadlineError::Eof) => {
                println!("CTRL-D");
                break;
            }
            Err(err) => {
                tracing::error!("readline error: {err:?}");
                break;
            }
        }
    }

    if let Err(e) = dispatch.conversation().save() {
        tracing::warn!("failed to save conversation: {e:#}");
    }
    registry.shutdown().await;
    println!("Goodbye!");
    Ok(())
}

/// Connect the configured servers, print what they offer, and disconnect.
///
/// Backs the `servers` subcommand; useful to verify a config file before
/// starting a chat.
pub async fn run_servers(config: Config) -> Result<()> {
    let registry = ServerRegistry::connect_all(&config.descriptors()).await?;
    print_startup_summary(&registry);

    for tool in registry.catalog() {
        println!(
            "  {} ({}) - {}",
            tool.name.green(),
            tool.server.cyan(),
            tool.description.as_deref().unwrap_or("no description")
        );
    }

    registry.shutdown().await;
    Ok(())
}

fn print_startup_summary(registry: &ServerRegistry) {
    println!(
        "\nConnected {} server(s), {} tool(s) available",
        registry.server_names().len(),
        registry.catalog().len()
    );
    for failure in registry.failures() {
        println!(
            "{}",
            format!("  server '{}' failed to connect: {}", failure.server, failure.reason)
                .yellow()
        );
    }
    if registry.is_empty() {
        println!(
            "{}",
            "  no servers connected; the model will answer without tools".yellow()
        );
    }
    println!();
}

fn print_server_status(registry: &ServerRegistry) {
    if registry.is_empty() {
        println!("No servers connected\n");
        return;
    }
    for name in registry.server_names() {
        if let Some(session) = registry.session(name) {
            println!(
                "  {} [{}] - {} tool(s), {} call(s)",
                name.cyan(),
                session.state(),
                session.tools().len(),
                session.invocation_count()
            );
        }
    }
    println!();
}

fn print_history(dispatch: &DispatchLoop) {
    let messages = dispatch.conversation().messages();
    if messages.is_empty() {
        println!("No messages yet\n");
        return;
    }
    for message in messages {
        let role = match message.role.as_str() {
            "user" => "user".green(),
            "assistant" => "assistant".cyan(),
            other => other.yellow(),
        };
        let content = message.content.as_deref().unwrap_or("(tool calls)");
        println!("  [{role}] {content}");
    }
    println!();
}

fn print_help() {
    println!("Commands:");
    println!("  /servers   show connected servers and their call counts");
    println!("  /history   show the conversation so far");
    println!("  /help      show this help");
    println!("  /quit      save the conversation and exit\n");
}
