//! toolhost - main entry point.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing_subscriber::EnvFilter;

use toolhost::agent::{ToolLoop, TurnOptions};
use toolhost::bridge::StdioBridge;
use toolhost::config::{Config, load_bridge_configs};
use toolhost::llm::{ChatMessage, create_llm_provider};
use toolhost::provider::builtin::{ClockProvider, EchoProvider};
use toolhost::registry::ProviderRegistry;

#[derive(Parser)]
#[command(name = "toolhost", about = "Tool-provider host for a conversational agent")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the interactive chat loop (default).
    Run,
    /// Bring up all providers, print the flattened tool catalog, and exit.
    Tools,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env()?;
    let registry = Arc::new(ProviderRegistry::new());

    register_providers(&registry, &config).await?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Tools => {
            for (id, descriptor) in registry.all_tools().await {
                println!("{id}\t{}", descriptor.description);
            }
        }
        Command::Run => run_chat(&registry, &config).await?,
    }

    registry.shutdown_all().await;
    Ok(())
}

/// Register the builtins plus every bridge from the manifest. A provider
/// that fails to come up is logged and skipped; the rest still register.
async fn register_providers(
    registry: &Arc<ProviderRegistry>,
    config: &Config,
) -> anyhow::Result<()> {
    if let Err(e) = registry.register_server(Arc::new(EchoProvider::new())).await {
        tracing::warn!(provider = "echo", error = %e, "Failed to register builtin");
    }
    if let Err(e) = registry.register_server(Arc::new(ClockProvider::new())).await {
        tracing::warn!(provider = "clock", error = %e, "Failed to register builtin");
    }

    if let Some(path) = &config.bridges_file {
        for bridge_config in load_bridge_configs(path)? {
            let name = bridge_config.name.clone();
            let bridge = Arc::new(StdioBridge::new(bridge_config));
            if let Err(e) = registry.register_server(bridge).await {
                tracing::warn!(provider = %name, error = %e, "Failed to register bridge");
            }
        }
    }

    Ok(())
}

async fn run_chat(registry: &Arc<ProviderRegistry>, config: &Config) -> anyhow::Result<()> {
    let llm = create_llm_provider(config.llm.clone());
    tracing::info!(model = llm.model_name(), "Starting chat loop");
    let tool_loop = ToolLoop::new(llm, Arc::clone(registry), config.agent.clone());

    let mut history = vec![ChatMessage::system(
        "You are a helpful assistant with access to tools. \
         Use them when they help answer the user's request.",
    )];

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;
        let Some(line) = stdin.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        history.push(ChatMessage::user(line));
        match tool_loop
            .run_turn(history.clone(), TurnOptions::default())
            .await
        {
            Ok(outcome) => {
                for usage in &outcome.tools_used {
                    let mark = if usage.success { "ok" } else { "failed" };
                    println!("  [tool {} {}]", usage.name, mark);
                }
                println!("{}", outcome.reply);
                history.push(ChatMessage::assistant(outcome.reply));
            }
            Err(e) => {
                tracing::error!(error = %e, "Turn failed");
                println!("error: {e}");
            }
        }
    }

    Ok(())
}
