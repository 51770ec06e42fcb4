pub mod pages_cmd;
pub mod query_cmd;
pub mod status_cmd;

use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use clap::Subcommand;
use serde::Serialize;
use signal_core::ClientConfig;
use signal_core::find_signal_home;

pub use pages_cmd::PagesCommand;
pub use query_cmd::QueryCommand;
pub use status_cmd::StatusCommand;

/// Command-line client for the Signal GraphQL backend.
#[derive(Debug, Parser)]
#[command(name = "signal", version)]
pub struct Cli {
    /// GraphQL endpoint; overrides config.toml and SIGNAL_ENDPOINT.
    #[arg(long, global = true, value_name = "URL")]
    pub endpoint: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Execute one operation and print its data.
    Query(QueryCommand),
    /// Page through a list until it is exhausted.
    Pages(PagesCommand),
    /// Show the request gates and session state.
    Status(StatusCommand),
    /// Print the effective configuration.
    Config,
}

pub async fn run(cli: Cli) -> Result<()> {
    let config = load_config(cli.endpoint)?;
    match cli.command {
        Command::Query(cmd) => query_cmd::run(cmd, config).await,
        Command::Pages(cmd) => pages_cmd::run(cmd, config).await,
        Command::Status(cmd) => status_cmd::run(cmd, config).await,
        Command::Config => status_cmd::print_config(config),
    }
}

fn load_config(endpoint: Option<String>) -> Result<ClientConfig> {
    let home = find_signal_home().context("failed to locate the signal home directory")?;
    let mut config = ClientConfig::load(&home)
        .with_context(|| format!("failed to load config from {}", home.display()))?;
    if let Some(endpoint) = endpoint {
        config.endpoint = endpoint;
    }
    Ok(config)
}

pub(crate) fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value)?;
    println!("{rendered}");
    Ok(())
}
