use anyhow::Result;
use clap::Args;
use signal_core::ClientConfig;
use signal_core::SignalClient;

use crate::print_json;

const REDACTED: &str = "<redacted>";

#[derive(Debug, Args)]
pub struct StatusCommand {
    /// Send the health probe before reporting.
    #[arg(long)]
    pub probe: bool,
}

pub async fn run(cmd: StatusCommand, config: ClientConfig) -> Result<()> {
    let client = SignalClient::from_config(config)?;
    if cmd.probe {
        client.probe().await;
    }
    print_json(&client.status())
}

/// Prints the effective configuration as TOML with credentials redacted.
pub fn print_config(mut config: ClientConfig) -> Result<()> {
    if config.auth.access_token.is_some() {
        config.auth.access_token = Some(REDACTED.to_string());
    }
    if config.auth.refresh_token.is_some() {
        config.auth.refresh_token = Some(REDACTED.to_string());
    }
    print!("{}", config.to_toml()?);
    Ok(())
}
