use anyhow::Context;
use anyhow::Result;
use anyhow::bail;
use clap::Args;
use serde_json::Map;
use serde_json::Value;
use signal_core::ClientConfig;
use signal_core::Operation;
use signal_core::SignalClient;

use crate::print_json;

#[derive(Debug, Args)]
pub struct QueryCommand {
    #[command(flatten)]
    pub operation: OperationArgs,
}

/// Arguments shared by every command that sends an operation.
#[derive(Debug, Args)]
pub struct OperationArgs {
    /// Operation document, or `@path` to read it from a file.
    #[arg(value_name = "DOCUMENT")]
    pub document: String,

    /// Operation name, when the document defines several.
    #[arg(long = "operation-name", value_name = "NAME")]
    pub operation_name: Option<String>,

    /// Variable as NAME=VALUE; VALUE is parsed as JSON, falling back to a string.
    #[arg(long = "var", value_name = "NAME=VALUE", value_parser = parse_variable)]
    pub vars: Vec<(String, Value)>,

    /// All variables as one JSON object; `--var` entries override its keys.
    #[arg(long = "variables", value_name = "JSON")]
    pub variables: Option<String>,
}

impl OperationArgs {
    pub fn to_operation(&self) -> Result<Operation> {
        let document = match self.document.strip_prefix('@') {
            Some(path) => std::fs::read_to_string(path)
                .with_context(|| format!("failed to read operation document {path}"))?,
            None => self.document.clone(),
        };

        let mut variables = match &self.variables {
            Some(raw) => match serde_json::from_str::<Value>(raw)
                .context("--variables is not valid JSON")?
            {
                Value::Object(map) => map,
                _ => bail!("--variables must be a JSON object"),
            },
            None => Map::new(),
        };
        for (name, value) in &self.vars {
            variables.insert(name.clone(), value.clone());
        }

        let mut operation = Operation::new(document).with_variables(variables);
        if let Some(name) = &self.operation_name {
            operation = operation.with_operation_name(name.clone());
        }
        Ok(operation)
    }
}

fn parse_variable(raw: &str) -> Result<(String, Value), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got `{raw}`"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err("variable name must not be empty".to_string());
    }
    let value =
        serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((name.to_string(), value))
}

pub async fn run(cmd: QueryCommand, config: ClientConfig) -> Result<()> {
    let operation = cmd.operation.to_operation()?;
    let client = SignalClient::from_config(config)?;
    let data = client.query(&operation).await?;
    print_json(&data)
}
