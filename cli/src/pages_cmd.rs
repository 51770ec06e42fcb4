use anyhow::Result;
use anyhow::bail;
use clap::Args;
use clap::ValueEnum;
use serde::Serialize;
use serde_json::Value;
use signal_core::ClientConfig;
use signal_core::FieldPolicy;
use signal_core::ListQuery;
use signal_core::LoadOutcome;
use signal_core::SignalClient;
use std::sync::Arc;
use tracing::info;

use crate::print_json;
use crate::query_cmd::OperationArgs;

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum StyleArg {
    Offset,
    Cursor,
}

#[derive(Debug, Args)]
pub struct PagesCommand {
    #[command(flatten)]
    pub operation: OperationArgs,

    /// Root field holding the paginated list.
    #[arg(long, value_name = "FIELD")]
    pub field: String,

    /// Pagination style of the field, when config.toml has no policy for it.
    #[arg(long, value_enum)]
    pub style: Option<StyleArg>,

    /// Stop after this many pages.
    #[arg(long = "max-pages", default_value_t = 10)]
    pub max_pages: u32,
}

#[derive(Debug, Serialize)]
struct PagesReport {
    pages: u32,
    loaded: usize,
    total_count: Option<u64>,
    has_more: bool,
    data: Option<Value>,
}

pub async fn run(cmd: PagesCommand, mut config: ClientConfig) -> Result<()> {
    let has_policy = config
        .cache
        .fields
        .iter()
        .any(|policy| policy.field == cmd.field);
    if !has_policy {
        let policy = match cmd.style {
            Some(StyleArg::Offset) => FieldPolicy::offset(cmd.field.clone()),
            Some(StyleArg::Cursor) => FieldPolicy::cursor(cmd.field.clone()),
            None => bail!(
                "no cache policy for field `{}`; pass --style or add one to config.toml",
                cmd.field
            ),
        };
        config.cache.fields.push(policy);
    }

    let list = ListQuery::new(cmd.operation.to_operation()?, cmd.field);
    let client = Arc::new(SignalClient::from_config(config)?);
    let controller = client.scroll_controller(list.clone());

    let mut pages = 0;
    while pages < cmd.max_pages {
        match controller.load_more().await? {
            LoadOutcome::Loaded(summary) => {
                pages += 1;
                info!(page = pages, loaded = summary.loaded, "page loaded");
            }
            LoadOutcome::Exhausted => break,
            LoadOutcome::Suppressed => bail!("requests are currently blocked: {:?}", client.status()),
            LoadOutcome::Busy => bail!("another page of `{}` is still loading", list.field),
        }
    }

    let snapshot = controller.snapshot();
    print_json(&PagesReport {
        pages,
        loaded: snapshot.current_count,
        total_count: snapshot.total_count,
        has_more: snapshot.has_more,
        data: client.read(&list.operation),
    })
}
