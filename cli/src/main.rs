use clap::Parser;
use signal_cli::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    setup_tracing();
    signal_cli::run(Cli::parse()).await
}

fn setup_tracing() {
    if tracing::dispatcher::has_been_set() {
        return;
    }
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .try_init();
}
