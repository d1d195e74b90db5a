use {
    anyhow::Result,
    clap::Parser,
    filecrypt::{cli::Cli, config::Config, term::TermLayer},
    tracing_subscriber::{EnvFilter, prelude::*},
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_filter))?;
    tracing_subscriber::registry()
        .with(TermLayer)
        .with(filter)
        .init();
    filecrypt::run(cli, config).await
}
