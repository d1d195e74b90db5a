use {
    anyhow::Result,
    clap::Parser,
    filecrypt_server::Config,
    std::{path::PathBuf, sync::Mutex},
    tracing_subscriber::{EnvFilter, fmt, prelude::*},
};

#[derive(Debug, Parser)]
#[clap(version, about = "Stores encrypted files and serves them by token")]
struct Cli {
    #[clap(long)]
    config: PathBuf,
}

fn init_logging(config: &Config) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_filter))?;
    let registry = tracing_subscriber::registry().with(filter);
    if let Some(log_file) = &config.log_file {
        let file = fs_err::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_file)?;
        registry
            .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
            .init();
    } else {
        registry.with(fmt::layer()).init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::parse(&cli.config)?;
    init_logging(&config)?;
    filecrypt_server::run(config).await
}
