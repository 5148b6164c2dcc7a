use anyhow::Result;
use clap::Parser;

mod commands;
mod config;
mod logger;

/// Manifest names probed in the working directory when `--file` is not
/// given.
pub(crate) const DEFAULT_FILENAMES: &[&str] = &["roadie.toml", ".roadie.toml"];

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = config::Cli::parse();

    match cli.command {
        config::Commands::Run { file, services } => commands::run::run(file, services).await,
        config::Commands::Start { file, services } => {
            commands::start::start(file, services).await
        }
        config::Commands::Stop { file, services } => commands::stop::stop(file, services).await,
        config::Commands::Restart { file, services } => {
            commands::restart::restart(file, services).await
        }
        config::Commands::Status { file } => commands::status::status(file).await,
    }
}
