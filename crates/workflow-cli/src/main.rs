mod args;
mod process_backend;
mod run;

use clap::Parser;

use args::Cli;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    if let Err(e) = run::run(cli).await {
        eprintln!("{e:#}");
        std::process::exit(1);
    }
}
