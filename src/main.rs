use clap::Parser;

use jobq::cli::{self, Cli};

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    if let Err(err) = cli::run(cli).await {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}
