use std::path::PathBuf;

use clap::Parser;

use request_gateway::lifecycle::startup;

#[derive(Debug, Parser)]
#[command(name = "request-gateway", version, about = "Rate limiting, auth and validation gateway")]
struct Cli {
    /// Path to the TOML configuration file. Built-in defaults when omitted.
    #[arg(short, long, env = "GATEWAY_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = startup::run(cli.config.as_deref()).await {
        // Tracing may not be initialized yet
        eprintln!("request-gateway: {e}");
        std::process::exit(1);
    }
}
