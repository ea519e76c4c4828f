use adminui_gateway::config::{Config, DEFAULT_CONFIG_PATH};
use adminui_gateway::logging;
use adminui_gateway::HttpServer;
use anyhow::Result;
use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "adminui")]
#[command(about = "Static asset server and reverse proxy for the configuration admin UI")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Args {
    #[arg(short = 'f', long, default_value = DEFAULT_CONFIG_PATH)]
    config: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match Config::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            logging::init_fallback();
            error!("Failed to load configuration: {:#}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = logging::init(&config.log) {
        logging::init_fallback();
        error!("Failed to initialise logging: {:#}", e);
        return ExitCode::FAILURE;
    }

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Fatal: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(config: Config) -> Result<()> {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        commit = env!("ADMINUI_BUILD_COMMIT"),
        "Starting adminui gateway"
    );

    let server = HttpServer::new(Arc::new(config))?;
    server.run().await
}
