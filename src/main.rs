use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use prophet::config::AppConfig;
use prophet::error::SimResult;

#[derive(Parser, Debug)]
#[command(
    name = "prophet",
    about = "Monte Carlo projection of portfolio value from allocations and deposit schedules"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the JSON API over HTTP
    Serve {
        #[arg(long, help = "Listen port; overrides PROPHET_PORT")]
        port: Option<u16>,
    },
    /// Run one simulation from a JSON request file and print the result
    Simulate {
        #[arg(long, help = "Path to a request body as accepted by POST /api/simulate")]
        input: PathBuf,
        #[arg(long, default_value_t = false)]
        pretty: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let mut config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_new(&config.log_filter)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Serve { port } => {
            if let Some(port) = port {
                config.port = port;
            }
            if let Err(e) = prophet::api::run_http_server(config).await {
                tracing::error!("server error: {e}");
                std::process::exit(1);
            }
        }
        Command::Simulate { input, pretty } => {
            if let Err(e) = run_simulate_command(&input, pretty, &config) {
                tracing::error!("simulation failed: {e}");
                std::process::exit(1);
            }
        }
    }
}

fn run_simulate_command(input: &Path, pretty: bool, config: &AppConfig) -> SimResult<()> {
    let body = std::fs::read_to_string(input)?;
    let result = prophet::api::simulate_json(&body, config)?;
    let json = if pretty {
        serde_json::to_string_pretty(&result)?
    } else {
        serde_json::to_string(&result)?
    };
    println!("{json}");
    Ok(())
}
