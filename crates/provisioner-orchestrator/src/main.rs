//! Provisioner orchestrator binary.
//!
//! `provisioner serve` exposes the invoke surface over HTTP;
//! `provisioner invoke` handles a single event and prints the response.

use std::io::Read;
use std::net::SocketAddr;

use clap::{Parser, Subcommand};
use serde_json::Value;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use provisioner_core::RegionId;
use provisioner_orchestrator::{http, AppState, Config, InvocationContext, Orchestrator};

/// Fan-out provisioning orchestrator.
#[derive(Parser, Debug)]
#[command(name = "provisioner", about = "Fan-out provisioning orchestrator")]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    /// Override MAX_CONCURRENT_WORKERS
    #[arg(long, global = true)]
    max_concurrency: Option<usize>,

    /// Override SUCCESS_THRESHOLD
    #[arg(long, global = true)]
    threshold: Option<f64>,

    /// Fixed region list, used instead of discovery
    #[arg(long, global = true, value_delimiter = ',')]
    regions: Vec<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the HTTP invoke surface
    Serve {
        #[arg(long, default_value = "0.0.0.0:8080")]
        addr: SocketAddr,
    },

    /// Handle one event and print the response
    Invoke {
        /// Event file, or `-` for stdin
        #[arg(long, default_value = "-")]
        event: String,

        /// ARN of the invoking function (determines the current region)
        #[arg(long)]
        function_arn: Option<String>,

        /// Log stream name, used as the default physical resource id
        #[arg(long)]
        log_stream: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.log_json)?;

    let mut config = Config::from_env()?;
    if let Some(max_concurrency) = cli.max_concurrency {
        config.max_concurrency = max_concurrency;
    }
    if let Some(threshold) = cli.threshold {
        config.success_threshold = threshold;
    }
    if !cli.regions.is_empty() {
        config.static_regions = cli.regions.iter().map(|r| RegionId::new(r.trim())).collect();
        config.regions_url = None;
    }

    let orchestrator = Orchestrator::from_config(&config)?;

    match cli.command {
        Command::Serve { addr } => serve(orchestrator, addr).await?,
        Command::Invoke {
            event,
            function_arn,
            log_stream,
        } => {
            let payload = read_event(&event)?;
            let ctx = InvocationContext {
                function_arn,
                log_stream_name: log_stream,
                request_id: None,
            };

            let response = orchestrator.handle(&payload, &ctx).await;
            println!("{}", serde_json::to_string_pretty(&response)?);
            if response.status_code != 200 {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

fn init_tracing(json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::from_default_env().add_directive("provisioner=info".parse()?);
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

async fn serve(orchestrator: Orchestrator, addr: SocketAddr) -> Result<(), Box<dyn std::error::Error>> {
    let router = http::create_router(AppState::new(orchestrator));
    let listener = TcpListener::bind(addr).await?;

    info!(addr = %addr, "HTTP server listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("HTTP server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

fn read_event(source: &str) -> Result<Value, Box<dyn std::error::Error>> {
    let raw = if source == "-" {
        let mut raw = String::new();
        std::io::stdin().read_to_string(&mut raw)?;
        raw
    } else {
        std::fs::read_to_string(source)?
    };
    Ok(serde_json::from_str(&raw)?)
}
