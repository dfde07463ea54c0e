//! codecks-mcp - MCP server for the Codecks project-management API

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};

use codecks_mcp::{
    cli::{Cli, Command},
    client::CodecksClient,
    config::Config,
    server::{ToolServer, catalogue, serve_stdio},
    setup_tracing,
    transport::HttpTransport,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    let result = match cli.command {
        Some(Command::Tools) => print_tools(),
        Some(Command::Call { ref tool, ref args }) => run_call(&cli, tool, args).await,
        Some(Command::Serve) | None => run_server(&cli).await,
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            error!("{e:#}");
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn print_tools() -> anyhow::Result<ExitCode> {
    println!("{}", serde_json::to_string_pretty(&catalogue())?);
    Ok(ExitCode::SUCCESS)
}

/// Load and check configuration, then build the tool server
fn build_server(cli: &Cli) -> anyhow::Result<ToolServer> {
    let config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;
    config.validate()?;
    let config = Arc::new(config);
    let transport = HttpTransport::new(Arc::clone(&config)).context("failed to build HTTP client")?;
    Ok(ToolServer::new(CodecksClient::new(Arc::new(transport), config)))
}

async fn run_call(cli: &Cli, tool: &str, args: &str) -> anyhow::Result<ExitCode> {
    let arguments: serde_json::Value =
        serde_json::from_str(args).context("--args is not valid JSON")?;
    let server = build_server(cli)?;
    let envelope = server.call(tool, arguments).await;
    println!("{}", serde_json::to_string_pretty(&envelope)?);
    if codecks_mcp::contract::is_error(&envelope) {
        Ok(ExitCode::FAILURE)
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

async fn run_server(cli: &Cli) -> anyhow::Result<ExitCode> {
    let server = build_server(cli)?;
    info!(version = env!("CARGO_PKG_VERSION"), "Starting codecks-mcp");
    serve_stdio(&server).await?;
    info!("Shutdown complete");
    Ok(ExitCode::SUCCESS)
}
