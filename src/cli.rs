//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// MCP server for the Codecks project-management API
#[derive(Parser, Debug)]
#[command(name = "codecks-mcp")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "CODECKS_MCP_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "info",
        env = "CODECKS_MCP_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "CODECKS_MCP_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand (optional - defaults to serving over stdio)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve MCP over stdin/stdout (default)
    Serve,

    /// Print the tool catalogue as JSON
    Tools,

    /// Run a single tool and print its result
    Call {
        /// Tool name
        #[arg(required = true)]
        tool: String,

        /// JSON arguments to pass to the tool
        #[arg(short, long, default_value = "{}")]
        args: String,
    },
}
