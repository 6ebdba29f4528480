//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Review Portal - Deep ID single sign-on gateway
#[derive(Parser, Debug)]
#[command(name = "review-portal")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "PORTAL_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "PORTAL_PORT")]
    pub port: Option<u16>,

    /// Host to bind to
    #[arg(long, env = "PORTAL_HOST")]
    pub host: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "PORTAL_LOG_LEVEL", global = true)]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "PORTAL_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand (optional - defaults to server mode)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the portal server (default)
    Serve,

    /// Validate configuration and probe the identity provider
    Check {
        /// Skip the network probe of the discovery document
        #[arg(long)]
        offline: bool,

        /// Print the effective configuration (secrets redacted) as YAML
        #[arg(long)]
        print: bool,
    },
}
