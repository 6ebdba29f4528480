//! Review Portal - Deep ID single sign-on gateway

use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};

use review_portal::{
    cli::{Cli, Command},
    config::Config,
    server::Server,
    setup_tracing,
    sso::{IssuerDiscovery, SsoSettings, provider_http_client},
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup tracing
    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    let result = match cli.command {
        Some(Command::Check { offline, print }) => run_check(&config, offline, print).await,
        Some(Command::Serve) | None => run_server(config).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

/// Load configuration and apply CLI overrides
fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(ref host) = cli.host {
        config.server.host.clone_from(host);
    }
    Ok(config)
}

/// Validate configuration and, unless offline, fetch the discovery document
async fn run_check(config: &Config, offline: bool, print: bool) -> anyhow::Result<()> {
    if print {
        print!("{}", serde_yaml::to_string(&config.redacted())?);
    }

    config.validate().context("Invalid configuration")?;
    let settings = SsoSettings::from_config(config).context("Invalid SSO settings")?;

    println!("Configuration OK");
    println!("  Provider:     {}", settings.domain);
    println!("  Redirect URI: {}", settings.redirect_uri);
    println!("  Environment:  {:?}", settings.environment);
    if !settings.client_id_is_valid() {
        println!("  WARNING: client id is missing or too short, logins will be refused");
    }

    if offline {
        return Ok(());
    }

    let http = provider_http_client(&config.sso)?;
    let metadata = IssuerDiscovery::new(http, &settings)
        .fetch_metadata()
        .await
        .with_context(|| format!("Discovery failed at {}", settings.discovery_url()))?;

    println!("Provider OK");
    println!("  Issuer:       {}", metadata.issuer);
    if let Some(ref jwks_uri) = metadata.jwks_uri {
        println!("  JWKS:         {jwks_uri}");
    }
    Ok(())
}

/// Run the portal server
async fn run_server(config: Config) -> anyhow::Result<()> {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.server.port,
        users = ?config.users.backend,
        "Starting review portal"
    );

    let server = Server::new(config).context("Failed to create server")?;
    server.run().await.context("Server error")?;

    info!("Review portal shutdown complete");
    Ok(())
}
