//! Zentinel Stub Server - CLI Entry Point

use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::net::TcpListener;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;
use zentinel_stub_server::{StubServer, StubServerConfig};

const DEFAULT_CONFIG: &str = r#"# Zentinel stub server configuration
listen: 127.0.0.1:5000
internal_prefix: /internal

settings:
  log_matches: true
  log_unmatched: true

routes:
  - id: ping
    path: /ping
    method: GET
    responses:
      - status: 200
        body: pong

  - id: flaky-login
    path: /login
    method: POST
    response_selection: random
    auth:
      method: form
      fields:
        username: admin
        password: secret
      unauthorized_response:
        status: 401
        body:
          error: Unauthorized
    responses:
      - id: ok
        weight: 0.9
        body:
          token: abc123
      - id: slow-failure
        weight: 0.1
        status: 503
        delay: [0.5, 1.5]
"#;

#[derive(Parser, Debug)]
#[command(
    name = "zentinel-stub-server",
    about = "Configurable HTTP stub server - route matching, response pools and failure simulation",
    version
)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "stub-server.yaml")]
    config: PathBuf,

    /// Address to listen on (overrides the configuration file)
    #[arg(short, long, value_name = "ADDR")]
    listen: Option<SocketAddr>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'L', long, default_value = "info")]
    log_level: Level,

    /// Print default configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if args.print_config {
        print!("{}", DEFAULT_CONFIG);
        return Ok(());
    }

    // Load configuration
    let mut config = if args.config.exists() {
        info!(path = ?args.config, "Loading configuration");
        StubServerConfig::from_file(&args.config)
            .with_context(|| format!("Failed to load {}", args.config.display()))?
    } else if args.validate {
        anyhow::bail!("Configuration file not found: {:?}", args.config);
    } else {
        info!("Using default configuration (no routes)");
        StubServerConfig::default()
    };

    if args.validate {
        println!(
            "Configuration is valid ({} routes defined)",
            config.routes.len()
        );
        return Ok(());
    }

    if let Some(listen) = args.listen {
        config.listen = listen;
    }

    let listener = TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen))?;
    let server = StubServer::new(config).await?;
    server.run(listener).await?;

    Ok(())
}
