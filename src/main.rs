mod api;
mod challenge;
mod config;
mod provider;
mod secrets;
mod solver;
mod tls;

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use log::info;

use crate::secrets::KubeSecretStore;
use crate::solver::DnspodSolver;

#[derive(Parser, Debug)]
#[command(name = "dnspod-webhook")]
#[command(about = "cert-manager ACME DNS-01 webhook solver for Tencent Cloud DNSPod")]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Port to serve the webhook API on
    #[arg(long)]
    secure_port: Option<u16>,

    /// PEM certificate chain for HTTPS serving
    #[arg(long)]
    tls_cert_file: Option<String>,

    /// PEM private key for HTTPS serving
    #[arg(long)]
    tls_private_key_file: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Load configuration first (before logger init)
    let mut config = config::Config::load(&args.config)?;
    if let Some(port) = args.secure_port {
        config.server.port = port;
    }
    config.override_tls_files(args.tls_cert_file, args.tls_private_key_file)?;

    // Initialize logger with config log level (env var takes precedence)
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(&config.server.log_level)
    ).init();

    info!("Loading configuration from: {}", args.config);
    info!(
        "Registering solver {} under group {}",
        config.webhook.solver_name, config.webhook.group_name
    );

    let secrets = KubeSecretStore::new().await?;
    let solver = DnspodSolver::new(
        config.webhook.solver_name.clone(),
        config.dnspod.clone(),
        Arc::new(secrets),
    )?;

    // Create router
    let app = api::create_router(config.webhook.group_name.clone(), Arc::new(solver));

    // Start server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!(
        "Challenge endpoint: POST /apis/{}/{}/{}",
        config.webhook.group_name,
        api::VERSION,
        config.webhook.solver_name
    );

    match config.tls_files() {
        Some((cert_file, key_file)) => {
            let tls_config = tls::load_server_config(cert_file, key_file)?;
            info!("Server listening on https://{}", addr);
            tls::serve(listener, app, tls_config).await?;
        }
        None => {
            info!("Server listening on http://{}", addr);
            axum::serve(listener, app).await?;
        }
    }

    Ok(())
}
