use clap::Parser;
use std::path::PathBuf;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use warden_core::WardenConfig;
use warden_server::{AppState, create_router};

#[derive(Parser, Debug)]
#[command(name = "warden", version, about = "Delegated-authorization gateway")]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(long, env = "WARDEN_CONFIG", default_value = "warden.yaml")]
    config: PathBuf,

    /// Override the listen address from the configuration.
    #[arg(long)]
    listen: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = WardenConfig::from_file(&cli.config)?;
    if let Some(listen) = cli.listen {
        config.server.listen = listen;
    }

    let state = AppState::init(&config).await?;
    let app = create_router(state.clone()).layer(TraceLayer::new_for_http());

    let addr = config.server.listen.clone();
    tracing::info!("warden listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
