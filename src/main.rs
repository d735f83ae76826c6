use std::sync::Arc;

use clap::Parser;
use gcp_secrets_provider::auth::{KubeTokenSource, TokenSource, UnavailableTokenSource};
use gcp_secrets_provider::cli::Cli;
use gcp_secrets_provider::observability::{init_logging, init_metrics};
use gcp_secrets_provider::server::ProviderService;
use gcp_secrets_provider::{ProviderError, Result, Settings, APP_NAME, VERSION};
use tokio::net::UnixListener;
use tokio::signal;
use tokio_stream::wrappers::UnixListenerStream;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level, cli.log_json);

    info!(app_name = APP_NAME, version = VERSION, "Starting secrets provider");

    if let Some(addr) = cli.metrics_addr {
        init_metrics(addr)?;
    }

    let settings = Arc::new(Settings::from_env());
    info!(
        provider_name = %settings.provider_name,
        token_exchange_endpoint = %settings.token_exchange_endpoint,
        allow_node_publish_secret = settings.allow_node_publish_secret,
        "Loaded configuration from environment"
    );

    // Mounts using ambient or node-publish auth still work without a cluster
    // API; pod workload identity will report the recorded cause instead.
    let tokens: Arc<dyn TokenSource> = match KubeTokenSource::new().await {
        Ok(source) => Arc::new(source),
        Err(e) => {
            warn!(error = %e, "kubernetes client unavailable, pod workload identity disabled");
            Arc::new(UnavailableTokenSource::new(e.to_string()))
        }
    };

    let service = ProviderService::new(settings, tokens)?;

    // A stale socket from a previous run would make bind fail.
    if cli.socket_path.exists() {
        std::fs::remove_file(&cli.socket_path)?;
    }
    if let Some(parent) = cli.socket_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let listener = UnixListener::bind(&cli.socket_path)?;
    info!(socket_path = %cli.socket_path.display(), "Listening for driver connections");

    tonic::transport::Server::builder()
        .add_service(service.into_server())
        .serve_with_incoming_shutdown(UnixListenerStream::new(listener), shutdown_signal())
        .await
        .map_err(|e| ProviderError::transport(format!("gRPC server failed: {}", e)))?;

    info!("Shutting down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("install ctrl-c handler");
    };
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("install SIGTERM handler")
            .recv()
            .await;
    };
    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
