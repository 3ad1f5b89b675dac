use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use gatehouse::admission::{AdmissionController, AdmissionPolicy};
use gatehouse::config::GatehouseConfig;
use gatehouse::grpc::GrpcServer;

/// Admission control sidecar for the social web application.
#[derive(Parser, Debug)]
#[command(name = "gatehouse")]
#[command(version, about = "Request admission control and abuse mitigation service")]
struct Args {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the gRPC listen address
    #[arg(long)]
    grpc_addr: Option<SocketAddr>,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if args.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_thread_ids(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .init();
    }

    info!("Starting Gatehouse Admission Service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = GatehouseConfig::load(args.config.as_deref())?;
    if let Some(addr) = args.grpc_addr {
        config.server.grpc_addr = addr;
    }
    info!(
        grpc_addr = %config.server.grpc_addr,
        cooldown_ms = config.admission.cooldown_ms,
        upload_limit = config.admission.upload_limit,
        upload_window_secs = config.admission.upload_window_secs,
        max_login_attempts = config.admission.max_login_attempts,
        login_cooldown_secs = config.admission.login_cooldown_secs,
        "Configuration loaded"
    );

    // One controller for the whole process, shared by every request
    let controller = Arc::new(AdmissionController::new(AdmissionPolicy::from_config(
        &config.admission,
    )));
    let sweeper = controller.spawn_sweeper(config.admission.sweep_interval());
    info!(
        interval_secs = config.admission.sweep_interval_secs,
        "Admission controller initialized"
    );

    #[cfg(unix)]
    let reloader = tokio::spawn(reload_on_hangup(args.config.clone(), controller.clone()));

    let grpc_server = GrpcServer::new(config.server.grpc_addr, controller);

    // Run the server with graceful shutdown on Ctrl+C
    let served = grpc_server.serve_with_shutdown(shutdown_signal()).await;

    sweeper.abort();
    #[cfg(unix)]
    reloader.abort();

    served?;
    info!("Gatehouse Admission Service stopped");
    Ok(())
}

/// Reload the admission policy from configuration on SIGHUP.
///
/// Recorded limiter state survives a reload; only thresholds change.
#[cfg(unix)]
async fn reload_on_hangup(path: Option<PathBuf>, controller: Arc<AdmissionController>) {
    let mut hangup = match signal::unix::signal(signal::unix::SignalKind::hangup()) {
        Ok(hangup) => hangup,
        Err(e) => {
            warn!(error = %e, "Failed to install SIGHUP handler, policy reload disabled");
            return;
        }
    };

    while hangup.recv().await.is_some() {
        match GatehouseConfig::load(path.as_deref()) {
            Ok(config) => {
                controller.set_policy(AdmissionPolicy::from_config(&config.admission));
                info!("Admission policy reloaded");
            }
            Err(e) => warn!(error = %e, "Failed to reload configuration, keeping current policy"),
        }
    }
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
