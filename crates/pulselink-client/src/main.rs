//! pulselink probe
//!
//! Opens one signaling session against a real endpoint and logs traffic.
//! - config path: first argument (default `pulselink.yaml`)
//! - identity: `PULSELINK_USER`, `PULSELINK_TOKEN`
//! - incoming offers are logged; there is no media stack here

use std::process::ExitCode;
use std::sync::Arc;

use tracing_subscriber::{fmt, EnvFilter};

use pulselink_client::{config, transport::WsConnector, RealtimeClient};

#[tokio::main]
async fn main() -> ExitCode {
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let path = std::env::args().nth(1).unwrap_or_else(|| "pulselink.yaml".into());
    let cfg = match config::load_from_file(&path) {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::error!(%path, error = %e, "config load failed");
            return ExitCode::FAILURE;
        }
    };
    let (Ok(user), Ok(token)) = (std::env::var("PULSELINK_USER"), std::env::var("PULSELINK_TOKEN"))
    else {
        tracing::error!("PULSELINK_USER and PULSELINK_TOKEN must be set");
        return ExitCode::FAILURE;
    };

    let client = RealtimeClient::new(cfg, user, Arc::new(WsConnector::new()));
    let _all = client.connection().on_any(|env| {
        tracing::info!(kind = %env.kind(), timestamp = env.timestamp, "inbound");
    });
    client.router().on_incoming_call(|signal| {
        tracing::info!(call_id = %signal.call_id(), from = ?signal.from_user_id(), "incoming call (no media stack)");
    });

    let mut status = client.connection().status();
    tokio::spawn(async move {
        while status.changed().await.is_ok() {
            let current = status.borrow_and_update().clone();
            tracing::info!(status = ?current, "connectivity");
        }
    });

    tracing::info!(%path, "pulselink probe starting");
    if let Err(e) = client.connect(token).await {
        tracing::error!(error = %e, class = e.class().as_str(), "connect failed");
        return ExitCode::FAILURE;
    }

    shutdown_signal().await;
    client.logout().await;
    tracing::info!(metrics = %client.metrics().render(), "pulselink probe stopped");
    ExitCode::SUCCESS
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
