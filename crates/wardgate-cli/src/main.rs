//! wardgate daemon: execution gateway for AI agents.
//!
//! Startup order matters: configuration is validated before anything
//! else exists, the store is reconciled before the listener opens, and
//! shutdown resolves every remaining approval before the messenger
//! stops. A `ConfigError` anywhere aborts with a non-zero exit and no
//! partially started services.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use wardgate_config::{load_config, load_permissions, ConfigError};
use wardgate_core::{MessengerAdapter, ServiceHandler};
use wardgate_gateway::rate_limit::RateLimiter;
use wardgate_gateway::server::load_tls_acceptor;
use wardgate_gateway::{GatewayServer, Orchestrator};
use wardgate_policy::PermissionEngine;
use wardgate_services::{Executor, HomeAssistantService};
use wardgate_storage::Database;
use wardgate_telegram::TelegramAdapter;

/// Execution gateway mediating between AI agents and privileged services.
#[derive(Debug, Parser)]
#[command(name = "wardgate", version, about)]
struct Cli {
    /// Allow a plaintext WebSocket listener (no TLS).
    #[arg(long)]
    insecure: bool,

    /// Runtime configuration document.
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    /// Permission policy document.
    #[arg(long, default_value = "permissions.toml")]
    permissions: PathBuf,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "failed to start runtime");
            return ExitCode::FAILURE;
        },
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if let Some(config_error) = e.downcast_ref::<ConfigError>() {
                error!("configuration error: {config_error}");
            } else {
                error!("fatal: {e}");
            }
            ExitCode::FAILURE
        },
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    // 1. Configuration and policy. Any failure here is fatal before a
    //    single socket or file is touched.
    let config = load_config(&cli.config)?;
    let permissions = load_permissions(&cli.permissions)?;
    let engine = PermissionEngine::new(&permissions)?;

    // 2. TLS posture. Plaintext is an explicit operator decision.
    let tls = match (&config.gateway.tls, cli.insecure) {
        (Some(tls_config), _) => Some(load_tls_acceptor(&tls_config.cert, &tls_config.key)?),
        (None, true) => {
            warn!("running with a plaintext listener (--insecure)");
            None
        },
        (None, false) => {
            anyhow::bail!(
                "TLS is not configured; refusing to start a plaintext listener without --insecure"
            );
        },
    };

    // 3. Durable store.
    let db = Database::open(&config.storage.path).await?;

    // 4. Services. An unreachable service is a warning, not a refusal:
    //    the operator may be bringing things up in either order.
    let ha = Arc::new(HomeAssistantService::new(&config.services.homeassistant)?);
    if !ha.health_check().await {
        warn!("Home Assistant is unreachable; continuing anyway");
    }
    let mut services: HashMap<String, Arc<dyn ServiceHandler>> = HashMap::new();
    services.insert("homeassistant".to_string(), ha.clone() as _);
    let executor = Executor::new(services);

    // 5. Messenger.
    let telegram_config = config
        .messenger
        .telegram
        .as_ref()
        .ok_or_else(|| ConfigError::Invalid("messenger.telegram section is required".into()))?;
    let messenger: Arc<dyn MessengerAdapter> = Arc::new(TelegramAdapter::new(telegram_config));

    // 6. Orchestrator, wired to everything above.
    let orchestrator = Arc::new(Orchestrator::new(
        engine,
        executor,
        Arc::clone(&messenger),
        db.clone(),
        RateLimiter::new(&config.rate_limit),
        Duration::from_secs(config.approval_timeout),
    ));
    messenger.set_callback(orchestrator.approval_callback()).await;

    // 7. Reconcile approvals left over from a previous run, then start
    //    listening for guardian decisions.
    let (expired, rearmed) = orchestrator.recover().await?;
    if expired > 0 || rearmed > 0 {
        info!(expired, rearmed, "previous-run approvals reconciled");
    }
    messenger
        .start()
        .await
        .map_err(|e| anyhow::anyhow!("failed to start messenger: {e}"))?;

    // 8. Listener.
    let listener = TcpListener::bind((config.gateway.host.as_str(), config.gateway.port)).await?;
    let server = GatewayServer::new(orchestrator.clone(), config.agent.token.clone(), tls);
    let (stop_tx, stop_rx) = watch::channel(false);

    let serve = tokio::spawn({
        let server = Arc::new(server);
        async move { server.serve(listener, stop_rx).await }
    });

    wait_for_shutdown_signal().await;
    info!("shutting down");
    let _ = stop_tx.send(true);
    match serve.await {
        Ok(Ok(())) => {},
        Ok(Err(e)) => warn!(error = %e, "listener ended with error"),
        Err(e) => warn!(error = %e, "listener task ended abnormally"),
    }

    // 9. Graceful teardown: sweep approvals first so every suspended
    //    agent request gets an answer (live or queued), then quiesce the
    //    messenger and release transports.
    orchestrator.resolve_all_pending().await;
    messenger.stop().await;
    ha.close().await;
    db.close().await;
    info!("wardgate stopped");
    Ok(())
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                let _ = ctrl_c.await;
                return;
            },
        };
        tokio::select! {
            _ = ctrl_c => {},
            _ = sigterm.recv() => {},
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_defaults() {
        let cli = Cli::parse_from(["wardgate"]);
        assert!(!cli.insecure);
        assert_eq!(cli.config, PathBuf::from("config.toml"));
        assert_eq!(cli.permissions, PathBuf::from("permissions.toml"));
    }

    #[test]
    fn cli_flags_parse() {
        let cli = Cli::parse_from([
            "wardgate",
            "--insecure",
            "--config",
            "/etc/wardgate/config.toml",
            "--permissions",
            "/etc/wardgate/permissions.toml",
        ]);
        assert!(cli.insecure);
        assert_eq!(cli.config, PathBuf::from("/etc/wardgate/config.toml"));
    }
}
