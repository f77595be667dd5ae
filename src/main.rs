// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::{net::SocketAddr, sync::Arc};

use axum_server::tls_rustls::RustlsConfig;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use identity_graph_server::{
    address::oauth::OAuthProviders,
    api::router,
    clock::SystemClock,
    config::{AppConfig, LogFormat},
    state::AppState,
};

#[tokio::main]
async fn main() {
    let config = AppConfig::from_env().expect("Invalid configuration");
    init_tracing(config.log_format);

    let state = AppState::from_config(&config, OAuthProviders::from_env(), Arc::new(SystemClock))
        .expect("Failed to initialize application state");

    let shutdown = CancellationToken::new();
    let sweeper = tokio::spawn(
        state
            .sweeper(config.alarm_poll_interval)
            .run(shutdown.clone()),
    );

    let app = router(state);
    let addr: SocketAddr = config
        .bind_address()
        .parse()
        .expect("Failed to parse bind address");

    match &config.tls {
        Some(tls) => {
            // Install the ring crypto provider for rustls (must be done before any TLS operations)
            rustls::crypto::ring::default_provider()
                .install_default()
                .expect("Failed to install rustls crypto provider");
            let tls_config = RustlsConfig::from_pem_file(&tls.cert, &tls.key)
                .await
                .expect("Failed to load TLS certificate and key");

            tracing::info!(%addr, "Identity graph server listening on https (docs at /docs)");
            tokio::select! {
                result = axum_server::bind_rustls(addr, tls_config).serve(app.into_make_service()) => {
                    result.expect("HTTPS server failed");
                }
                _ = shutdown_signal() => {}
            }
        }
        None => {
            let listener = tokio::net::TcpListener::bind(addr)
                .await
                .expect("Failed to bind listener");
            tracing::info!(%addr, "Identity graph server listening on http (docs at /docs)");
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .await
                .expect("HTTP server failed");
        }
    }

    shutdown.cancel();
    if let Err(e) = sweeper.await {
        tracing::warn!(error = %e, "Alarm sweeper task ended abnormally");
    }
    tracing::info!("Identity graph server stopped");
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(fmt::layer()).init(),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down"),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}
