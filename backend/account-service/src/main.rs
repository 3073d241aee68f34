/// Account Service Main Entry Point
///
/// Starts:
/// - PostgreSQL connection pool (+ migrations)
/// - Kafka publisher
/// - Outbox relay (background task)
///
/// The services are assembled here so a transport layer can be mounted on top of them.
use std::sync::Arc;

use account_service::{
    config::Settings,
    db::PgUserRepository,
    security::{JwtTokenIssuer, TotpEngine},
    services::{spawn_outbox_relay, AccountService, AuthPolicy, AuthService, TwoFaService},
};
use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use transactional_outbox::{metrics::OutboxMetrics, KafkaPublisher, PgOutboxStore};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                EnvFilter::new("account_service=info,transactional_outbox=info,info")
            }),
        )
        .with_target(false)
        .json()
        .init();

    info!("Starting Account Service");

    let settings = Settings::load().context("Failed to load configuration")?;
    info!("Configuration loaded successfully");

    let db_pool = PgPoolOptions::new()
        .max_connections(settings.database.max_connections)
        .min_connections(settings.database.min_connections)
        .acquire_timeout(settings.database.acquire_timeout)
        .connect(&settings.database.url)
        .await
        .context("Failed to connect to PostgreSQL")?;

    info!(
        "Database pool initialized with {} max connections",
        settings.database.max_connections
    );

    sqlx::migrate!("./migrations")
        .run(&db_pool)
        .await
        .context("Failed to run database migrations")?;
    info!("Database migrations completed");

    let tokens = Arc::new(
        JwtTokenIssuer::from_keys(&settings.jwt.keys).context("Failed to initialize JWT keys")?,
    );
    let otp = Arc::new(TotpEngine::from_settings(&settings.otp));
    let users = Arc::new(PgUserRepository::new(db_pool.clone()));

    let _account_service = AccountService::new(users.clone());
    let _auth_service = AuthService::new(
        users.clone(),
        tokens,
        otp.clone(),
        AuthPolicy::from_settings(&settings.jwt, &settings.otp),
    );
    let _two_fa_service = TwoFaService::new(users, otp, settings.otp.recovery_code_count);
    info!(otp_enabled = settings.otp.enabled, "Account services initialized");

    let relay = if settings.kafka.brokers.is_empty() {
        warn!("Kafka brokers not configured; outbox events will accumulate unpublished");
        None
    } else {
        let publisher = KafkaPublisher::from_brokers(
            &settings.kafka.brokers.join(","),
            settings.kafka.topic_prefix.clone(),
            settings.kafka.producer_timeout,
        )
        .context("Failed to initialize Kafka producer")?;

        let metrics = match OutboxMetrics::new("account-service") {
            Ok(metrics) => Some(metrics),
            Err(e) => {
                warn!(error = %e, "Outbox metrics unavailable");
                None
            }
        };

        info!("Starting outbox relay");
        Some(spawn_outbox_relay(
            Arc::new(PgOutboxStore::new(db_pool.clone())),
            Arc::new(publisher),
            settings.outbox.tick,
            metrics,
        ))
    };

    shutdown_signal().await;

    if let Some(relay) = relay {
        relay.shutdown().await;
    }
    db_pool.close().await;

    info!("Account service shutdown complete");

    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}
