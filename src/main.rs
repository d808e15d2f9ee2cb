//! Herald campaign delivery worker.
//!
//! Main entry point for the worker process. Loads configuration, prepares
//! the database, wires the campaign processor to the job queue, and runs
//! until a shutdown signal arrives.

mod config;

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use herald_core::{storage::Storage, Clock, MulticastPublisher, RealClock};
use herald_delivery::{
    CampaignProcessor, CampaignWorker, CloudApiGateway, PgJobQueue, PgNotifyPublisher,
    PostgresCampaignStore,
};
use sqlx::postgres::PgPoolOptions;
use tracing::{error, info, warn};

use crate::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;

    init_tracing(&config)?;

    info!("Starting Herald campaign worker");
    info!(
        database_url = %config.database_url_masked(),
        max_connections = config.database_max_connections,
        rate_limit_strategy = %config.rate_limit_strategy,
        max_template_params = config.max_template_params,
        "Configuration loaded"
    );

    let db_pool = create_database_pool(&config).await?;
    let storage = Arc::new(Storage::new(db_pool.clone()));
    storage.health_check().await.context("Database health check failed")?;
    info!("Database connection pool established");

    run_migrations(&db_pool).await?;
    info!("Database migrations completed");

    let mut worker = build_worker(&config, storage)?;
    worker.start().context("Failed to start campaign worker")?;

    info!("Herald is ready to process campaigns");

    shutdown_signal().await;
    info!("Shutdown signal received, starting graceful shutdown");

    if let Err(e) = worker.shutdown().await {
        error!(error = %e, "Campaign worker did not stop cleanly");
    }

    db_pool.close().await;
    info!("Database connections closed");

    info!("Herald shutdown complete");
    Ok(())
}

/// Initializes tracing with environment-based configuration.
///
/// `RUST_LOG` from the process environment wins; otherwise the configured
/// level is used with debug output for Herald's own crates.
fn init_tracing(config: &Config) -> Result<()> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| {
            EnvFilter::try_new(format!(
                "{},herald=debug,herald_core=debug,herald_delivery=debug",
                config.rust_log
            ))
        })
        .context("Invalid log filter")?;

    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry().with(filter).with(fmt_layer).init();
    Ok(())
}

/// Creates the database connection pool with retry logic.
async fn create_database_pool(config: &Config) -> Result<sqlx::PgPool> {
    let mut retries = 0;
    const MAX_RETRIES: u32 = 5;
    const RETRY_DELAY: Duration = Duration::from_secs(2);

    loop {
        match PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .min_connections(config.database_min_connections)
            .acquire_timeout(Duration::from_secs(config.database_connection_timeout))
            .idle_timeout(Duration::from_secs(600))
            .max_lifetime(Duration::from_secs(1800))
            .connect(&config.database_url)
            .await
        {
            Ok(pool) => return Ok(pool),
            Err(e) if retries < MAX_RETRIES => {
                retries += 1;
                warn!(
                    attempt = retries,
                    max_retries = MAX_RETRIES,
                    error = %e,
                    "Database connection failed, retrying..."
                );
                tokio::time::sleep(RETRY_DELAY).await;
            },
            Err(e) => {
                return Err(e).context("Failed to create database connection pool after retries");
            },
        }
    }
}

/// Wires storage, gateway, publishers and the rate limiter into a worker.
fn build_worker(config: &Config, storage: Arc<Storage>) -> Result<CampaignWorker> {
    let clock: Arc<dyn Clock> = Arc::new(RealClock::new());

    let gateway = CloudApiGateway::new(config.to_gateway_config())
        .context("Failed to build gateway client")?;

    let mut publisher = MulticastPublisher::new();
    publisher.add_publisher(Arc::new(PgNotifyPublisher::with_channel(
        storage.pool(),
        config.stats_channel.clone(),
    )));

    let limiter = config
        .rate_limit()?
        .build(clock.clone())
        .context("Failed to build rate limiter")?;

    let processor_config = config.to_processor_config();
    info!(worker_id = %processor_config.worker_id, "Campaign processor configured");

    let processor = CampaignProcessor::new(
        Arc::new(PostgresCampaignStore::new(storage.clone())),
        Arc::new(gateway),
        Arc::new(publisher),
        limiter,
        clock.clone(),
        processor_config,
    );

    let queue = PgJobQueue::new(storage, clock.clone())
        .with_visibility_timeout(config.job_visibility_timeout());

    Ok(CampaignWorker::new(
        Arc::new(queue),
        Arc::new(processor),
        clock,
        config.to_worker_config(),
    ))
}

/// Schema statements applied at startup, in order.
const MIGRATIONS: &[(&str, &str)] = &[
    (
        "campaigns",
        r#"
        CREATE TABLE IF NOT EXISTS campaigns (
            id UUID PRIMARY KEY,
            organization_id UUID NOT NULL,
            name TEXT NOT NULL,
            account_name TEXT NOT NULL,
            template_id UUID NOT NULL,
            status TEXT NOT NULL DEFAULT 'queued',
            total_recipients INTEGER NOT NULL DEFAULT 0,
            sent_count INTEGER NOT NULL DEFAULT 0,
            failed_count INTEGER NOT NULL DEFAULT 0,
            started_at TIMESTAMPTZ,
            completed_at TIMESTAMPTZ,
            lease_owner TEXT,
            lease_expires_at TIMESTAMPTZ,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    ),
    (
        "templates",
        r#"
        CREATE TABLE IF NOT EXISTS templates (
            id UUID PRIMARY KEY,
            organization_id UUID NOT NULL,
            name TEXT NOT NULL,
            language TEXT NOT NULL,
            body_content TEXT NOT NULL DEFAULT '',
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    ),
    (
        "accounts",
        r#"
        CREATE TABLE IF NOT EXISTS accounts (
            id UUID PRIMARY KEY,
            organization_id UUID NOT NULL,
            name TEXT NOT NULL,
            phone_id TEXT NOT NULL,
            business_id TEXT NOT NULL,
            api_version TEXT NOT NULL,
            access_token TEXT NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            UNIQUE (organization_id, name)
        )
        "#,
    ),
    (
        "campaign_recipients",
        r#"
        CREATE TABLE IF NOT EXISTS campaign_recipients (
            id UUID PRIMARY KEY,
            campaign_id UUID NOT NULL REFERENCES campaigns(id) ON DELETE CASCADE,
            phone_number TEXT NOT NULL,
            recipient_name TEXT NOT NULL DEFAULT '',
            template_params JSONB NOT NULL DEFAULT '{}',
            status TEXT NOT NULL DEFAULT 'pending',
            error_message TEXT,
            provider_message_id TEXT,
            sent_at TIMESTAMPTZ,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    ),
    (
        "campaign_recipients index",
        r#"
        CREATE INDEX IF NOT EXISTS idx_campaign_recipients_pending
        ON campaign_recipients(campaign_id, status, created_at)
        "#,
    ),
    (
        "contacts",
        r#"
        CREATE TABLE IF NOT EXISTS contacts (
            id UUID PRIMARY KEY,
            organization_id UUID NOT NULL,
            phone_number TEXT NOT NULL,
            profile_name TEXT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            UNIQUE (organization_id, phone_number)
        )
        "#,
    ),
    (
        "messages",
        r#"
        CREATE TABLE IF NOT EXISTS messages (
            id UUID PRIMARY KEY,
            organization_id UUID NOT NULL,
            account_name TEXT NOT NULL,
            contact_id UUID NOT NULL REFERENCES contacts(id),
            provider_message_id TEXT,
            direction TEXT NOT NULL,
            message_type TEXT NOT NULL,
            template_name TEXT,
            template_params JSONB NOT NULL DEFAULT '{}',
            content TEXT NOT NULL,
            status TEXT NOT NULL,
            error_message TEXT,
            metadata JSONB NOT NULL DEFAULT '{}',
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    ),
    (
        "campaign_jobs",
        r#"
        CREATE TABLE IF NOT EXISTS campaign_jobs (
            id UUID PRIMARY KEY,
            payload JSONB NOT NULL,
            attempts INTEGER NOT NULL DEFAULT 0,
            locked_until TIMESTAMPTZ,
            enqueued_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    ),
    (
        "campaign_jobs index",
        r#"
        CREATE INDEX IF NOT EXISTS idx_campaign_jobs_visible
        ON campaign_jobs(enqueued_at)
        WHERE locked_until IS NULL
        "#,
    ),
];

/// Runs database migrations.
// TODO: Move to sqlx::migrate! once the schema is shared with the campaign API.
async fn run_migrations(pool: &sqlx::PgPool) -> Result<()> {
    for (name, statement) in MIGRATIONS {
        sqlx::query(*statement)
            .execute(pool)
            .await
            .with_context(|| format!("Failed to apply {name} migration"))?;
    }

    Ok(())
}

/// Waits for shutdown signal (CTRL+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received CTRL+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}
