// Main entry point for the harvester service

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use harvester_core::kernel::{
    Consumer, ConsumerConfig, Coordinator, CoordinatorConfig, PgStateStore, PgWorkQueue, Seeder,
    SeederConfig, StateStore, WorkQueue,
};
use harvester_core::server::{build_app, AppState};
use harvester_core::Config;
use registry_extraction::{Engine, Extractor, HttpDriver};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,harvester_core=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Licensing Record Harvester");

    let config = Config::from_env().context("Failed to load configuration")?;
    tracing::info!("Configuration loaded");

    tracing::info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    tracing::info!("Database connected");

    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run migrations")?;
    tracing::info!("Migrations complete");

    let store: Arc<dyn StateStore> =
        Arc::new(PgStateStore::new(pool.clone(), config.requests_per_second));
    let queue: Arc<dyn WorkQueue> = Arc::new(PgWorkQueue::new(pool.clone(), config.max_retries));

    let driver = HttpDriver::new(Duration::from_secs(30))
        .context("Failed to build HTTP driver")?;
    let extractor: Arc<dyn Extractor> = Arc::new(Engine::new(driver));

    let seeder = Arc::new(Seeder::new(
        store.clone(),
        queue.clone(),
        SeederConfig {
            jurisdiction: config.jurisdiction.clone(),
            localities: config.localities.clone(),
            professions: config.professions.clone(),
            refresh_after_secs: config.refresh_after_secs,
            max_retries: config.max_retries,
            requests_per_second: config.requests_per_second,
        },
    ));

    // Consumers: each runs its own poll loop against the shared queue.
    for i in 0..config.consumer_count {
        let consumer = Consumer::new(
            store.clone(),
            queue.clone(),
            extractor.clone(),
            ConsumerConfig {
                batch_size: config.batch_size,
                poll_interval: Duration::from_secs(config.poll_interval_secs),
                extract_timeout: Duration::from_secs(config.extract_timeout_secs),
                max_retries: config.max_retries,
                result_limit: config.result_limit,
                ..ConsumerConfig::default()
            },
        );
        tracing::info!(index = i, "spawning consumer");
        tokio::spawn(async move {
            if let Err(e) = consumer.run_until_shutdown().await {
                tracing::error!(error = %e, "consumer exited with error");
            }
        });
    }

    // Coordinator: periodic seed/alert pass on a cron cadence.
    let coordinator = Arc::new(Coordinator::new(
        store.clone(),
        queue.clone(),
        seeder.clone(),
        CoordinatorConfig {
            queue_low_water_mark: config.queue_low_water_mark,
            cadence: config.coordinator_cadence.clone(),
            ..CoordinatorConfig::default()
        },
    ));
    let _scheduler = coordinator
        .start()
        .await
        .context("Failed to start coordinator")?;

    let app = build_app(AppState {
        db_pool: pool,
        store,
        queue,
        seeder,
    });

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("Starting server on {}", addr);
    tracing::info!("Health check: http://localhost:{}/health", config.port);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}
