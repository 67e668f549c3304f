// phonebill-kos
//
// Runs the KOS integration: orchestrators, background history writes and
// the reconciler. One-shot subcommands exercise a single flow against the
// configured KOS and print the answer as JSON.
//
// Decision: DATABASE_URL is optional; without it operations live in memory.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use phonebill_kos::{
    BillInquiryOrchestrator, BillQuery, HttpKosTransport, KosConfig, OperationRecorder,
    ProductChangeOrchestrator, ProductChangeQuery, Reconciler, ResilientClient,
};
use phonebill_resilience::cache::CacheBackend;
use phonebill_resilience::{
    AsyncOperationTracker, CacheStore, CircuitBreakerRegistry, InMemoryCacheBackend,
    InMemoryOperationStore, OperationStore, PostgresOperationStore, ResilienceConfig, WriteQueue,
};
use serde::Serialize;
use sqlx::PgPool;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "phonebill-kos")]
#[command(about = "Resilient KOS integration for bill inquiry and product change")]
#[command(version)]
struct Cli {
    /// Overrides KOS_BASE_URL
    #[arg(long, env = "KOS_BASE_URL")]
    kos_url: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the reconciler and write queue until interrupted (default)
    Serve,

    /// Probe KOS health
    Health,

    /// Inquire a bill
    Bill {
        /// Line number, dashes allowed
        #[arg(long)]
        line: String,

        /// Billing month, YYYY-MM
        #[arg(long)]
        month: String,

        #[arg(long)]
        request_id: Option<String>,
    },

    /// Change the product on a line
    Change {
        #[arg(long)]
        line: String,

        #[arg(long)]
        current: String,

        #[arg(long)]
        target: String,

        #[arg(long)]
        requestor: Option<String>,

        #[arg(long)]
        request_id: Option<String>,
    },

    /// Query an operation, re-probing KOS while it is processing
    Status {
        request_id: String,

        /// Operation type
        #[arg(long, default_value = "bill", value_parser = ["bill", "change"])]
        kind: String,
    },
}

/// Everything the commands need
struct App {
    client: Arc<ResilientClient>,
    bills: Arc<BillInquiryOrchestrator>,
    products: Arc<ProductChangeOrchestrator>,
    tracker: Arc<AsyncOperationTracker>,
    queue: Arc<WriteQueue>,
    kos: Arc<KosConfig>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let app = build(cli.kos_url).await?;

    let outcome = match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(&app).await,
        Command::Health => {
            let available = app.client.is_available().await;
            print_json(&serde_json::json!({ "available": available }))
        }
        Command::Bill {
            line,
            month,
            request_id,
        } => {
            let response = app
                .bills
                .inquire(request_id, &BillQuery::new(line, month))
                .await
                .context("bill inquiry failed")?;
            print_json(&response)
        }
        Command::Change {
            line,
            current,
            target,
            requestor,
            request_id,
        } => {
            let mut query = ProductChangeQuery::new(line, current, target);
            if let Some(requestor) = requestor {
                query = query.with_requestor(requestor);
            }
            let response = app
                .products
                .change(request_id, &query)
                .await
                .context("product change failed")?;
            print_json(&response)
        }
        Command::Status { request_id, kind } => {
            if kind == "change" {
                let response = app
                    .products
                    .status(&request_id)
                    .await
                    .context("status query failed")?;
                print_json(&response)
            } else {
                let response = app
                    .bills
                    .status(&request_id)
                    .await
                    .context("status query failed")?;
                print_json(&response)
            }
        }
    };

    if let Err(e) = app.queue.shutdown().await {
        tracing::warn!(error = %e, "write queue did not drain cleanly");
    }
    outcome
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        EnvFilter::new(format!(
            "phonebill_kos={level},phonebill_resilience={level}"
        ))
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

async fn build(kos_url: Option<String>) -> Result<App> {
    let resilience = ResilienceConfig::from_env().context("invalid resilience configuration")?;
    let mut kos = KosConfig::from_env().context("invalid KOS configuration")?;
    if let Some(url) = kos_url {
        kos.base_url = url.trim_end_matches('/').to_string();
        kos.validate().context("invalid KOS base URL")?;
    }
    let kos = Arc::new(kos);

    tracing::info!(
        base_url = %kos.base_url,
        call_timeout_ms = resilience.timeout.call_timeout().as_millis() as u64,
        retry_attempts = resilience.retry.max_attempts,
        max_concurrent_calls = resilience.max_concurrent_calls,
        "phonebill-kos starting"
    );

    let store = operation_store().await?;
    let tracker = Arc::new(AsyncOperationTracker::new(store));
    let queue = Arc::new(WriteQueue::start(resilience.history_queue.clone()));
    let recorder = OperationRecorder::new(tracker.clone(), queue.clone());

    let cache = Arc::new(CacheStore::new(cache_backend().await?));
    let breakers = Arc::new(CircuitBreakerRegistry::new(
        resilience.circuit_breaker.clone(),
    ));
    let transport = HttpKosTransport::new(&kos, resilience.timeout.connect_timeout)
        .context("failed to build KOS transport")?;
    let client = Arc::new(ResilientClient::new(
        Arc::new(transport),
        breakers,
        &resilience,
        kos.clone(),
    ));

    let bills = Arc::new(BillInquiryOrchestrator::new(
        client.clone(),
        cache.clone(),
        recorder.clone(),
    ));
    let products = Arc::new(ProductChangeOrchestrator::new(
        client.clone(),
        cache,
        recorder,
    ));

    Ok(App {
        client,
        bills,
        products,
        tracker,
        queue,
        kos,
    })
}

async fn operation_store() -> Result<Arc<dyn OperationStore>> {
    match std::env::var("DATABASE_URL") {
        Ok(url) => {
            let pool = PgPool::connect(&url)
                .await
                .context("Failed to connect to database")?;
            let store = PostgresOperationStore::new(pool);
            store.migrate().await.context("Failed to run migrations")?;
            tracing::info!("Connected to database");
            Ok(Arc::new(store))
        }
        Err(_) => {
            tracing::warn!("DATABASE_URL not set, operations are kept in memory");
            Ok(Arc::new(InMemoryOperationStore::new()))
        }
    }
}

#[cfg(feature = "redis")]
async fn cache_backend() -> Result<Arc<dyn CacheBackend>> {
    use phonebill_resilience::cache::RedisCacheBackend;

    match std::env::var("REDIS_URL") {
        Ok(url) => {
            let backend = RedisCacheBackend::connect(&url, "phonebill")
                .await
                .context("Failed to connect to Redis")?;
            tracing::info!("Connected to Redis");
            Ok(Arc::new(backend))
        }
        Err(_) => Ok(Arc::new(InMemoryCacheBackend::new())),
    }
}

#[cfg(not(feature = "redis"))]
async fn cache_backend() -> Result<Arc<dyn CacheBackend>> {
    Ok(Arc::new(InMemoryCacheBackend::new()))
}

async fn serve(app: &App) -> Result<()> {
    if app.client.is_available().await {
        tracing::info!("KOS is reachable");
    } else {
        tracing::warn!("KOS health probe failed, calls will degrade until it recovers");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let reconciler = Reconciler::new(
        app.tracker.clone(),
        app.kos.reconcile_interval,
        app.kos.reconcile_batch_size,
    )
    .with_probe(app.bills.clone())
    .with_probe(app.products.clone());
    let reconciler = tokio::spawn(reconciler.run(shutdown_rx));

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("Received shutdown signal");

    shutdown_tx.send(true).ok();
    reconciler.await.context("reconciler task panicked")?;
    tracing::info!(stats = ?app.queue.stats(), "shutdown complete");
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
