use axum::{routing::get, Router};
use hive_ingestor::anomaly::DeltaThresholds;
use hive_ingestor::config::Config;
use hive_ingestor::db::PgStore;
use hive_ingestor::memory::MemoryStore;
use hive_ingestor::pipeline::{self, Pipeline};
use hive_ingestor::publish::Publisher;
use hive_ingestor::resolve::RouterTypeTable;
use hive_ingestor::storage::Storage;
use hive_ingestor::transport::{self, TransportConfig};
use hive_ingestor::{metrics, rest};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let config = Config::from_env();

    info!("Starting hive telemetry ingestor");
    info!("Transport: {}", config.transport.transport_id());
    info!("HTTP server: {}", config.http_addr);

    metrics::init_metrics();

    match &config.database_url {
        Some(url) => {
            info!("Storage: postgres ({})", url.split('@').last().unwrap_or("***"));
            let store = match PgStore::connect(url).await {
                Ok(store) => Arc::new(store),
                Err(e) => {
                    error!("Failed to connect to database: {}", e);
                    std::process::exit(1);
                }
            };
            run(config, store).await;
        }
        None => {
            info!("Storage: in-memory (no DATABASE_URL set)");
            let store = MemoryStore::new();
            for (router_id, owner) in &config.router_owners {
                store.seed_owner(router_id, owner.clone());
            }
            run(config, Arc::new(store)).await;
        }
    }
}

async fn run<S: Storage>(config: Config, store: Arc<S>) {
    let publisher = Arc::new(Publisher::new(config.subscriber_capacity));
    let pipeline = Arc::new(Pipeline::new(
        store.clone(),
        RouterTypeTable::default(),
        publisher.clone(),
        DeltaThresholds::with_overrides(&config.delta_overrides),
        config.history,
    ));

    let (tx, rx) = mpsc::channel(config.channel_capacity);

    let reader_handle = match config.transport {
        // No reader; park the sender so the worker channel stays open for
        // HTTP ingestion.
        TransportConfig::HttpOnly => tokio::spawn(async move {
            let _tx = tx;
            std::future::pending::<()>().await
        }),
        transport_config => {
            let settings = config.reader;
            let reader_publisher = publisher.clone();
            tokio::spawn(async move {
                transport::run_reader(transport_config, settings, tx, reader_publisher).await;
            })
        }
    };

    let worker_pipeline = pipeline.clone();
    let worker_handle = tokio::spawn(async move {
        pipeline::run_worker(rx, worker_pipeline).await;
    });

    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .merge(rest::create_router(pipeline, store));

    let listener = tokio::net::TcpListener::bind(&config.http_addr)
        .await
        .unwrap_or_else(|e| {
            error!("Failed to bind to {}: {}", config.http_addr, e);
            std::process::exit(1);
        });

    info!("HTTP server listening on {}", config.http_addr);

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap_or_else(|e| {
            error!("HTTP server error: {}", e);
        });
    });

    tokio::select! {
        _ = reader_handle => {
            error!("Transport reader terminated");
        }
        _ = worker_handle => {
            error!("Pipeline worker terminated");
        }
        _ = server_handle => {
            error!("HTTP server terminated");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    info!("Shutting down");
}

async fn metrics_handler() -> String {
    metrics::gather_metrics()
}
