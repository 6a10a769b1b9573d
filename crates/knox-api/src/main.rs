//! Knox store REST API server.

use knox_api::server::{self, AppState};
use knox_ingest::QueueIngestor;
use knox_store::StoreRouter;
use knox_types::DbConfig;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cfg = DbConfig::from_env()?;
    let store = Arc::new(StoreRouter::connect(&cfg).await?);
    let schema = store.ensure_schema().await;
    if !schema.failed.is_empty() {
        tracing::warn!(failed = schema.failed.len(), "some tables could not be created");
    }

    let ingestor = Arc::new(QueueIngestor::new(Arc::clone(&store)));
    let app = server::router(Arc::new(AppState { store, ingestor }));
    let addr: SocketAddr = std::env::var("KNOX_LISTEN")
        .unwrap_or_else(|_| "0.0.0.0:9089".to_string())
        .parse()?;
    tracing::info!("Knox API listening on {}", addr);
    axum::serve(
        tokio::net::TcpListener::bind(addr).await?,
        app.into_make_service(),
    )
    .await?;
    Ok(())
}
