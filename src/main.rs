use anyhow::{anyhow, Context};
use dotenvy::dotenv;
use log::{error, info};
use std::sync::Arc;
use tokio::net::TcpListener;

use deskserver::api_router::build_router;
use deskserver::classifier::LlmClassifier;
use deskserver::config::AppConfig;
use deskserver::generator::LlmAnswerGenerator;
use deskserver::kb::VectorRetriever;
use deskserver::llm::{LLMProvider, OpenAIClient};
use deskserver::shared::state::{AppState, Services};
use deskserver::shared::utils::{create_conn, run_migrations};
use deskserver::sla::SlaMonitor;
use deskserver::store::{PgStore, SupportStore};

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to install shutdown handler: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = AppConfig::from_env()?;
    info!("Starting deskserver {}", env!("CARGO_PKG_VERSION"));

    let pool = create_conn(&config.database.url, config.database.pool_size)
        .context("Failed to create database pool")?;
    run_migrations(&pool).map_err(|e| anyhow!("Failed to run migrations: {}", e))?;
    info!("Database ready");

    let llm: Arc<dyn LLMProvider> = Arc::new(OpenAIClient::new(&config.llm)?);
    let store: Arc<dyn SupportStore> = Arc::new(PgStore::new(pool.clone()));
    let services = Services {
        store: store.clone(),
        classifier: Arc::new(LlmClassifier::new(llm.clone())),
        retriever: Arc::new(VectorRetriever::new(llm.clone(), pool)),
        generator: Arc::new(LlmAnswerGenerator::new(llm)),
    };
    let state = Arc::new(AppState::new(services, &config));

    Arc::new(SlaMonitor::new(store, &config.sla)).spawn();
    state.sessions.spawn_pruner(config.session.ttl);

    let app = build_router(state, &config.cors_origins);
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Listening on {}", addr);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}
