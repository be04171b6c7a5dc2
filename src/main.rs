use estatehub_backend::api::{self, verification::VerificationService};
use estatehub_backend::config::Settings;
use estatehub_backend::database::{ConfirmationStore, InMemoryConfirmationStore};
use estatehub_backend::logging::init_tracing;
use estatehub_backend::payments::PaystackGateway;
use estatehub_backend::verification::clock::{SystemClock, TokioScheduler};
use estatehub_backend::verification::{TransactionReferenceResolver, VerificationStateMachine};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    info!("Starting EstateHub payment verification service");

    let settings = Settings::load().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    let store = init_store(&settings).await?;

    let gateway = PaystackGateway::new(&settings.gateway).map_err(|e| {
        error!("Failed to initialize payment gateway: {}", e);
        e
    })?;
    if settings.gateway.secret_key.is_empty() {
        warn!("APP__GATEWAY__SECRET_KEY is not set; status checks and webhooks will be rejected");
    }

    let machine = Arc::new(VerificationStateMachine::new(
        store.clone(),
        Arc::new(gateway),
        Arc::new(SystemClock),
        settings.verification.policy(),
    ));
    let resolver = Arc::new(TransactionReferenceResolver::new(
        &settings.verification.reference_pattern,
        store,
    )?);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let service = Arc::new(VerificationService::new(
        machine,
        resolver,
        Arc::new(TokioScheduler),
        settings.verification.backoff(),
        settings.gateway.secret_key.clone(),
        shutdown_rx,
    ));

    let addr: SocketAddr = format!("{}:{}", settings.server.host, settings.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Server listening on http://{}", addr);

    axum::serve(listener, api::router(service))
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutdown signal received, stopping open verification streams");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    info!("Server stopped");
    Ok(())
}

#[cfg(feature = "database")]
async fn init_store(settings: &Settings) -> anyhow::Result<Arc<dyn ConfirmationStore>> {
    use estatehub_backend::database::{init_pool, PgConfirmationStore, PoolConfig};

    let url = settings
        .database
        .url
        .clone()
        .or_else(|| std::env::var("DATABASE_URL").ok());

    match url {
        Some(url) => {
            let pool = init_pool(
                &url,
                PoolConfig {
                    max_connections: settings.database.max_connections,
                    ..PoolConfig::default()
                },
            )
            .await?;
            Ok(Arc::new(PgConfirmationStore::new(pool)))
        }
        None => Ok(in_memory_store()),
    }
}

#[cfg(not(feature = "database"))]
async fn init_store(_settings: &Settings) -> anyhow::Result<Arc<dyn ConfirmationStore>> {
    Ok(in_memory_store())
}

fn in_memory_store() -> Arc<dyn ConfirmationStore> {
    warn!(
        "No database configured, confirmation records and booking, investment and gift \
         statuses are kept in memory and lost on restart"
    );
    Arc::new(InMemoryConfirmationStore::standalone())
}
