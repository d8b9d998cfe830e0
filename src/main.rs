use booking_payments::api::{self, PaymentsState};
use booking_payments::config::AppConfig;
use booking_payments::database::{InMemoryPaymentStore, PaymentStore};
use booking_payments::health::HealthChecker;
use booking_payments::logging::init_tracing;
use booking_payments::payments::{ChapaGateway, PaymentGateway};
use booking_payments::services::{LogMailer, NotificationDispatcher, ReconciliationEngine};
use booking_payments::workers::verification_scheduler::VerificationScheduler;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}

async fn shutdown_signal_with_notify(shutdown_tx: watch::Sender<bool>) {
    shutdown_signal().await;
    let _ = shutdown_tx.send(true);
}

#[cfg(feature = "database")]
async fn build_store(config: &AppConfig) -> anyhow::Result<Arc<dyn PaymentStore>> {
    use booking_payments::database::{init_pool, PgPaymentStore, PoolConfig};

    let Some(url) = config.database.url.as_deref() else {
        warn!("DATABASE_URL not set; payments are kept in memory and lost on restart");
        return Ok(Arc::new(InMemoryPaymentStore::new()));
    };

    info!("Initializing database connection pool...");
    let pool = init_pool(url, Some(PoolConfig::from(&config.database)))
        .await
        .map_err(|e| {
            error!("Failed to initialize database pool: {}", e);
            e
        })?;
    info!(
        max_connections = pool.options().get_max_connections(),
        "Database connection pool initialized"
    );
    Ok(Arc::new(PgPaymentStore::new(pool)))
}

#[cfg(not(feature = "database"))]
async fn build_store(config: &AppConfig) -> anyhow::Result<Arc<dyn PaymentStore>> {
    if config.database.url.is_some() {
        warn!("DATABASE_URL ignored: built without the `database` feature");
    }
    Ok(Arc::new(InMemoryPaymentStore::new()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    config.validate()?;
    init_tracing(&config.logging);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        host = %config.server.host,
        port = config.server.port,
        currency = %config.payments.currency,
        "Starting booking payments service"
    );

    let store = build_store(&config).await?;

    let chapa = ChapaGateway::new(config.chapa.clone())?;
    let require_signature = chapa.has_webhook_secret();
    if !require_signature {
        warn!("CHAPA_WEBHOOK_SECRET not set; webhooks are accepted without a signature check");
    }
    let gateway: Arc<dyn PaymentGateway> = Arc::new(chapa);

    let notifier = NotificationDispatcher::new(Arc::new(LogMailer), config.notification.clone());
    let engine = Arc::new(ReconciliationEngine::new(
        store.clone(),
        gateway.clone(),
        notifier,
        config.payments.currency.clone(),
    ));

    let (worker_shutdown_tx, worker_shutdown_rx) = watch::channel(false);
    let scheduler = VerificationScheduler::new(engine.clone(), config.scheduler.clone());
    let scheduler_handle = tokio::spawn(scheduler.clone().run(worker_shutdown_rx));

    let app = api::app(
        PaymentsState {
            engine,
            scheduler,
            gateway,
            require_signature,
        },
        HealthChecker::new(store),
    );

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!(address = %addr, error = %e, "Failed to bind server address");
        e
    })?;
    info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal_with_notify(worker_shutdown_tx.clone()))
        .await?;

    let _ = worker_shutdown_tx.send(true);
    if let Err(e) = scheduler_handle.await {
        error!(error = %e, "verification scheduler task panicked");
    }

    info!("Server shutdown complete");
    Ok(())
}
