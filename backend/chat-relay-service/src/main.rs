use actix_web::{web, App, HttpServer};
use chat_relay_service::{
    config::{self, StoreBackend},
    db, error, logging, routes,
    services::{BatchWriter, ChangeNotifier},
    state::AppState,
    store::{MemoryStore, MessageStore, PostgresStore},
    websocket::ConnectionRegistry,
};
use std::sync::Arc;
use tracing_actix_web::TracingLogger;

const SEED_ATTEMPTS: u32 = 10;

#[tokio::main]
async fn main() -> Result<(), error::AppError> {
    logging::init_tracing();
    let cfg = Arc::new(config::Config::from_env()?);

    let store: Arc<dyn MessageStore> = match cfg.store_backend {
        StoreBackend::Postgres => {
            let pool = db::init_pool(&cfg).await?;
            Arc::new(PostgresStore::new(pool))
        }
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory message store, messages will not survive a restart");
            Arc::new(MemoryStore::new())
        }
    };

    let writer = BatchWriter::new(store.clone(), cfg.batch.clone())?;
    let registry = ConnectionRegistry::with_buffer(cfg.subscriber_buffer);

    // Store -> hub. The cursor is fixed before ingress opens.
    let mut notifier = ChangeNotifier::new(
        store.clone(),
        Arc::new(registry.clone()),
        cfg.notifier.clone(),
    );
    notifier
        .seed_with_retry(SEED_ATTEMPTS)
        .await
        .map_err(|e| error::AppError::StartServer(format!("change notifier: {e}")))?;
    let (notifier_shutdown, notifier_task) = notifier.spawn();

    let state = AppState {
        store,
        writer: writer.clone(),
        registry,
        config: cfg.clone(),
    };

    let bind_addr = format!("0.0.0.0:{}", cfg.port);
    tracing::info!(%bind_addr, backend = ?cfg.store_backend, "starting chat-relay-service");

    HttpServer::new(move || {
        let cors = actix_cors::Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .wrap(cors)
            .wrap(TracingLogger::default())
            .app_data(web::Data::new(state.clone()))
            .configure(routes::configure)
    })
    .bind(&bind_addr)
    .map_err(|e| error::AppError::StartServer(format!("bind: {e}")))?
    .run()
    .await
    .map_err(|e| error::AppError::StartServer(format!("server: {e}")))?;

    tracing::info!("HTTP server stopped, draining pipeline");

    let _ = notifier_shutdown.send(());
    if let Err(e) = notifier_task.await {
        tracing::error!(error = %e, "change notifier task panicked");
    }

    let flushed = writer.shutdown().await?;
    tracing::info!(flushed, "chat-relay-service stopped");

    Ok(())
}
