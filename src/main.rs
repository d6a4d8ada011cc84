use std::net::SocketAddr;
use std::sync::Arc;

use tracing::info;

use k1s0_idempotency_gateway::logger::init_logger;
use k1s0_idempotency_gateway::{
    router, spawn_sweeper, Clock, Config, GatewayState, IdempotencyGateway,
    InMemoryIdempotencyStore, SimulatedPaymentProcessor, SystemClock,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Config
    let config_path =
        std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config/config.yaml".to_string());
    let mut cfg = Config::load(&config_path)?;
    cfg.idempotency.apply_env_overrides()?;
    cfg.idempotency.validate()?;

    // Logging
    init_logger(&cfg.app.environment, &cfg.app.log_format);

    info!(
        app_name = %cfg.app.name,
        version = %cfg.app.version,
        environment = %cfg.app.environment,
        ttl_secs = cfg.idempotency.ttl_secs,
        wait_timeout_ms = cfg.idempotency.wait_timeout_ms,
        in_flight_policy = ?cfg.idempotency.in_flight_policy,
        failed_record_policy = ?cfg.idempotency.failed_record_policy,
        "starting idempotency gateway"
    );

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = Arc::new(InMemoryIdempotencyStore::with_config(&cfg.idempotency));

    // Sweeper (optional)
    let sweeper = cfg.idempotency.sweep_interval().map(|interval| {
        info!(interval_secs = interval.as_secs(), "idempotency sweeper enabled");
        spawn_sweeper(store.clone(), clock.clone(), interval)
    });

    let backend = Arc::new(SimulatedPaymentProcessor::new(cfg.payment.latency()));
    let gateway = IdempotencyGateway::new(store, backend, &cfg.idempotency).with_clock(clock);
    let app = router(GatewayState::new(
        gateway,
        cfg.idempotency.header_name.clone(),
    ));

    let addr: SocketAddr = format!("{}:{}", cfg.server.host, cfg.server.port).parse()?;
    info!("REST server starting on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(handle) = sweeper {
        handle.abort();
    }
    info!("idempotency gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for shutdown signal");
        return;
    }
    info!("shutdown signal received");
}
