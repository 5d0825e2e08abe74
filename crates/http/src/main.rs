//! Binary entry point: loads config, connects to Postgres, runs the schema
//! migrations each store owns, wires one [`AppState`], serves the router,
//! and drives the sweeper on its own interval alongside the request loop.

use std::path::PathBuf;
use std::sync::Arc;

use ledger_access::postgres::{PgMembershipStore, PgProjectStore};
use ledger_core::{Producer, RuntimeConfig};
use ledger_engine::{Ledger, MemoryBlobStore, PgLedger};
use ledger_http::AppState;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let toml_path = std::env::var("APP_CONFIG_PATH").ok().map(PathBuf::from);
    let config = Arc::new(RuntimeConfig::load(toml_path.as_deref())?);

    let pool = sqlx::PgPool::connect(&config.database_url).await?;

    let ledger = PgLedger::new(pool.clone());
    ledger.migrate().await?;
    let members = PgMembershipStore::new(pool.clone());
    members.migrate().await?;
    let projects = PgProjectStore::new(pool.clone());

    let ledger: Arc<dyn Ledger> = Arc::new(ledger);
    let producer = Producer { service: "ledger-httpd".to_string(), version: env!("CARGO_PKG_VERSION").to_string() };

    let state = AppState {
        ledger: ledger.clone(),
        blobs: Arc::new(MemoryBlobStore::new()),
        members: Arc::new(members),
        projects: Arc::new(projects),
        config: config.clone(),
        producer: producer.clone(),
        db_pool: Some(pool),
    };

    tokio::spawn(run_sweeper(ledger, config.clone(), producer));

    let listener = tokio::net::TcpListener::bind(&config.http_bind).await?;
    info!(bind = %config.http_bind, "ledger-httpd listening");
    axum::serve(listener, ledger_http::build_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn run_sweeper(ledger: Arc<dyn Ledger>, config: Arc<RuntimeConfig>, producer: Producer) {
    let mut ticker = tokio::time::interval(config.sweep_interval());
    loop {
        ticker.tick().await;
        let report = ledger_sweeper::sweep(ledger.as_ref(), &config, &producer, chrono::Utc::now()).await;
        if report.retries_released.failed > 0
            || report.decisions_expired.failed > 0
            || report.claims_reclaimed.failed > 0
            || report.load_shed.failed > 0
        {
            error!(?report, "sweep pass completed with failures");
        } else {
            info!(?report, "sweep pass completed");
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async { tokio::signal::ctrl_c().await.expect("failed to install ctrl-c handler") };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
