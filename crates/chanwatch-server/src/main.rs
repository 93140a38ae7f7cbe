use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use chanwatch_api::{AppState, AppStateInner};
use chanwatch_core::alerting::Alerting;
use chanwatch_core::monitor::run_ingest_loop;
use chanwatch_core::notifier::{NotificationDispatcher, run_notify_loop};
use chanwatch_core::pool::WorkerPool;
use chanwatch_core::processing::ProcessingMachine;
use chanwatch_core::{Monitor, MonitorConfig};
use chanwatch_db::{Database, ReviewerRepo};
use chanwatch_telegram::{BotClient, GatewayConnector};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chanwatch=info,tower_http=info".into()),
        )
        .init();

    // Config
    let db_path = std::env::var("CHANWATCH_DB_PATH").unwrap_or_else(|_| "chanwatch.db".into());
    let host = std::env::var("CHANWATCH_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("CHANWATCH_PORT")
        .unwrap_or_else(|_| "3100".into())
        .parse()?;
    let bot_token = std::env::var("CHANWATCH_BOT_TOKEN").context("CHANWATCH_BOT_TOKEN must be set")?;
    let bot_api_url =
        std::env::var("CHANWATCH_BOT_API_URL").unwrap_or_else(|_| "https://api.telegram.org".into());
    let gateway_url =
        std::env::var("CHANWATCH_GATEWAY_URL").unwrap_or_else(|_| "http://127.0.0.1:8081".into());
    let config = MonitorConfig::from_env();

    // Init database
    let db = Arc::new(Database::open(&PathBuf::from(&db_path))?);
    info!("Database ready at {}", db_path);

    if let Ok(raw) = std::env::var("CHANWATCH_SUPER_ADMIN") {
        match raw.trim().parse::<i64>() {
            Ok(telegram_id) => {
                db.unit_of_work(|store| store.upsert_admin(telegram_id))?;
                info!("Telegram user {} seeded as admin", telegram_id);
            }
            Err(_) => warn!("Ignoring CHANWATCH_SUPER_ADMIN={:?}, not a Telegram id", raw),
        }
    }

    // Engine
    let bot = Arc::new(BotClient::new(&bot_api_url, &bot_token));
    let connector = Arc::new(GatewayConnector::new(&gateway_url)?);
    let alerting = Arc::new(Alerting::new(db.clone(), bot.clone()));
    let pool = WorkerPool::new(db.clone(), connector, alerting);
    let monitor = Arc::new(Monitor::new(db.clone(), pool, config.clone()));
    let machine = Arc::new(ProcessingMachine::new(db.clone(), bot.clone()));
    let dispatcher = Arc::new(NotificationDispatcher::new(db.clone(), bot.clone(), config.lookback));

    let ingest_task = tokio::spawn(run_ingest_loop(monitor.clone()));
    let notify_task = tokio::spawn(run_notify_loop(dispatcher, config.notify_interval));
    info!(
        "Monitoring every {}s, notifying every {}s",
        config.ingest_interval.as_secs(),
        config.notify_interval.as_secs()
    );

    let state: AppState = Arc::new(AppStateInner {
        monitor: monitor.clone(),
        machine,
        answerer: bot,
    });
    let app = chanwatch_api::router(state).layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Chanwatch management API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    ingest_task.abort();
    notify_task.abort();
    monitor.shutdown().await;
    info!("Worker sessions closed");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
