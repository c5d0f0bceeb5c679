use std::net::SocketAddr;
use std::sync::Arc;

use axum::{routing::get, Extension, Json, Router};
use chrono::Utc;
use tokio_cron_scheduler::{Job, JobScheduler};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{fmt, EnvFilter};

use ethnicity_sync::cli::{parse_command, print_usage, Command};
use ethnicity_sync::{
    Config, HttpClassifier, LogNotifier, Notifier, PgStore, PipelineError, SyncEngine, WebhookNotifier,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load this crate's .env regardless of current working directory, and override any pre-set envs
    let _ = dotenvy::from_filename_override(concat!(env!("CARGO_MANIFEST_DIR"), "/.env"));
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .json()
        .flatten_event(true)
        .with_current_span(true)
        .with_span_list(true)
        .init();

    let command = match parse_command(std::env::args()) {
        Ok(c) => c,
        Err(msg) => {
            eprintln!("{}", msg);
            print_usage();
            std::process::exit(2);
        }
    };
    if command == Command::Help {
        print_usage();
        return Ok(());
    }

    let cfg = Config::from_env();
    cfg.validate()?;
    tracing::info!(
        source = %cfg.tables.source,
        target = %cfg.tables.target,
        window = %cfg.sync_window,
        customer_list_id = cfg.customer_list_id,
        scheduler_enabled = cfg.enable_scheduler,
        "Loaded configuration"
    );

    let store = PgStore::connect(&cfg).await?;
    let classifier = HttpClassifier::from_config(&cfg)?;
    let notifier: Arc<dyn Notifier> = match WebhookNotifier::from_config(&cfg)? {
        Some(webhook) => Arc::new(webhook),
        None => {
            tracing::info!("NOTIFY_WEBHOOK_URL not set; run reports go to the log");
            Arc::new(LogNotifier)
        }
    };
    let engine = SyncEngine::new(Arc::new(store), Arc::new(classifier), notifier, cfg.clone());

    if command == Command::RunOnce {
        let exec = engine.run_now().await?;
        tracing::info!(
            run_id = %exec.id,
            status = ?exec.status,
            kept = exec.counters.records_classified,
            "Manual run finished"
        );
        return Ok(());
    }

    let scheduler = JobScheduler::new().await?;
    if cfg.enable_scheduler {
        start_sync_scheduler(&scheduler, engine.clone(), &cfg).await?;
        scheduler.start().await?;
        tracing::info!("Sync scheduler started");
    }

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/status", get(run_status))
        .layer(Extension(engine))
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("0.0.0.0:{}", cfg.port).parse()?;
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            if e.kind() == std::io::ErrorKind::AddrInUse {
                tracing::error!(port = cfg.port, "Port is already in use. Another ethnicity-sync might be running. Try changing PORT env var or stop the other process.");
            }
            return Err(e.into());
        }
    };
    tracing::info!(port = cfg.port, "Ethnicity sync listening");
    axum::serve(listener, app).await?;

    Ok(())
}

async fn health_check() -> &'static str {
    "OK"
}

async fn run_status(Extension(engine): Extension<SyncEngine>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "running": engine.is_running(),
        "last_run": engine.last_run(),
    }))
}

async fn start_sync_scheduler(scheduler: &JobScheduler, engine: SyncEngine, cfg: &Config) -> anyhow::Result<()> {
    if let Some(next) = cfg.schedule()?.upcoming(Utc).next() {
        tracing::info!(cron = %cfg.sync_cron, next_run = %next, "Scheduling daily sync");
    }

    let sync_job = Job::new_async(cfg.sync_cron.as_str(), move |_uuid, _l| {
        let engine = engine.clone();
        Box::pin(async move {
            match engine.run_now().await {
                Ok(_) => {}
                Err(PipelineError::RunInProgress) => {
                    tracing::warn!("Previous sync still running; skipping this trigger");
                }
                Err(e) => tracing::error!(error = %e, "Scheduled sync failed"),
            }
        })
    })?;

    scheduler.add(sync_job).await?;
    Ok(())
}
