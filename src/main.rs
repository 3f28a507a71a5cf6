use std::sync::{Arc, RwLock};

use tracing_subscriber::{fmt, EnvFilter};

use trancelate_guard::config::{load_config, Config};
use trancelate_guard::glossary::load_terms;
use trancelate_guard::locales::load_locales_json_file;
use trancelate_guard::server::{build_router, AppState};
use trancelate_guard::worker::WorkerClient;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn load_locales_json(cfg: &Config) -> Option<serde_json::Value> {
    let path = cfg.locales_public_path.as_ref()?;
    load_locales_json_file(path)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cfg = load_config();

    let worker = WorkerClient::new(
        &cfg.mt_backend,
        cfg.worker_timeout_secs,
        cfg.max_workers_guard,
        cfg.enable_worker_batch,
        cfg.cb_max_retries.max(3),
    );
    let cache = trancelate_guard::cache::LruCache::new(cfg.cache_max, cfg.cache_ttl_secs);
    let glossary_terms = if cfg.glossary_enable {
        load_terms(
            (!cfg.glossary_path.is_empty()).then_some(cfg.glossary_path.as_str()),
            (!cfg.glossary_terms.is_empty()).then_some(cfg.glossary_terms.as_str()),
        )
    } else {
        Vec::new()
    };
    let locales_json = load_locales_json(&cfg);
    let commit = std::env::var("GIT_COMMIT").unwrap_or_else(|_| "unknown".to_string());

    let host = cfg.host.clone();
    let port = cfg.port;

    let state = AppState {
        cfg: Arc::new(cfg),
        worker: Arc::new(worker),
        cache: Arc::new(cache),
        glossary_terms: Arc::new(RwLock::new(Arc::new(glossary_terms))),
        locales_json: Arc::new(RwLock::new(Arc::new(locales_json))),
        version: serde_json::json!(VERSION),
        commit,
    };

    let app = build_router(state);

    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "trancelate-guard listening");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
