//! Race Control Back binary entrypoint wiring REST, SSE and the shared store.

use std::{env, net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::Router;
use race_control_back::{
    config::AppConfig,
    dao::{
        storage::StorageError,
        store::{KvStore, memory::MemoryStore},
    },
    routes,
    services::{observer, storage_supervisor},
    state::{AppState, SharedState},
};
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let app_state = AppState::new(AppConfig::load());

    spawn_store(app_state.clone());
    tokio::spawn(observer::run(app_state.clone()));
    tokio::spawn(observer::forward_system_status(app_state.clone()));

    let app = build_router(app_state);

    let port = env::var("PORT")
        .or_else(|_| env::var("SERVER_PORT"))
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "starting server");

    let listener = TcpListener::bind(addr).await.context("binding server")?;
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving axum")?;

    Ok(())
}

/// Start the storage supervisor for the backend named by `STORE_BACKEND`
/// (`couch` or `memory`).
fn spawn_store(state: SharedState) {
    let backend = env::var("STORE_BACKEND").unwrap_or_else(|_| default_backend().into());

    match backend.as_str() {
        #[cfg(feature = "couch-store")]
        "couch" | "couchdb" => {
            use race_control_back::dao::store::couchdb::{CouchConfig, CouchKvStore};

            info!("using CouchDB store");
            tokio::spawn(storage_supervisor::run(state, || async {
                let config = CouchConfig::from_env()?;
                let store = CouchKvStore::connect(config).await?;
                Ok::<_, StorageError>(Arc::new(store) as Arc<dyn KvStore>)
            }));
        }
        other => {
            if other != "memory" {
                warn!(backend = other, "unknown store backend; using the in-memory store");
            }
            info!("using in-memory store; data is lost on restart");
            let store = MemoryStore::new();
            tokio::spawn(storage_supervisor::run(state, move || {
                let store = store.clone();
                async move { Ok(Arc::new(store) as Arc<dyn KvStore>) }
            }));
        }
    }
}

fn default_backend() -> &'static str {
    if cfg!(feature = "couch-store") {
        "couch"
    } else {
        "memory"
    }
}

/// Build the top-level router and attach cross-cutting middleware layers.
fn build_router(state: SharedState) -> Router<()> {
    routes::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM and shut the server down gracefully.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler; waiting for Ctrl+C only");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
