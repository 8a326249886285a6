//! Hearth Server
//!
//! Household file and text drop: resumable chunked uploads, a shared transfer
//! list, and live add/delete notifications over WebSocket.

mod config;
mod error;
mod extractors;
mod handlers;
mod services;

use anyhow::{Context, Result};
use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post, put},
    Router,
};
use hearth_core::{
    chunks::ChunkStore,
    index::{TransferIndex, INDEX_FILE},
    service::{CHUNKS_DIR, UPLOADS_DIR},
    Broadcaster, TransferService,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::config::{LogFormat, ServerConfig};
use handlers::transfer;
use services::AuthService;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub transfer: Arc<TransferService>,
    pub broadcaster: Arc<Broadcaster>,
    pub auth_service: Arc<AuthService>,
}

#[tokio::main]
async fn main() {
    // Set up panic hook to log crashes
    std::panic::set_hook(Box::new(|info| {
        let location = info
            .location()
            .map(|l| format!("{}:{}", l.file(), l.line()));
        let payload = if let Some(s) = info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        };
        eprintln!("[PANIC] at {:?}: {}", location, payload);
        tracing::error!("PANIC at {:?}: {}", location, payload);
    }));

    let config = match ServerConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("[FATAL] Failed to load configuration: {:#}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = init_tracing(config.log_format) {
        eprintln!("[FATAL] {:#}", e);
        std::process::exit(1);
    }

    info!("Starting Hearth Server v{}", env!("CARGO_PKG_VERSION"));
    info!("PID: {}", std::process::id());

    if let Err(e) = run_server(config).await {
        error!("Server failed: {:#}", e);
        std::process::exit(1);
    }
}

fn init_tracing(format: LogFormat) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = match format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Pretty => builder.try_init(),
    };
    result.map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))
}

async fn run_server(config: ServerConfig) -> Result<()> {
    info!(
        "Config loaded: bind={}, data_dir={}",
        config.bind_address,
        config.data_dir.display()
    );

    let state = build_state(&config)
        .await
        .context("Failed to initialize transfer service")?;

    let _reaper = services::reaper::spawn(
        state.transfer.clone(),
        config.session_ttl(),
        config.sweep_interval(),
    );

    let app = app(state, config.max_chunk_size);

    let addr: SocketAddr = config
        .bind_address
        .parse()
        .context("Failed to parse bind address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    info!("Server listening on {}", addr);
    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}

pub async fn build_state(config: &ServerConfig) -> Result<AppState> {
    tokio::fs::create_dir_all(&config.data_dir)
        .await
        .with_context(|| format!("Failed to create data directory {}", config.data_dir.display()))?;

    let broadcaster = Arc::new(Broadcaster::new());

    let chunks = ChunkStore::open(config.data_dir.join(CHUNKS_DIR))
        .await?
        .with_chunk_limits(config.default_chunk_size, config.max_chunk_size);
    let index = TransferIndex::open_json(config.data_dir.join(INDEX_FILE))
        .with_capacity(config.index_capacity);
    let transfer = TransferService::new(
        chunks,
        index,
        config.data_dir.join(UPLOADS_DIR),
        broadcaster.clone(),
    )
    .await?
    .with_file_url_prefix(config.file_url_prefix.as_str());

    let auth_service = Arc::new(AuthService::new(&config.jwt_secret()));
    info!("Services initialized");

    Ok(AppState {
        transfer: Arc::new(transfer),
        broadcaster,
        auth_service,
    })
}

pub fn app(state: AppState, max_chunk_size: u64) -> Router {
    Router::new()
        // Health check
        .route("/health", get(handlers::health))
        // Push channel
        .route("/ws", get(handlers::ws::handler))
        // REST API routes
        .nest("/api/v1/transfer", transfer_routes(max_chunk_size))
        // Layers
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn transfer_routes(max_chunk_size: u64) -> Router<AppState> {
    let chunk_limit = usize::try_from(max_chunk_size).unwrap_or(usize::MAX);

    Router::new()
        .route("/uploads", post(transfer::init_upload))
        .route(
            "/uploads/:upload_id",
            get(transfer::upload_status).delete(transfer::abandon_upload),
        )
        .route(
            "/uploads/:upload_id/chunks/:index",
            put(transfer::put_chunk).layer(DefaultBodyLimit::max(chunk_limit)),
        )
        .route("/uploads/:upload_id/complete", post(transfer::complete_upload))
        .route("/text", post(transfer::submit_text))
        .route("/items", get(transfer::list_items))
        .route("/items/:id", delete(transfer::delete_item))
        .route("/file/:filename", get(transfer::serve_file))
}
