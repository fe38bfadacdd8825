//! HTTP server implementation using Axum.

use std::future::Future;
use std::sync::Arc;

use autosend_core::config::AutoSendConfig;
use autosend_core::traits::{DeliveryCache, MessageStore};
use autosend_scheduler::DispatchScheduler;
use axum::{
    Router,
    routing::{get, post},
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::routes;

/// Shared state for the gateway server.
pub struct AppState {
    pub config: AutoSendConfig,
    pub messages: Arc<dyn MessageStore>,
    pub cache: Arc<dyn DeliveryCache>,
    pub scheduler: Arc<DispatchScheduler>,
    pub start_time: std::time::Instant,
}

/// Build the Axum router with all routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/messages", post(routes::create_message))
        .route("/messages/sent", get(routes::list_sent_messages))
        .route("/messages/{id}", get(routes::get_message))
        .route("/deliveries/{external_id}", get(routes::get_delivery))
        .route("/scheduler/start", post(routes::scheduler_start))
        .route("/scheduler/stop", post(routes::scheduler_stop))
        .route("/scheduler/status", get(routes::scheduler_status));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(routes::health_check))
        .nest("/api/v1", api)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind the configured address and serve until `shutdown` resolves.
pub async fn serve<F>(state: Arc<AppState>, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = format!("{}:{}", state.config.server.host, state.config.server.port);
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("🌐 AutoSend API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}
