//! API route handlers for the gateway.

use std::sync::Arc;

use autosend_core::error::AutoSendError;
use autosend_core::models::{DeliveryRecord, Message, MessageStatus};
use autosend_core::traits::{DeliveryCache, MessageFilter, MessageSort, MessageStore};
use autosend_core::validation::validate_message;
use autosend_scheduler::{StartOutcome, StatusView, StopOutcome};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::server::AppState;

const DEFAULT_PER_PAGE: u64 = 10;
const MAX_PER_PAGE: u64 = 100;

type ApiResult<T> = Result<Json<T>, ApiError>;

/// Health check endpoint.
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "ok": true,
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.start_time.elapsed().as_secs(),
        "scheduler_running": state.scheduler.is_running(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct CreateMessageRequest {
    #[serde(default)]
    pub to: String,
    #[serde(default)]
    pub content: String,
}

/// Queue a new pending message.
pub async fn create_message(
    State(state): State<Arc<AppState>>,
    body: Result<Json<CreateMessageRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Message>), ApiError> {
    let Json(req) = body.map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, e.body_text()))?;

    let errors = validate_message(&req.to, &req.content);
    if !errors.is_empty() {
        return Err(ApiError::invalid(errors));
    }

    let message = Message::new(&req.to, &req.content);
    state.messages.insert(&message).await?;
    tracing::info!(message_id = %message.id, to = %message.to, "📥 Message queued");

    Ok((StatusCode::CREATED, Json(message)))
}

#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

impl PageQuery {
    /// 1-based page, and a page size inside `1..=100` (default 10).
    fn resolve(&self) -> (u64, u64) {
        let page = match self.page {
            Some(p) if p >= 1 => p as u64,
            _ => 1,
        };
        let per_page = match self.per_page {
            Some(n) if (1..=MAX_PER_PAGE as i64).contains(&n) => n as u64,
            _ => DEFAULT_PER_PAGE,
        };
        (page, per_page)
    }
}

#[derive(Debug, Serialize)]
pub struct SentPage {
    pub messages: Vec<Message>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
    pub total_pages: u64,
}

/// Sent messages, most recent first.
pub async fn list_sent_messages(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PageQuery>,
) -> ApiResult<SentPage> {
    let (page, per_page) = query.resolve();
    let filter = MessageFilter::with_status(MessageStatus::Sent);

    let total = state.messages.count(&filter).await?;
    let skip = ((page - 1) * per_page) as usize;
    let messages = state
        .messages
        .find_page(&filter, MessageSort::SentDesc, skip, per_page as usize)
        .await?;

    Ok(Json(SentPage {
        messages,
        total,
        page,
        per_page,
        total_pages: total.div_ceil(per_page),
    }))
}

pub async fn get_message(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Message> {
    match state.messages.get(&id).await? {
        Some(message) => Ok(Json(message)),
        None => Err(ApiError::not_found(format!("Message '{id}' not found"))),
    }
}

#[derive(Debug, Serialize)]
pub struct DeliveryLookup {
    pub external_id: String,
    pub cached: bool,
}

/// Whether the delivery cache still holds an entry for `external_id`.
pub async fn get_delivery(
    State(state): State<Arc<AppState>>,
    Path(external_id): Path<String>,
) -> ApiResult<DeliveryLookup> {
    let cached = state
        .cache
        .exists(&DeliveryRecord::cache_key(&external_id))
        .await?;
    Ok(Json(DeliveryLookup { external_id, cached }))
}

// Transitions run on their own task so a dropped connection cannot abort a
// stop halfway through its drain.
async fn detached<T, F>(fut: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: std::future::Future<Output = Result<T, AutoSendError>> + Send + 'static,
{
    match tokio::spawn(fut).await {
        Ok(result) => result.map_err(ApiError::from),
        Err(e) => Err(ApiError::internal(format!("Scheduler task failed: {e}"))),
    }
}

pub async fn scheduler_start(State(state): State<Arc<AppState>>) -> ApiResult<StartOutcome> {
    let scheduler = state.scheduler.clone();
    let outcome = detached(async move { scheduler.start().await }).await?;
    Ok(Json(outcome))
}

pub async fn scheduler_stop(State(state): State<Arc<AppState>>) -> ApiResult<StopOutcome> {
    let scheduler = state.scheduler.clone();
    let outcome = detached(async move { scheduler.stop().await }).await?;
    Ok(Json(outcome))
}

pub async fn scheduler_status(State(state): State<Arc<AppState>>) -> ApiResult<StatusView> {
    Ok(Json(state.scheduler.status().await?))
}
