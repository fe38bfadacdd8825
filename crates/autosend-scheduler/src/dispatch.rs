//! Per-message dispatch: deliver with retries, then record the outcome.
//!
//! Nothing here is fatal. Store and cache failures are logged and the attempt
//! is considered done; a failed status write after a delivery is an accepted
//! lost update.

use std::sync::Arc;
use std::time::Duration;

use autosend_core::models::{DeliveryRecord, DeliveryRequest, Message, MessageStatus};
use autosend_core::traits::{DeliveryCache, MessageStore};
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::delivery::{Deliver, DeliveryError};

/// Collaborators needed to dispatch one message.
pub struct DispatchContext {
    pub messages: Arc<dyn MessageStore>,
    pub cache: Arc<dyn DeliveryCache>,
    pub deliverer: Arc<dyn Deliver>,
    /// HTTP attempts per dispatch cycle.
    pub max_attempts: u32,
    pub cache_ttl: Duration,
}

/// What happened to one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Sent { external_id: String },
    Failed { error: String },
    /// Stopped while waiting to retry; the message is left untouched.
    Cancelled,
}

/// Deliver `message` and write the result back to the store.
pub async fn dispatch_message(
    ctx: &DispatchContext,
    message: &Message,
    cancel: &CancellationToken,
) -> DispatchOutcome {
    let span = tracing::info_span!("dispatch", message_id = %message.id, to = %message.to);
    dispatch_inner(ctx, message, cancel).instrument(span).await
}

async fn dispatch_inner(
    ctx: &DispatchContext,
    message: &Message,
    cancel: &CancellationToken,
) -> DispatchOutcome {
    tracing::info!("📤 Sending message");

    let request = DeliveryRequest::from(message);
    let ack = match ctx.deliverer.send_with_retry(&request, ctx.max_attempts, cancel).await {
        Ok(ack) => ack,
        Err(DeliveryError::Cancelled) => {
            tracing::info!("Scheduler stopping; message left pending");
            return DispatchOutcome::Cancelled;
        }
        Err(e) => {
            let error = e.to_string();
            tracing::error!(error = %error, "Failed to send message after retries");
            if let Err(e) = ctx
                .messages
                .update_status(&message.id, MessageStatus::Failed, None, Some(&error))
                .await
            {
                tracing::error!(error = %e, "Failed to update message status to failed");
            }
            return DispatchOutcome::Failed { error };
        }
    };

    let external_id = ack.message_id;
    tracing::info!(external_id = %external_id, "✅ Message sent successfully");

    if let Err(e) = ctx
        .messages
        .update_status(&message.id, MessageStatus::Sent, Some(&external_id), None)
        .await
    {
        tracing::error!(error = %e, "Failed to update message status to sent");
        return DispatchOutcome::Sent { external_id };
    }

    cache_delivery(ctx, &external_id).await;
    DispatchOutcome::Sent { external_id }
}

/// Best-effort dedup hint; failures only warn.
async fn cache_delivery(ctx: &DispatchContext, external_id: &str) {
    let record = DeliveryRecord {
        message_id: external_id.to_string(),
        sent_at: Utc::now(),
    };
    let value = match serde_json::to_string(&record) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to encode cache record (non-critical)");
            return;
        }
    };
    if let Err(e) = ctx
        .cache
        .set_with_ttl(&DeliveryRecord::cache_key(external_id), &value, ctx.cache_ttl)
        .await
    {
        tracing::warn!(error = %e, "Failed to cache message (non-critical)");
    }
}
