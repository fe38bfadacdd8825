//! Delivery client: one HTTP POST per attempt, with a linear-backoff retry loop.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use autosend_core::config::DeliveryConfig;
use autosend_core::models::{DeliveryAck, DeliveryRequest};
use reqwest::StatusCode;
use reqwest::header::CONTENT_TYPE;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Status codes the endpoint may answer with on success.
const ACCEPTED_STATUSES: [StatusCode; 2] = [StatusCode::OK, StatusCode::ACCEPTED];

/// Why a delivery did not go through.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("failed to build HTTP client: {0}")]
    Client(reqwest::Error),

    #[error("failed to serialize request: {0}")]
    Encode(serde_json::Error),

    #[error("http request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("webhook returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to parse acknowledgment: {0}")]
    Decode(serde_json::Error),

    /// The caller's cancellation fired during a backoff wait.
    #[error("delivery cancelled while waiting to retry")]
    Cancelled,

    #[error("all {attempts} attempts failed, last error: {source}")]
    Exhausted {
        attempts: u32,
        source: Box<DeliveryError>,
    },
}

/// Something that can hand a message to the delivery endpoint.
#[async_trait]
pub trait Deliver: Send + Sync {
    /// A single attempt.
    async fn send(&self, request: &DeliveryRequest) -> Result<DeliveryAck, DeliveryError>;

    /// Unit for the linear backoff between attempts.
    fn backoff_unit(&self) -> Duration;

    /// Up to `max_attempts` sends, waiting `attempt * backoff_unit` between them.
    async fn send_with_retry(
        &self,
        request: &DeliveryRequest,
        max_attempts: u32,
        cancel: &CancellationToken,
    ) -> Result<DeliveryAck, DeliveryError> {
        retry_with_backoff(max_attempts, self.backoff_unit(), cancel, |_| self.send(request)).await
    }
}

/// Run `op` up to `max_attempts` times (at least once). Before attempt `n + 1`
/// waits `n * unit`; the wait aborts with [`DeliveryError::Cancelled`] as soon
/// as `cancel` fires.
pub async fn retry_with_backoff<T, F, Fut>(
    max_attempts: u32,
    unit: Duration,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<T, DeliveryError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, DeliveryError>>,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1;

    loop {
        let err = match op(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!(attempt, "Message sent successfully after retry");
                }
                return Ok(value);
            }
            Err(e) => e,
        };

        tracing::warn!(attempt, max_attempts, error = %err, "Message send attempt failed");

        if attempt >= max_attempts {
            tracing::error!(attempts = max_attempts, error = %err, "All retry attempts failed");
            return Err(DeliveryError::Exhausted {
                attempts: max_attempts,
                source: Box::new(err),
            });
        }

        let delay = unit * attempt;
        tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, "Retrying after backoff");

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(DeliveryError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }

        attempt += 1;
    }
}

/// HTTP client for the external delivery endpoint.
pub struct DeliveryClient {
    client: reqwest::Client,
    url: String,
    auth_header: String,
    auth_key: String,
    backoff_unit: Duration,
}

impl DeliveryClient {
    /// Build a client with the configured per-call timeout.
    pub fn new(config: &DeliveryConfig) -> Result<Self, DeliveryError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(DeliveryError::Client)?;

        Ok(Self {
            client,
            url: config.url.clone(),
            auth_header: config.auth_header.clone(),
            auth_key: config.auth_key.clone(),
            backoff_unit: config.backoff_unit(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Deliver for DeliveryClient {
    async fn send(&self, request: &DeliveryRequest) -> Result<DeliveryAck, DeliveryError> {
        let body = serde_json::to_vec(request).map_err(DeliveryError::Encode)?;

        let started = std::time::Instant::now();
        let response = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json")
            .header(self.auth_header.as_str(), self.auth_key.as_str())
            .body(body)
            .send()
            .await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let response = match response {
            Ok(r) => r,
            Err(e) => {
                tracing::error!(to = %request.to, duration_ms, error = %e, "HTTP request failed");
                return Err(DeliveryError::Transport(e));
            }
        };

        let status = response.status();
        let text = response.text().await?;

        if !ACCEPTED_STATUSES.contains(&status) {
            tracing::error!(
                to = %request.to,
                status_code = status.as_u16(),
                duration_ms,
                response_body = %text,
                "Webhook returned non-success status"
            );
            return Err(DeliveryError::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        let ack: DeliveryAck = serde_json::from_str(&text).map_err(|e| {
            tracing::error!(response_body = %text, error = %e, "Failed to parse acknowledgment");
            DeliveryError::Decode(e)
        })?;

        tracing::info!(
            to = %request.to,
            message_id = %ack.message_id,
            status_code = status.as_u16(),
            duration_ms,
            "Webhook request successful"
        );
        Ok(ack)
    }

    fn backoff_unit(&self) -> Duration {
        self.backoff_unit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    fn config_for(url: String) -> DeliveryConfig {
        DeliveryConfig {
            url,
            auth_key: "test-key".into(),
            timeout_secs: 5,
            backoff_unit_ms: 1,
            ..Default::default()
        }
    }

    fn request() -> DeliveryRequest {
        DeliveryRequest {
            to: "+905551234567".into(),
            content: "hello".into(),
        }
    }

    #[tokio::test]
    async fn test_send_accepted() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/send")
            .match_header("x-ins-auth-key", "test-key")
            .match_header("content-type", "application/json")
            .match_body(Matcher::Json(serde_json::json!({
                "to": "+905551234567",
                "content": "hello"
            })))
            .with_status(202)
            .with_header("content-type", "application/json")
            .with_body(r#"{"message":"Accepted","messageId":"67f2f8a8-ea58-4ed0-a6f9-ff217df4d849"}"#)
            .create_async()
            .await;

        let client = DeliveryClient::new(&config_for(format!("{}/send", server.url()))).unwrap();
        let ack = client.send(&request()).await.unwrap();
        assert_eq!(ack.message_id, "67f2f8a8-ea58-4ed0-a6f9-ff217df4d849");
        assert_eq!(ack.message, "Accepted");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_send_ok_status_also_accepted() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/send")
            .with_status(200)
            .with_body(r#"{"message":"ok","messageId":"m-1"}"#)
            .create_async()
            .await;

        let client = DeliveryClient::new(&config_for(format!("{}/send", server.url()))).unwrap();
        assert_eq!(client.send(&request()).await.unwrap().message_id, "m-1");
    }

    #[tokio::test]
    async fn test_send_rejects_other_status() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/send")
            .with_status(201)
            .with_body(r#"{"message":"created","messageId":"m-1"}"#)
            .create_async()
            .await;

        let client = DeliveryClient::new(&config_for(format!("{}/send", server.url()))).unwrap();
        let err = client.send(&request()).await.unwrap_err();
        assert!(matches!(err, DeliveryError::Status { status: 201, .. }));
    }

    #[tokio::test]
    async fn test_send_rejects_malformed_ack() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/send")
            .with_status(202)
            .with_body(r#"{"status":"queued"}"#)
            .create_async()
            .await;

        let client = DeliveryClient::new(&config_for(format!("{}/send", server.url()))).unwrap();
        let err = client.send(&request()).await.unwrap_err();
        assert!(matches!(err, DeliveryError::Decode(_)));
    }

    #[tokio::test]
    async fn test_send_transport_error() {
        // nothing listens on port 9 locally
        let client = DeliveryClient::new(&config_for("http://127.0.0.1:9/send".into())).unwrap();
        let err = client.send(&request()).await.unwrap_err();
        assert!(matches!(err, DeliveryError::Transport(_)));
    }

    #[tokio::test]
    async fn test_send_with_retry_exhausts_budget() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/send")
            .with_status(500)
            .with_body("boom")
            .expect(3)
            .create_async()
            .await;

        let client = DeliveryClient::new(&config_for(format!("{}/send", server.url()))).unwrap();
        let err = client
            .send_with_retry(&request(), 3, &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            DeliveryError::Exhausted { attempts, source } => {
                assert_eq!(attempts, 3);
                assert!(matches!(*source, DeliveryError::Status { status: 500, .. }));
            }
            other => panic!("expected Exhausted, got {other:?}"),
        }
        mock.assert_async().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_linear_backoff_waits() {
        let unit = Duration::from_secs(5);
        let mut calls: Vec<Instant> = Vec::new();

        let result: Result<(), _> = retry_with_backoff(4, unit, &CancellationToken::new(), |_| {
            calls.push(Instant::now());
            async { Err(DeliveryError::Cancelled) }
        })
        .await;

        assert!(matches!(result, Err(DeliveryError::Exhausted { attempts: 4, .. })));
        assert_eq!(calls.len(), 4);
        for (i, pair) in calls.windows(2).enumerate() {
            let expected = unit * (i as u32 + 1);
            let waited = pair[1] - pair[0];
            assert!(waited >= expected && waited < expected + Duration::from_millis(5));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_stops_retrying() {
        let unit = Duration::from_secs(5);
        let calls = Arc::new(AtomicU32::new(0));
        let start = Instant::now();

        let counter = calls.clone();
        let result = retry_with_backoff(5, unit, &CancellationToken::new(), move |attempt| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt == 2 {
                    Ok(attempt)
                } else {
                    Err(DeliveryError::Status { status: 503, body: String::new() })
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        // exactly one wait of 1 * unit
        let waited = start.elapsed();
        assert!(waited >= unit && waited < unit * 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<(), _> = retry_with_backoff(3, Duration::from_secs(5), &cancel, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(DeliveryError::Status { status: 500, body: String::new() }) }
        })
        .await;

        assert!(matches!(result, Err(DeliveryError::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_zero_attempts_still_tries_once() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<(), _> = retry_with_backoff(0, Duration::ZERO, &CancellationToken::new(), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(DeliveryError::Status { status: 500, body: String::new() }) }
        })
        .await;

        assert!(matches!(result, Err(DeliveryError::Exhausted { attempts: 1, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
