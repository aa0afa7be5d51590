//! Shared HTTP client with status classification and bounded retries

use std::time::Duration;

use reqwest::{RequestBuilder, Response, StatusCode};
use tracing::{debug, warn};

use crate::LlmError;

/// Retries after the first attempt for retryable failures (429, 5xx, connect errors)
const MAX_RETRIES: u32 = 2;

/// Base backoff; doubled on each retry
const BACKOFF_BASE_MS: u64 = 500;

/// Thin wrapper around `reqwest::Client` shared by HTTP backends.
pub(crate) struct HttpClient {
    client: reqwest::Client,
}

impl HttpClient {
    pub(crate) fn new() -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| LlmError::Misconfiguration(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    pub(crate) fn inner(&self) -> &reqwest::Client {
        &self.client
    }

    /// Send `request`, retrying transient failures, and return a successful response.
    pub(crate) async fn execute_with_retry(
        &self,
        request: RequestBuilder,
        timeout: Duration,
        provider: &str,
    ) -> Result<Response, LlmError> {
        let mut attempt = 0;

        loop {
            let Some(this_try) = request.try_clone() else {
                return Err(LlmError::Transport(
                    "request body cannot be retried".to_string(),
                ));
            };

            let outcome = match this_try.timeout(timeout).send().await {
                Ok(response) => classify_status(response, provider).await,
                Err(e) if e.is_timeout() => Err(LlmError::Timeout { duration: timeout }),
                Err(e) => Err(LlmError::Transport(format!(
                    "{provider} request failed: {}",
                    redact_error_message(&e.to_string())
                ))),
            };

            match outcome {
                Ok(response) => return Ok(response),
                Err(err) if attempt < MAX_RETRIES && is_retryable(&err) => {
                    let delay = Duration::from_millis(BACKOFF_BASE_MS << attempt);
                    warn!(
                        provider = provider,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Retrying reasoning request"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

fn is_retryable(err: &LlmError) -> bool {
    matches!(
        err,
        LlmError::ProviderQuota(_) | LlmError::ProviderOutage(_) | LlmError::Transport(_)
    )
}

async fn classify_status(response: Response, provider: &str) -> Result<Response, LlmError> {
    let status = response.status();
    if status.is_success() {
        debug!(provider = provider, status = status.as_u16(), "HTTP success");
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let detail = format!(
        "{provider} returned {status}: {}",
        redact_error_message(truncate(&body, 300))
    );

    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => LlmError::ProviderAuth(detail),
        StatusCode::TOO_MANY_REQUESTS => LlmError::ProviderQuota(detail),
        s if s.is_server_error() => LlmError::ProviderOutage(detail),
        _ => LlmError::Transport(detail),
    })
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Strip bearer tokens and `sk-` style keys from error text.
pub(crate) fn redact_error_message(message: &str) -> String {
    let mut out = Vec::new();
    let mut after_bearer = false;
    for word in message.split_whitespace() {
        if after_bearer || word.starts_with("sk-") {
            out.push("[REDACTED]");
        } else {
            out.push(word);
        }
        after_bearer = word == "Bearer";
    }
    out.join(" ")
}
