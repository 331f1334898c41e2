//! HTTP transport with the shared retry policy.
//!
//! All provider traffic goes through [`HttpTransport`], so tests can script
//! responses without a network. The retry wrapper owns the backoff policy:
//! three attempts total, retrying HTTP 429/500/502/503 and network errors
//! with a `2^(n-1)` second delay plus a small uniform jitter.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::warn;

use crate::error::{BashError, ProviderError, Result};

/// Per-attempt request timeout.
pub const REQUEST_TIMEOUT_SECS: u64 = 120;

/// Total attempts per request (1 initial + 2 retries).
pub const MAX_ATTEMPTS: u32 = 3;

/// Minimal POST transport: returns the HTTP status and raw body.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn post(
        &self,
        url: &str,
        headers: &[(String, String)],
        body: &Value,
    ) -> Result<(u16, String)>;
}

/// Production transport backed by a shared reqwest client.
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client }
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn post(
        &self,
        url: &str,
        headers: &[(String, String)],
        body: &Value,
    ) -> Result<(u16, String)> {
        let mut request = self.client.post(url).json(body);
        for (name, value) in headers {
            request = request.header(name, value);
        }
        let response = request
            .send()
            .await
            .map_err(|e| BashError::ProviderTyped(ProviderError::Network(e.to_string())))?;
        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| BashError::ProviderTyped(ProviderError::Network(e.to_string())))?;
        Ok((status, text))
    }
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503)
}

/// Backoff before retry attempt `n` (1-indexed): `2^(n-1)` seconds plus a
/// uniform integer jitter in `[0, 2]` seconds.
fn backoff_secs(attempt: u32, jitter: u64) -> u64 {
    (1u64 << (attempt - 1)).saturating_add(jitter)
}

/// Jitter derived from the system clock's nanosecond component, which is
/// enough to decorrelate concurrent retries without pulling in `rand`.
fn clock_jitter() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| (d.subsec_nanos() % 3) as u64)
        .unwrap_or(0)
}

/// POST with the retry policy applied.
///
/// Returns the body for any 2xx status. Retryable failures (429/5xx,
/// network errors) are reattempted up to [`MAX_ATTEMPTS`]; other 4xx are
/// fatal immediately. On exhaustion the last classified error propagates.
pub async fn post_with_retry(
    transport: &dyn HttpTransport,
    url: &str,
    headers: &[(String, String)],
    body: &Value,
) -> Result<String> {
    let mut last_err: Option<BashError> = None;

    for attempt in 1..=MAX_ATTEMPTS {
        if attempt > 1 {
            let delay = backoff_secs(attempt - 1, clock_jitter());
            if let Some(ref err) = last_err {
                warn!(
                    attempt,
                    max_attempts = MAX_ATTEMPTS,
                    delay_secs = delay,
                    error = %err,
                    "retrying provider request after transient failure"
                );
            }
            tokio::time::sleep(Duration::from_secs(delay)).await;
        }

        match transport.post(url, headers, body).await {
            Ok((status, text)) if (200..300).contains(&status) => return Ok(text),
            Ok((status, text)) => {
                let err = BashError::ProviderTyped(ProviderError::from_status(status, &text));
                if !is_retryable_status(status) {
                    return Err(err);
                }
                last_err = Some(err);
            }
            Err(err @ BashError::ProviderTyped(ProviderError::Network(_))) => {
                last_err = Some(err);
            }
            Err(err) => return Err(err),
        }
    }

    Err(last_err
        .unwrap_or_else(|| BashError::Provider("retry loop exited without a result".to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Transport that replays a scripted sequence of responses.
    pub struct ScriptedTransport {
        responses: Vec<std::result::Result<(u16, String), String>>,
        calls: AtomicUsize,
    }

    impl ScriptedTransport {
        pub fn new(responses: Vec<std::result::Result<(u16, String), String>>) -> Self {
            Self {
                responses,
                calls: AtomicUsize::new(0),
            }
        }

        pub fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl HttpTransport for ScriptedTransport {
        async fn post(
            &self,
            _url: &str,
            _headers: &[(String, String)],
            _body: &Value,
        ) -> Result<(u16, String)> {
            let index = self.calls.fetch_add(1, Ordering::SeqCst);
            match self.responses.get(index.min(self.responses.len() - 1)) {
                Some(Ok((status, body))) => Ok((*status, body.clone())),
                Some(Err(msg)) => Err(BashError::ProviderTyped(ProviderError::Network(
                    msg.clone(),
                ))),
                None => unreachable!(),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_first_attempt() {
        let transport = ScriptedTransport::new(vec![Ok((200, "ok".into()))]);
        let body = post_with_retry(&transport, "http://x", &[], &json!({}))
            .await
            .unwrap();
        assert_eq!(body, "ok");
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_on_500_503_then_succeeds() {
        let transport = ScriptedTransport::new(vec![
            Ok((500, "err".into())),
            Ok((503, "err".into())),
            Ok((200, "recovered".into())),
        ]);
        let start = tokio::time::Instant::now();
        let body = post_with_retry(&transport, "http://x", &[], &json!({}))
            .await
            .unwrap();
        assert_eq!(body, "recovered");
        assert_eq!(transport.call_count(), 3);
        // 2^0 + 2^1 seconds minimum across the two backoffs
        assert!(start.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_on_429() {
        let transport = ScriptedTransport::new(vec![
            Ok((429, "slow down".into())),
            Ok((200, "fine".into())),
        ]);
        let body = post_with_retry(&transport, "http://x", &[], &json!({}))
            .await
            .unwrap();
        assert_eq!(body, "fine");
        assert_eq!(transport.call_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_network_errors_are_retryable() {
        let transport = ScriptedTransport::new(vec![
            Err("connection reset".into()),
            Ok((200, "back".into())),
        ]);
        let body = post_with_retry(&transport, "http://x", &[], &json!({}))
            .await
            .unwrap();
        assert_eq!(body, "back");
    }

    #[tokio::test(start_paused = true)]
    async fn test_4xx_is_fatal_without_retry() {
        let transport = ScriptedTransport::new(vec![
            Ok((400, "bad request".into())),
            Ok((200, "never reached".into())),
        ]);
        let err = post_with_retry(&transport, "http://x", &[], &json!({}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("invalid request"));
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_401_is_fatal() {
        let transport = ScriptedTransport::new(vec![Ok((401, "no key".into()))]);
        let err = post_with_retry(&transport, "http://x", &[], &json!({}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("authentication"));
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_returns_last_error() {
        let transport = ScriptedTransport::new(vec![
            Ok((500, "a".into())),
            Ok((500, "b".into())),
            Ok((500, "c".into())),
        ]);
        let err = post_with_retry(&transport, "http://x", &[], &json!({}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("server error"));
        assert_eq!(transport.call_count(), 3);
    }

    #[test]
    fn test_backoff_schedule() {
        assert_eq!(backoff_secs(1, 0), 1);
        assert_eq!(backoff_secs(2, 0), 2);
        assert_eq!(backoff_secs(1, 2), 3);
        assert_eq!(backoff_secs(2, 1), 3);
    }

    #[test]
    fn test_retryable_statuses() {
        for status in [429, 500, 502, 503] {
            assert!(is_retryable_status(status), "{} should retry", status);
        }
        for status in [400, 401, 403, 404, 422] {
            assert!(!is_retryable_status(status), "{} should not retry", status);
        }
    }
}
