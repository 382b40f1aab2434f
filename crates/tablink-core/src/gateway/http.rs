use std::time::Duration;

use std::future::Future;

use rand::Rng;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;
use url::Url;

use super::{GatewayError, GatewayResult};
use crate::config::{RetryPolicy, RETRY_JITTER};

/// Shared HTTP plumbing for knowledge base connectors.
///
/// Every attempt carries the configured timeout. Transient failures are
/// retried with capped exponential backoff; the number of attempts is bounded
/// by the retry policy. Callers wrapping a whole call in their own deadline
/// should allow [`RetryPolicy::total_budget`] of the attempt timeout.
#[derive(Debug, Clone)]
pub struct GatewayClient {
    inner: Client,
    timeout: Duration,
    retry: RetryPolicy,
}

impl GatewayClient {
    pub fn new(timeout: Duration, retry: RetryPolicy) -> GatewayResult<Self> {
        let inner = Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .user_agent(concat!("tablink/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            inner,
            timeout,
            retry,
        })
    }

    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    #[must_use]
    pub const fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    fn build_url(base: &str, query: &[(&str, String)]) -> GatewayResult<Url> {
        let mut url = Url::parse(base)?;
        if !query.is_empty() {
            url.query_pairs_mut()
                .extend_pairs(query.iter().map(|(k, v)| (*k, v.as_str())));
        }
        Ok(url)
    }

    fn classify(&self, e: reqwest::Error) -> GatewayError {
        if e.is_timeout() {
            GatewayError::Timeout(self.timeout)
        } else {
            GatewayError::Http(e)
        }
    }

    async fn send_once(&self, request: RequestBuilder, url: &Url) -> GatewayResult<Vec<u8>> {
        let response = request.send().await.map_err(|e| self.classify(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::Status {
                status: status.as_u16(),
                url: redact(url),
            });
        }

        Ok(response.bytes().await?.to_vec())
    }

    async fn with_retry<F, Fut>(&self, url: &Url, mut attempt_once: F) -> GatewayResult<Vec<u8>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = GatewayResult<Vec<u8>>>,
    {
        let attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match attempt_once().await {
                Ok(body) => return Ok(body),
                Err(e) if e.is_transient() && attempt < attempts => {
                    let delay = self.retry.backoff_for(attempt).saturating_add(jitter());
                    tracing::debug!(
                        "Retrying {} after {:?} (attempt {}/{}): {}",
                        redact(url),
                        delay,
                        attempt,
                        attempts,
                        e
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// GET a JSON document, retrying transient failures.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        base: &str,
        query: &[(&str, String)],
    ) -> GatewayResult<T> {
        let url = Self::build_url(base, query)?;
        let body = self
            .with_retry(&url, || self.send_once(self.inner.get(url.clone()), &url))
            .await?;
        parse_json(&body)
    }

    /// POST a JSON body, retrying transient failures. The response body is
    /// returned as JSON, or `Null` when the service sends nothing back.
    pub async fn post_json<B: Serialize + Sync + ?Sized>(
        &self,
        base: &str,
        query: &[(&str, String)],
        payload: &B,
    ) -> GatewayResult<serde_json::Value> {
        let url = Self::build_url(base, query)?;
        let body = self
            .with_retry(&url, || {
                self.send_once(self.inner.post(url.clone()).json(payload), &url)
            })
            .await?;
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(serde_json::Value::Null);
        }
        parse_json(&body)
    }

    /// Status code of a single unretried GET, `None` when nothing answered.
    pub async fn status_of(&self, base: &str) -> Option<u16> {
        let url = Url::parse(base).ok()?;
        let response = self.inner.get(url).send().await.ok()?;
        Some(response.status().as_u16())
    }

    /// Single unretried request; true on any 2xx.
    pub async fn ping(&self, base: &str, query: &[(&str, String)]) -> bool {
        let Ok(url) = Self::build_url(base, query) else {
            return false;
        };
        match self.inner.get(url).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}

fn parse_json<T: DeserializeOwned>(body: &[u8]) -> GatewayResult<T> {
    serde_json::from_slice(body).map_err(|e| GatewayError::Malformed(e.to_string()))
}

fn jitter() -> Duration {
    let mut rng = rand::rng();
    let ceiling = u64::try_from(RETRY_JITTER.as_millis()).unwrap_or(u64::MAX);
    Duration::from_millis(rng.random_range(0..=ceiling))
}

/// Strips the query string so credentials never reach the logs.
fn redact(url: &Url) -> String {
    let mut clean = url.clone();
    clean.set_query(None);
    clean.to_string()
}
