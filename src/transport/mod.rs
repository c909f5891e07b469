//! Resilient outbound HTTP.
//!
//! Every outbound call in the service goes through [`ReliableClient`]: one
//! pooled `reqwest` client behind a token bucket, an in-flight cap, bounded
//! retries with jittered backoff, and per-host circuit breaking. Callers get
//! back either the parsed JSON body or a [`ClientError`] explaining which
//! policy stopped the call.

pub mod circuit;
pub mod rate_limit;

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use reqwest::{Client, Method, StatusCode};
use url::Url;

use crate::config::HttpConfig;
use crate::health::Metrics;

pub use circuit::{Admission, CircuitRegistry};
pub use rate_limit::TokenBucket;

/// One outbound call. `retry_safe` marks calls the retry loop may replay
/// after a timeout or transport error; a 429 is replayed regardless since
/// the remote did not act on it.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    method: Method,
    url: String,
    body: Option<serde_json::Value>,
    retry_safe: bool,
}

impl ApiRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            url: url.into(),
            body: None,
            retry_safe: true,
        }
    }

    pub fn post(url: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            method: Method::POST,
            url: url.into(),
            body: Some(body),
            retry_safe: false,
        }
    }

    /// Opt a non-GET call into timeout/transport retries.
    #[must_use]
    pub fn retry_safe(mut self) -> Self {
        self.retry_safe = true;
        self
    }
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    #[error("request timed out after {after:?}")]
    Timeout { after: Duration },
    #[error("rate limited, retry in {retry_after:?}")]
    RateLimited { retry_after: Duration },
    #[error("circuit open for {host}, retry in {retry_in:?}")]
    CircuitOpen { host: String, retry_in: Duration },
    #[error("remote returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("transport error: {0}")]
    Transient(String),
}

/// Outcome of a single HTTP attempt, before retry policy is applied.
#[derive(Debug)]
enum AttemptError {
    Timeout,
    Transient(String),
    RateLimited { retry_after: Option<Duration> },
    NonRetryable { status: u16, body: String },
}

impl AttemptError {
    fn into_client_error(self, overall_timeout: Duration) -> ClientError {
        match self {
            Self::Timeout => ClientError::Timeout {
                after: overall_timeout,
            },
            Self::Transient(msg) => ClientError::Transient(msg),
            Self::RateLimited { retry_after } => ClientError::RateLimited {
                retry_after: retry_after.unwrap_or_default(),
            },
            Self::NonRetryable { status, body } => ClientError::Status { status, body },
        }
    }
}

pub struct ReliableClient {
    http: Client,
    limiter: TokenBucket,
    circuits: CircuitRegistry,
    in_flight: tokio::sync::Semaphore,
    metrics: Arc<Metrics>,
    max_attempts: u32,
    base_backoff: Duration,
    max_backoff: Duration,
    overall_timeout: Duration,
}

impl ReliableClient {
    #[must_use]
    pub fn new(cfg: &HttpConfig, metrics: Arc<Metrics>) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(cfg.request_timeout_secs))
            .connect_timeout(Duration::from_secs(cfg.connect_timeout_secs))
            .pool_max_idle_per_host(cfg.pool_max_idle_per_host)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            http,
            limiter: TokenBucket::new(
                cfg.burst,
                cfg.requests_per_sec,
                Duration::from_millis(cfg.max_queue_wait_ms),
            ),
            circuits: CircuitRegistry::new(
                cfg.circuit_threshold,
                Duration::from_secs(cfg.circuit_cooldown_secs),
            ),
            in_flight: tokio::sync::Semaphore::new(cfg.max_in_flight.max(1)),
            metrics,
            max_attempts: cfg.max_attempts.max(1),
            base_backoff: Duration::from_millis(cfg.base_backoff_ms),
            max_backoff: Duration::from_millis(cfg.max_backoff_ms.max(cfg.base_backoff_ms)),
            overall_timeout: Duration::from_secs(cfg.request_timeout_secs),
        }
    }

    /// Run one logical call under the full reliability policy.
    ///
    /// Counter contract: `api_calls` counts attempts, `retry_attempts`
    /// counts replays, `rate_limit_hits` counts 429s and limiter
    /// rejections, `errors` fires exactly once per failed logical call.
    pub async fn request(&self, req: ApiRequest) -> Result<serde_json::Value, ClientError> {
        let host = host_of(&req.url);

        let admission = match self.circuits.admit(&host) {
            Ok(admission) => admission,
            Err(retry_in) => {
                self.metrics.record_error();
                return Err(ClientError::CircuitOpen { host, retry_in });
            }
        };

        let _permit = match self.in_flight.acquire().await {
            Ok(permit) => permit,
            Err(_) => {
                self.circuits.withdraw(&host, admission);
                self.metrics.record_error();
                return Err(ClientError::Transient("request pool closed".into()));
            }
        };

        let mut backoff = self.base_backoff;

        for attempt in 1..=self.max_attempts {
            if attempt > 1 {
                self.metrics.record_retry();
            }

            if let Err(exceeded) = self.limiter.acquire().await {
                // The call never reached the wire; a probe slot held here
                // must not strand the circuit half-open.
                self.circuits.withdraw(&host, admission);
                self.metrics.record_rate_limit_hit();
                self.metrics.record_error();
                return Err(ClientError::RateLimited {
                    retry_after: exceeded.retry_in,
                });
            }

            self.metrics.record_api_call();
            match self.execute(&req).await {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::info!(
                            host = host.as_str(),
                            attempt,
                            "request recovered after retries"
                        );
                    }
                    self.circuits.record_success(&host);
                    return Ok(value);
                }
                Err(AttemptError::NonRetryable { status, body }) => {
                    // A definitive response: the host is up, the call is wrong.
                    self.circuits.record_success(&host);
                    self.metrics.record_error();
                    return Err(ClientError::Status { status, body });
                }
                Err(AttemptError::RateLimited { retry_after }) => {
                    self.metrics.record_rate_limit_hit();
                    self.circuits.record_success(&host);
                    if attempt == self.max_attempts {
                        self.metrics.record_error();
                        return Err(ClientError::RateLimited {
                            retry_after: retry_after.unwrap_or(backoff),
                        });
                    }
                    // A server-provided window overrides computed backoff.
                    let delay = retry_after.unwrap_or_else(|| jittered(backoff));
                    tracing::warn!(
                        host = host.as_str(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "rate limited by remote, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    backoff = (backoff * 2).min(self.max_backoff);
                }
                Err(failure) => {
                    if !req.retry_safe || attempt == self.max_attempts {
                        self.circuits.record_failure(&host);
                        self.metrics.record_error();
                        return Err(failure.into_client_error(self.overall_timeout));
                    }
                    let delay = jittered(backoff);
                    tracing::warn!(
                        host = host.as_str(),
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    backoff = (backoff * 2).min(self.max_backoff);
                }
            }
        }

        // Unreachable with max_attempts >= 1; the final iteration returns.
        self.circuits.record_failure(&host);
        self.metrics.record_error();
        Err(ClientError::Transient("retry budget exhausted".into()))
    }

    async fn execute(&self, req: &ApiRequest) -> Result<serde_json::Value, AttemptError> {
        let mut builder = self.http.request(req.method.clone(), &req.url);
        if let Some(body) = &req.body {
            builder = builder.json(body);
        }

        let response = match builder.send().await {
            Ok(response) => response,
            Err(e) if e.is_timeout() => return Err(AttemptError::Timeout),
            Err(e) => return Err(AttemptError::Transient(e.to_string())),
        };

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let header_hint = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            // Telegram also carries the window in the error body.
            let body_hint = response
                .json::<serde_json::Value>()
                .await
                .ok()
                .and_then(|body| {
                    body.pointer("/parameters/retry_after")
                        .and_then(serde_json::Value::as_u64)
                })
                .map(Duration::from_secs);
            return Err(AttemptError::RateLimited {
                retry_after: header_hint.or(body_hint),
            });
        }
        if status.is_client_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(AttemptError::NonRetryable {
                status: status.as_u16(),
                body,
            });
        }
        if status.is_server_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(AttemptError::Transient(format!("{status} from remote: {body}")));
        }

        match response.json::<serde_json::Value>().await {
            Ok(value) => Ok(value),
            Err(e) if e.is_timeout() => Err(AttemptError::Timeout),
            Err(e) => Err(AttemptError::Transient(format!("invalid response body: {e}"))),
        }
    }
}

fn host_of(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|parsed| parsed.host_str().map(str::to_owned))
        .unwrap_or_else(|| "unknown".to_string())
}

fn jittered(backoff: Duration) -> Duration {
    let base = backoff.as_millis() as u64;
    let jitter = rand::rng().random_range(0..=base.max(1) / 2);
    Duration::from_millis(base + jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_requests_are_retry_safe() {
        let req = ApiRequest::get("https://api.example.org/health");
        assert!(req.retry_safe);
        assert_eq!(req.method, Method::GET);
    }

    #[test]
    fn post_requests_opt_in_to_retries() {
        let req = ApiRequest::post("https://api.example.org/send", serde_json::json!({}));
        assert!(!req.retry_safe);
        assert!(req.clone().retry_safe().retry_safe);
    }

    #[test]
    fn host_extraction_falls_back_to_unknown() {
        assert_eq!(host_of("https://api.telegram.org/botX/getMe"), "api.telegram.org");
        assert_eq!(host_of("not a url"), "unknown");
    }

    #[test]
    fn jitter_stays_within_half_of_base() {
        for _ in 0..50 {
            let delay = jittered(Duration::from_millis(100));
            assert!(delay >= Duration::from_millis(100));
            assert!(delay <= Duration::from_millis(150));
        }
    }

    #[test]
    fn attempt_errors_map_to_taxonomy() {
        let timeout = AttemptError::Timeout.into_client_error(Duration::from_secs(30));
        assert_eq!(
            timeout,
            ClientError::Timeout {
                after: Duration::from_secs(30)
            }
        );

        let status = AttemptError::NonRetryable {
            status: 400,
            body: "bad request".into(),
        }
        .into_client_error(Duration::from_secs(30));
        assert_eq!(
            status,
            ClientError::Status {
                status: 400,
                body: "bad request".into()
            }
        );
    }
}
