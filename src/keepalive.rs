//! Self-ping worker for hosts that idle out the service.
//!
//! Pings our own `/health` endpoint on a fixed period. The gap between
//! ticks is measured on the wall clock: the monotonic clock can stand
//! still while the host is suspended, which is exactly the event this
//! worker needs to notice. A gap well past the period means the process
//! was frozen; the webhook registration may have been dropped while we
//! were out, so it is re-validated before normal ticking resumes.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::KeepAliveConfig;
use crate::health::Metrics;
use crate::telegram::TelegramApi;
use crate::transport::{ApiRequest, ReliableClient};

/// Read-only view of the worker for the debug endpoint.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct KeepAliveRecord {
    pub enabled: bool,
    pub interval_secs: u64,
    pub last_ping_unix: Option<i64>,
    pub last_observed_gap_secs: Option<u64>,
    pub wake_cycles: u64,
}

#[derive(Clone)]
pub struct KeepAliveStatus {
    inner: Arc<Mutex<KeepAliveRecord>>,
}

impl KeepAliveStatus {
    #[must_use]
    pub fn new(enabled: bool, interval: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(KeepAliveRecord {
                enabled,
                interval_secs: interval.as_secs(),
                ..KeepAliveRecord::default()
            })),
        }
    }

    pub fn snapshot(&self) -> KeepAliveRecord {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record_ping(&self) {
        let mut record = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        record.last_ping_unix = Some(Utc::now().timestamp());
    }

    fn record_gap(&self, gap: Duration) {
        let mut record = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        record.last_observed_gap_secs = Some(gap.as_secs());
        record.wake_cycles += 1;
    }
}

pub struct KeepAliveWorker {
    client: Arc<ReliableClient>,
    api: Arc<TelegramApi>,
    metrics: Arc<Metrics>,
    status: KeepAliveStatus,
    health_url: String,
    expected_webhook: Option<String>,
    period: Duration,
    tolerance: Duration,
}

impl KeepAliveWorker {
    pub fn new(
        cfg: &KeepAliveConfig,
        client: Arc<ReliableClient>,
        api: Arc<TelegramApi>,
        metrics: Arc<Metrics>,
        status: KeepAliveStatus,
        health_url: String,
        expected_webhook: Option<String>,
    ) -> Self {
        Self {
            client,
            api,
            metrics,
            status,
            health_url,
            expected_webhook,
            period: Duration::from_secs(cfg.interval_secs.max(1)),
            tolerance: Duration::from_secs(cfg.wake_tolerance_secs),
        }
    }

    pub async fn run(self, cancel: CancellationToken) {
        tracing::info!(
            period_secs = self.period.as_secs(),
            url = %self.health_url,
            "keep-alive worker started"
        );

        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; use it as the gap baseline.
        interval.tick().await;
        let mut last_tick = Utc::now();

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    tracing::info!("keep-alive worker stopped");
                    return;
                }
                _ = interval.tick() => {}
            }

            last_tick = self.step(last_tick, Utc::now()).await;
        }
    }

    /// One tick: a wall-clock gap past the tolerance means the host was
    /// suspended, so the webhook registration is checked before the ping.
    /// Returns the new gap baseline.
    async fn step(&self, last_tick: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
        let gap = now
            .signed_duration_since(last_tick)
            .to_std()
            .unwrap_or_default();

        if is_wake_gap(gap, self.period, self.tolerance) {
            self.metrics.record_sleep_wake_cycle();
            self.status.record_gap(gap);
            tracing::warn!(
                gap_secs = gap.as_secs(),
                period_secs = self.period.as_secs(),
                "wake from suspend detected"
            );
            self.revalidate_webhook().await;
        }

        self.ping().await;
        now
    }

    async fn ping(&self) {
        match self
            .client
            .request(ApiRequest::get(self.health_url.clone()))
            .await
        {
            Ok(_) => {
                self.metrics.record_keepalive_ping();
                self.status.record_ping();
                tracing::debug!("keep-alive ping ok");
            }
            Err(error) => {
                // Next tick tries again; a missed ping only matters if the
                // host actually idles us out before then.
                tracing::warn!(error = %error, "keep-alive ping failed");
            }
        }
    }

    /// Checks that Telegram still points at us after a suspend.
    async fn revalidate_webhook(&self) {
        let Some(expected) = &self.expected_webhook else {
            return;
        };
        match self.api.webhook_info().await {
            Ok(info) if info.url == *expected => {
                tracing::info!("webhook registration intact after wake");
            }
            Ok(info) => {
                tracing::warn!(
                    registered = %info.url,
                    expected = %expected,
                    "webhook registration drifted, re-registering"
                );
                if let Err(error) = self.api.set_webhook(expected).await {
                    tracing::error!(error = %error, "webhook re-registration failed");
                }
            }
            Err(error) => {
                tracing::warn!(error = %error, "webhook info check failed after wake");
            }
        }
    }
}

/// One scheduling hiccup is jitter; a gap past period + tolerance is a
/// suspend.
fn is_wake_gap(gap: Duration, period: Duration, tolerance: Duration) -> bool {
    gap > period + tolerance
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::config::HttpConfig;

    const TOKEN: &str = "123:TEST";

    fn worker_against(
        server: &MockServer,
        expected_webhook: &str,
    ) -> (KeepAliveWorker, Arc<Metrics>, KeepAliveStatus) {
        let http = HttpConfig {
            requests_per_sec: 10_000.0,
            burst: 100,
            ..HttpConfig::default()
        };
        let metrics = Arc::new(Metrics::new());
        let client = Arc::new(ReliableClient::new(&http, Arc::clone(&metrics)));
        let api =
            Arc::new(TelegramApi::new(Arc::clone(&client), TOKEN).with_api_base(server.uri()));
        let status = KeepAliveStatus::new(true, Duration::from_secs(780));
        let worker = KeepAliveWorker::new(
            &KeepAliveConfig::default(),
            client,
            api,
            Arc::clone(&metrics),
            status.clone(),
            format!("{}/health", server.uri()),
            Some(expected_webhook.to_string()),
        );
        (worker, metrics, status)
    }

    #[test]
    fn small_jitter_is_not_a_wake() {
        let period = Duration::from_secs(780);
        let tolerance = Duration::from_secs(120);
        assert!(!is_wake_gap(Duration::from_secs(781), period, tolerance));
        assert!(!is_wake_gap(Duration::from_secs(900), period, tolerance));
    }

    #[test]
    fn long_gap_is_a_wake() {
        let period = Duration::from_secs(780);
        let tolerance = Duration::from_secs(120);
        assert!(is_wake_gap(Duration::from_secs(901), period, tolerance));
        assert!(is_wake_gap(Duration::from_secs(7_200), period, tolerance));
    }

    #[test]
    fn status_tracks_pings_and_gaps() {
        let status = KeepAliveStatus::new(true, Duration::from_secs(780));
        assert!(status.snapshot().enabled);
        assert_eq!(status.snapshot().interval_secs, 780);
        assert!(status.snapshot().last_ping_unix.is_none());

        status.record_ping();
        status.record_gap(Duration::from_secs(1_800));

        let record = status.snapshot();
        assert!(record.last_ping_unix.is_some());
        assert_eq!(record.last_observed_gap_secs, Some(1_800));
        assert_eq!(record.wake_cycles, 1);
    }

    #[tokio::test]
    async fn wake_tick_revalidates_webhook_and_counts_once() {
        let server = MockServer::start().await;
        let expected = "https://myquiz.onrender.com/webhook/123:TEST";

        // Registration was dropped while the host slept.
        Mock::given(method("GET"))
            .and(path(format!("/bot{TOKEN}/getWebhookInfo")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "result": {"url": "", "pending_update_count": 0},
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(format!("/bot{TOKEN}/setWebhook")))
            .and(body_partial_json(json!({"url": expected})))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"ok": true, "result": true})),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"status": "healthy"})),
            )
            .expect(2)
            .mount(&server)
            .await;

        let (worker, metrics, status) = worker_against(&server, expected);

        // The tick lands after a half-hour hole in the wall clock.
        let now = Utc::now();
        let baseline = worker.step(now - chrono::Duration::seconds(1_800), now).await;

        assert_eq!(metrics.snapshot().sleep_wake_cycles, 1);
        assert_eq!(metrics.snapshot().keepalive_pings, 1);
        let record = status.snapshot();
        assert_eq!(record.wake_cycles, 1);
        assert_eq!(record.last_observed_gap_secs, Some(1_800));
        assert!(record.last_ping_unix.is_some());

        // The next on-schedule tick pings and counts nothing new.
        worker
            .step(baseline, baseline + chrono::Duration::seconds(780))
            .await;

        assert_eq!(metrics.snapshot().sleep_wake_cycles, 1);
        assert_eq!(metrics.snapshot().keepalive_pings, 2);
        assert_eq!(status.snapshot().wake_cycles, 1);

        // Re-registration runs before the wake tick's ping.
        let handled: Vec<String> = server
            .received_requests()
            .await
            .expect("request recording is on")
            .iter()
            .map(|request| request.url.path().to_string())
            .collect();
        assert_eq!(
            handled,
            vec![
                format!("/bot{TOKEN}/getWebhookInfo"),
                format!("/bot{TOKEN}/setWebhook"),
                "/health".to_string(),
                "/health".to_string(),
            ]
        );
        server.verify().await;
    }
}
