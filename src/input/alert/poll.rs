//! Poll-mode alert feed: fetch the latest fall status on a fixed interval.

use super::{AlertSink, FallReport};
use crate::error::Result;
use crate::state::{AlertEvent, SequenceKey};
use async_trait::async_trait;
use log::{debug, info, warn};
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Upper bound for a single status request.
const FETCH_TIMEOUT: Duration = Duration::from_secs(5);

/// Shortest accepted poll period; `tokio::time::interval` panics on zero.
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Source of the latest fall status.
#[async_trait]
pub trait StatusFetcher: Send + Sync {
    async fn fetch(&self) -> Result<FallReport>;
}

/// Fetches `{fall, confidence, timestamp}` over HTTP GET.
pub struct HttpStatusFetcher {
    client: reqwest::Client,
    url: String,
}

impl HttpStatusFetcher {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(FETCH_TIMEOUT).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl StatusFetcher for HttpStatusFetcher {
    async fn fetch(&self) -> Result<FallReport> {
        let report = self
            .client
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?
            .json::<FallReport>()
            .await?;
        Ok(report)
    }
}

/// Periodically fetches the fall status and emits new falls.
pub struct PollTransport {
    fetcher: Box<dyn StatusFetcher>,
    interval: Duration,
    last_seen: Option<f64>,
}

impl PollTransport {
    pub fn new(fetcher: impl StatusFetcher + 'static, interval: Duration) -> Self {
        if interval < MIN_POLL_INTERVAL {
            warn!(
                "[Alert] Poll interval {:?} too short, using {:?}",
                interval, MIN_POLL_INTERVAL
            );
        }
        Self {
            fetcher: Box::new(fetcher),
            interval: interval.max(MIN_POLL_INTERVAL),
            last_seen: None,
        }
    }

    /// Poll `url` over HTTP.
    pub fn http(url: impl Into<String>, interval: Duration) -> Result<Self> {
        Ok(Self::new(HttpStatusFetcher::new(url)?, interval))
    }

    /// Turn one status into an event if it reports a fall newer than the last one seen.
    fn observe(&mut self, report: FallReport) -> Option<AlertEvent> {
        if !report.fall {
            return None;
        }

        let Some(timestamp) = report.timestamp.filter(|ts| ts.is_finite()) else {
            warn!("[Alert] Fall status without a usable timestamp, ignoring");
            return None;
        };
        if self.last_seen.is_some_and(|last| timestamp <= last) {
            debug!("[Alert] Fall at {} already seen", timestamp);
            return None;
        }

        self.last_seen = Some(timestamp);
        Some(AlertEvent::fall(
            report.confidence,
            SequenceKey::Timestamp(timestamp),
        ))
    }

    /// Poll until cancelled. A failed fetch never stops the loop.
    pub async fn run(mut self, mut sink: AlertSink, cancel: CancellationToken) {
        info!("[Alert] Polling fall status every {:?}", self.interval);

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let fetched = tokio::select! {
                _ = cancel.cancelled() => break,
                fetched = self.fetcher.fetch() => fetched,
            };

            match fetched {
                Ok(report) => {
                    if let Some(event) = self.observe(report)
                        && !sink.deliver(event, &cancel).await
                    {
                        break;
                    }
                }
                Err(e) => warn!("[Alert] Status fetch failed: {}", e),
            }
        }

        info!("[Alert] Polling stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HubError;
    use crate::state::StateUpdate;
    use crate::test_support::{closed_port, spawn_json_server};
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    fn fall_at(timestamp: f64) -> FallReport {
        FallReport {
            fall: true,
            confidence: Some(0.8),
            timestamp: Some(timestamp),
        }
    }

    /// Replays scripted results, then keeps returning "no fall".
    #[derive(Clone, Default)]
    struct ScriptedFetcher {
        script: Arc<Mutex<VecDeque<Option<FallReport>>>>,
        calls: Arc<AtomicUsize>,
    }

    impl ScriptedFetcher {
        fn new(script: Vec<Option<FallReport>>) -> Self {
            Self {
                script: Arc::new(Mutex::new(script.into())),
                calls: Arc::default(),
            }
        }
    }

    #[async_trait]
    impl StatusFetcher for ScriptedFetcher {
        async fn fetch(&self) -> Result<FallReport> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.script.lock().pop_front() {
                Some(Some(report)) => Ok(report),
                Some(None) => Err(HubError::Io(std::io::Error::other("scripted failure"))),
                None => Ok(FallReport {
                    fall: false,
                    confidence: None,
                    timestamp: None,
                }),
            }
        }
    }

    #[test]
    fn test_identical_timestamps_yield_one_event() {
        let mut transport = PollTransport::new(ScriptedFetcher::default(), Duration::from_secs(1));
        assert!(transport.observe(fall_at(1000.0)).is_some());
        assert!(transport.observe(fall_at(1000.0)).is_none());
        assert!(transport.observe(fall_at(999.0)).is_none());

        let next = transport.observe(fall_at(1001.5)).unwrap();
        assert_eq!(next.sequence_key, SequenceKey::Timestamp(1001.5));
    }

    #[tokio::test]
    async fn test_zero_interval_is_clamped() {
        let transport = PollTransport::new(ScriptedFetcher::default(), Duration::ZERO);
        assert_eq!(transport.interval, MIN_POLL_INTERVAL);

        let (tx, mut rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(transport.run(AlertSink::new(tx), cancel.clone()));
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();

        // A panicking loop would surface as a join error here.
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("poll loop did not stop")
            .unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_non_falls_and_missing_timestamps_ignored() {
        let mut transport = PollTransport::new(ScriptedFetcher::default(), Duration::from_secs(1));
        let no_fall = FallReport {
            fall: false,
            confidence: Some(0.1),
            timestamp: Some(5000.0),
        };
        assert!(transport.observe(no_fall).is_none());

        let no_timestamp = FallReport {
            fall: true,
            confidence: Some(0.9),
            timestamp: None,
        };
        assert!(transport.observe(no_timestamp).is_none());

        // Neither moved the last-seen timestamp.
        assert!(transport.observe(fall_at(10.0)).is_some());
    }

    #[tokio::test]
    async fn test_run_survives_failures_and_stops_on_cancel() {
        let fetcher = ScriptedFetcher::new(vec![
            None,
            Some(fall_at(10.0)),
            Some(fall_at(10.0)),
            None,
            Some(fall_at(11.0)),
        ]);
        let calls = fetcher.calls.clone();
        let transport = PollTransport::new(fetcher, Duration::from_millis(10));

        let (tx, mut rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(transport.run(AlertSink::new(tx), cancel.clone()));

        let mut keys = Vec::new();
        while keys.len() < 2 {
            let update = tokio::time::timeout(Duration::from_secs(2), rx.recv())
                .await
                .expect("timed out waiting for alert")
                .unwrap();
            match update {
                StateUpdate::Alert(event) => keys.push(event.sequence_key),
                other => panic!("unexpected {:?}", other),
            }
        }
        assert_eq!(
            keys,
            vec![SequenceKey::Timestamp(10.0), SequenceKey::Timestamp(11.0)]
        );

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("poll loop did not stop")
            .unwrap();

        let after_close = calls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(calls.load(Ordering::SeqCst), after_close);
    }

    #[tokio::test]
    async fn test_http_fetcher_decodes_status() {
        let (url, _requests, server) =
            spawn_json_server(200, r#"{"fall": true, "confidence": 0.87, "timestamp": 1718000000.25}"#)
                .await;
        let fetcher = HttpStatusFetcher::new(format!("{}/latest-fall", url)).unwrap();

        let report = fetcher.fetch().await.unwrap();
        assert!(report.fall);
        assert_eq!(report.confidence, Some(0.87));
        assert_eq!(report.timestamp, Some(1718000000.25));
        server.abort();
    }

    #[tokio::test]
    async fn test_http_fetcher_errors() {
        let (url, _requests, server) = spawn_json_server(500, r#"{"detail": "boom"}"#).await;
        let fetcher = HttpStatusFetcher::new(url).unwrap();
        assert!(matches!(fetcher.fetch().await, Err(HubError::Http(_))));
        server.abort();

        let port = closed_port().await;
        let fetcher = HttpStatusFetcher::new(format!("http://127.0.0.1:{}/latest-fall", port)).unwrap();
        assert!(fetcher.fetch().await.is_err());
    }
}
