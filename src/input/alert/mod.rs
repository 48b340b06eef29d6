//! Fall-alert feed from the detection server.
//!
//! Two transports deliver the same reports: a WebSocket the server pushes
//! into, and an HTTP endpoint polled on an interval. [`AlertTransport::select`]
//! picks one per session. Either way every event goes through the
//! [`Deduplicator`] before it reaches the aggregator.

pub mod dedup;
mod poll;
mod push;

pub use dedup::Deduplicator;
pub use poll::{HttpStatusFetcher, PollTransport, StatusFetcher};
pub use push::PushTransport;

use crate::config::{AlertConfig, AlertMode};
use crate::error::Result;
use crate::state::{AlertEvent, StateUpdate};
use log::{info, warn};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Fall status as reported by the detection server.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FallReport {
    pub fall: bool,
    #[serde(default)]
    pub confidence: Option<f64>,
    /// Server time of the detection, seconds since the epoch.
    #[serde(default)]
    pub timestamp: Option<f64>,
}

/// De-duplicating front of the aggregator channel.
pub struct AlertSink {
    dedup: Deduplicator,
    updates: mpsc::Sender<StateUpdate>,
}

impl AlertSink {
    pub fn new(updates: mpsc::Sender<StateUpdate>) -> Self {
        Self {
            dedup: Deduplicator::new(),
            updates,
        }
    }

    /// Forward `event` if it advances the watermark.
    ///
    /// Returns `false` once the session is shutting down, which tells the
    /// transport to stop.
    pub async fn deliver(&mut self, event: AlertEvent, cancel: &CancellationToken) -> bool {
        if !self.dedup.accept(&event) {
            return true;
        }

        info!("[Alert] {}", event.message);
        tokio::select! {
            _ = cancel.cancelled() => false,
            sent = self.updates.send(StateUpdate::Alert(event)) => sent.is_ok(),
        }
    }
}

/// The transport chosen for a session.
pub enum AlertTransport {
    Push(PushTransport),
    Poll(PollTransport),
}

impl AlertTransport {
    /// Pick a transport for `config.mode`.
    ///
    /// `Auto` tries to open the push socket within `probe_timeout` and keeps
    /// it open on success; any failure falls back to polling.
    pub async fn select(config: &AlertConfig) -> Result<Self> {
        match config.mode {
            AlertMode::Push => Ok(Self::Push(PushTransport::new(config.push_url.clone()))),
            AlertMode::Poll => Ok(Self::Poll(PollTransport::http(
                config.status_url.clone(),
                config.poll_interval,
            )?)),
            AlertMode::Auto => {
                let probe = tokio::time::timeout(
                    config.probe_timeout,
                    PushTransport::connect(config.push_url.clone()),
                )
                .await;

                match probe {
                    Ok(Ok(push)) => Ok(Self::Push(push)),
                    Ok(Err(e)) => {
                        warn!("[Alert] Push socket unavailable ({}), polling instead", e);
                        Self::fallback(config)
                    }
                    Err(_) => {
                        warn!(
                            "[Alert] Push socket did not answer within {:?}, polling instead",
                            config.probe_timeout
                        );
                        Self::fallback(config)
                    }
                }
            }
        }
    }

    fn fallback(config: &AlertConfig) -> Result<Self> {
        Ok(Self::Poll(PollTransport::http(
            config.status_url.clone(),
            config.poll_interval,
        )?))
    }

    /// The effective mode, never `Auto`.
    pub fn mode(&self) -> AlertMode {
        match self {
            Self::Push(_) => AlertMode::Push,
            Self::Poll(_) => AlertMode::Poll,
        }
    }

    pub async fn run(self, updates: mpsc::Sender<StateUpdate>, cancel: CancellationToken) {
        let sink = AlertSink::new(updates);
        match self {
            Self::Push(push) => push.run(sink, cancel).await,
            Self::Poll(poll) => poll.run(sink, cancel).await,
        }
    }
}
