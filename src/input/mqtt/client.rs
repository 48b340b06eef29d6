//! MQTT broker session for the home sensor broker.
//!
//! [`BrokerSession::connect`] returns a cheap, cloneable handle used for
//! subscribing and publishing, plus the [`BrokerEventLoop`] that owns the
//! socket. The event loop reconnects forever at a constant period, re-issues
//! every registered subscription after each ConnAck, and forwards routed
//! messages into the state update channel.

use super::router::TopicRouter;
use crate::config::MqttConfig;
use crate::error::{HubError, Result};
use crate::state::{ConnectivityState, StateUpdate};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions, Outgoing,
    Packet, QoS, SubscribeFilter,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

/// How long a graceful disconnect may take before the socket is dropped.
const DISCONNECT_GRACE: Duration = Duration::from_millis(500);

/// Request channel capacity between handles and the event loop.
const REQUEST_CAPACITY: usize = 100;

type Subscriptions = Arc<Mutex<BTreeSet<String>>>;

/// Handle to the broker connection.
#[derive(Clone)]
pub struct BrokerSession {
    client: AsyncClient,
    subscriptions: Subscriptions,
    link: watch::Receiver<ConnectivityState>,
}

/// Connection driver. Must be run for the handle to do anything.
pub struct BrokerEventLoop {
    event_loop: EventLoop,
    client: AsyncClient,
    subscriptions: Subscriptions,
    link: watch::Sender<ConnectivityState>,
    router: TopicRouter,
    reconnect_period: Duration,
    broker: String,
}

impl BrokerSession {
    /// Create the client for `config`. No I/O happens until the event loop runs.
    pub fn connect(config: &MqttConfig, router: TopicRouter) -> (Self, BrokerEventLoop) {
        let mut options =
            MqttOptions::new(&config.client_id, &config.broker_host, config.broker_port);
        options.set_keep_alive(config.keep_alive);
        options.set_clean_session(true);

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            options.set_credentials(username, password);
        }

        let (client, event_loop) = AsyncClient::new(options, REQUEST_CAPACITY);
        let subscriptions = Subscriptions::default();
        let (link_tx, link_rx) = watch::channel(ConnectivityState::Connecting);

        let session = Self {
            client: client.clone(),
            subscriptions: subscriptions.clone(),
            link: link_rx,
        };
        let driver = BrokerEventLoop {
            event_loop,
            client,
            subscriptions,
            link: link_tx,
            router,
            reconnect_period: config.reconnect_period,
            broker: format!("{}:{}", config.broker_host, config.broker_port),
        };

        (session, driver)
    }

    /// Current state of the broker link.
    pub fn connectivity(&self) -> ConnectivityState {
        *self.link.borrow()
    }

    /// Registered topic patterns, sorted.
    pub fn subscriptions(&self) -> Vec<String> {
        self.subscriptions.lock().iter().cloned().collect()
    }

    /// Register interest in `topics`.
    ///
    /// Topics are remembered and re-issued on every reconnect. When the link
    /// is up they are also subscribed immediately.
    pub fn subscribe<I, S>(&self, topics: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let added: Vec<String> = {
            let mut subscriptions = self.subscriptions.lock();
            topics
                .into_iter()
                .map(Into::into)
                .filter(|topic| subscriptions.insert(topic.clone()))
                .collect()
        };

        if added.is_empty() || self.connectivity() != ConnectivityState::Online {
            return Ok(());
        }

        info!("[MQTT] Subscribing to {:?}", added);
        let filters = added
            .into_iter()
            .map(|topic| SubscribeFilter::new(topic, QoS::AtMostOnce));
        self.client.try_subscribe_many(filters)?;
        Ok(())
    }

    /// Publish `payload` on `topic`. Fails with `NotConnected` while the link is down.
    pub async fn publish(&self, topic: &str, payload: &str) -> Result<()> {
        if self.connectivity() != ConnectivityState::Online {
            return Err(HubError::NotConnected);
        }

        debug!("[MQTT] Publishing to {}: {}", topic, payload);
        self.client
            .publish(topic, QoS::AtMostOnce, false, payload.as_bytes())
            .await?;
        Ok(())
    }
}

impl BrokerEventLoop {
    /// Drive the connection until `cancel` fires or the update channel closes.
    pub async fn run(mut self, updates: mpsc::Sender<StateUpdate>, cancel: CancellationToken) {
        info!("[MQTT] Connecting to {}", self.broker);

        loop {
            let polled = tokio::select! {
                _ = cancel.cancelled() => break,
                polled = self.event_loop.poll() => polled,
            };

            match polled {
                Ok(event) => {
                    if let Some(update) = self.handle_event(event)
                        && !forward(&updates, update, &cancel).await
                    {
                        break;
                    }
                }
                Err(e) => {
                    let update = self.handle_connection_error(&e);
                    if !forward(&updates, update, &cancel).await {
                        break;
                    }
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.reconnect_period) => {}
                    }
                    debug!("[MQTT] Reconnecting to {}", self.broker);
                }
            }
        }

        self.shutdown().await;
    }

    /// Translate one transport event into a state update.
    fn handle_event(&mut self, event: Event) -> Option<StateUpdate> {
        match event {
            Event::Incoming(Packet::ConnAck(ack)) => {
                if ack.code != ConnectReturnCode::Success {
                    warn!("[MQTT] Broker refused connection: {:?}", ack.code);
                    return Some(self.set_link(ConnectivityState::Offline));
                }
                info!("[MQTT] Connected to {}", self.broker);
                // Online first: a concurrent `subscribe` then either lands in
                // the resubscribe copy or sends its own SUBSCRIBE.
                let update = self.set_link(ConnectivityState::Online);
                self.resubscribe();
                Some(update)
            }
            Event::Incoming(Packet::Publish(publish)) => {
                let payload = match std::str::from_utf8(&publish.payload) {
                    Ok(s) => s,
                    Err(e) => {
                        warn!("[MQTT] Invalid UTF-8 payload on {}: {}", publish.topic, e);
                        return None;
                    }
                };
                debug!("[MQTT] Received on {}: {}", publish.topic, payload);

                let update = self.router.route(&publish.topic, payload).into_update();
                if update.is_none() {
                    debug!("[MQTT] Ignoring message on {}", publish.topic);
                }
                update
            }
            Event::Incoming(Packet::Disconnect) => {
                warn!("[MQTT] Broker sent disconnect");
                Some(self.set_link(ConnectivityState::Offline))
            }
            _ => None,
        }
    }

    fn handle_connection_error(&mut self, e: &ConnectionError) -> StateUpdate {
        warn!(
            "[MQTT] Connection to {} failed: {} (retrying in {:?})",
            self.broker, e, self.reconnect_period
        );
        self.set_link(ConnectivityState::Offline)
    }

    /// Re-assert every registered subscription; the broker does not keep them.
    fn resubscribe(&self) {
        let topics: Vec<String> = self.subscriptions.lock().iter().cloned().collect();
        if topics.is_empty() {
            return;
        }

        info!("[MQTT] Subscribing to {} topic(s)", topics.len());
        let filters = topics
            .into_iter()
            .map(|topic| SubscribeFilter::new(topic, QoS::AtMostOnce));
        if let Err(e) = self.client.try_subscribe_many(filters) {
            warn!("[MQTT] Failed to queue subscriptions: {}", e);
        }
    }

    fn set_link(&self, state: ConnectivityState) -> StateUpdate {
        self.link.send_replace(state);
        StateUpdate::Connectivity(state)
    }

    async fn shutdown(mut self) {
        if *self.link.borrow() == ConnectivityState::Online && self.client.try_disconnect().is_ok()
        {
            let flushed = tokio::time::timeout(DISCONNECT_GRACE, async {
                loop {
                    match self.event_loop.poll().await {
                        Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                        Ok(_) => {}
                    }
                }
            })
            .await;
            if flushed.is_err() {
                debug!("[MQTT] Disconnect not flushed in time");
            }
        }

        self.link.send_replace(ConnectivityState::Offline);
        info!("[MQTT] Connection to {} closed", self.broker);
    }
}

/// Send an update unless cancelled. Returns false when the loop should stop.
async fn forward(
    updates: &mpsc::Sender<StateUpdate>,
    update: StateUpdate,
    cancel: &CancellationToken,
) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        sent = updates.send(update) => {
            if sent.is_err() {
                error!("[MQTT] State channel closed");
            }
            sent.is_ok()
        }
    }
}
