//! A running hub session.
//!
//! [`Session`] wires the broker connection, the alert transport and the state
//! aggregator together. Each runs in its own task; all of them share one
//! cancellation token, and [`Session::close`] joins every task before it
//! returns.

use crate::config::{AlertMode, Config};
use crate::error::{HubError, Result};
use crate::input::alert::AlertTransport;
use crate::input::mqtt::{BrokerSession, CommandPublisher, CommandRequest, TopicRouter};
use crate::state::{Snapshot, StateAggregator, StateUpdate};
use log::{error, info};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Capacity of the channel feeding the aggregator.
const UPDATE_CAPACITY: usize = 64;

pub struct Session {
    broker: BrokerSession,
    commands: CommandPublisher<BrokerSession>,
    state: watch::Receiver<Snapshot>,
    updates: mpsc::Sender<StateUpdate>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    alert_mode: AlertMode,
}

impl Session {
    /// Select the alert transport for `config` and start the session.
    pub async fn start(config: Config) -> Result<Self> {
        let transport = AlertTransport::select(&config.alert).await?;
        Self::start_with(&config, transport)
    }

    /// Start the session with an already chosen alert transport.
    pub fn start_with(config: &Config, transport: AlertTransport) -> Result<Self> {
        let cancel = CancellationToken::new();
        let (updates, updates_rx) = mpsc::channel(UPDATE_CAPACITY);

        let aggregator = StateAggregator::new();
        let state = aggregator.subscribe();

        let router = TopicRouter::new(&config.mqtt.topic_area, config.mqtt.metric_policy);
        let topics = router.default_topics();
        let (broker, event_loop) = BrokerSession::connect(&config.mqtt, router);
        broker.subscribe(topics)?;

        let commands = CommandPublisher::new(
            broker.clone(),
            state.clone(),
            config.mqtt.topic_area.clone(),
        );

        let alert_mode = transport.mode();
        info!(
            "[Session] Starting with broker {}:{}, alerts via {}",
            config.mqtt.broker_host, config.mqtt.broker_port, alert_mode
        );

        let tasks = vec![
            tokio::spawn(aggregator.run(updates_rx, cancel.clone())),
            tokio::spawn(event_loop.run(updates.clone(), cancel.clone())),
            tokio::spawn(transport.run(updates.clone(), cancel.clone())),
        ];

        Ok(Self {
            broker,
            commands,
            state,
            updates,
            cancel,
            tasks,
            alert_mode,
        })
    }

    /// Clone the current state.
    pub fn snapshot(&self) -> Snapshot {
        self.state.borrow().clone()
    }

    /// Receiver notified on every state change.
    pub fn watch(&self) -> watch::Receiver<Snapshot> {
        self.state.clone()
    }

    /// Transport actually in use, never `Auto`.
    pub fn alert_mode(&self) -> AlertMode {
        self.alert_mode
    }

    /// Register additional topic patterns with the broker.
    pub fn subscribe<I, S>(&self, topics: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.broker.subscribe(topics)
    }

    pub async fn publish(&self, command: CommandRequest) -> Result<()> {
        self.commands.publish(command).await
    }

    /// Toggle a device away from the state the caller currently shows.
    pub async fn toggle_device(
        &self,
        room_id: &str,
        device: &str,
        current_state: bool,
    ) -> Result<CommandRequest> {
        self.commands.send(room_id, device, current_state).await
    }

    /// Dismiss the current fall alert.
    pub async fn acknowledge_alert(&self) -> Result<()> {
        self.send_update(StateUpdate::AcknowledgeAlert).await
    }

    /// Dismiss the current gas alert.
    pub async fn acknowledge_gas_alert(&self) -> Result<()> {
        self.send_update(StateUpdate::AcknowledgeGasAlert).await
    }

    async fn send_update(&self, update: StateUpdate) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(HubError::SessionClosed);
        }
        self.updates
            .send(update)
            .await
            .map_err(|_| HubError::SessionClosed)
    }

    /// Stop every task and wait for them to finish.
    pub async fn close(mut self) {
        info!("[Session] Closing");
        self.cancel.cancel();

        for task in std::mem::take(&mut self.tasks) {
            if let Err(e) = task.await {
                error!("[Session] Task ended abnormally: {}", e);
            }
        }
        info!("[Session] Closed");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
